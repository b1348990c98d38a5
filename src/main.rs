use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ladderbot::config::AppConfig;
use ladderbot::ledger::{BalanceLedger, OpenPositionsStore, TradeJournal};
use ladderbot::market_data::BinanceMarketData;
use ladderbot::signal::TrendVolatilitySignal;
use ladderbot::tracker::{SystemClock, TradeTracker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    info!(version = %config.bot.tag, "🤖 LadderBot starting");
    info!(config = %config.digest(), "Configuration loaded");

    let data_dir = Path::new(&config.persistence.data_dir);
    let journal = if config.persistence.csv_enabled {
        Arc::new(TradeJournal::new(data_dir)?)
    } else {
        info!("CSV journal disabled, trade records will not be persisted");
        Arc::new(TradeJournal::disabled())
    };
    let balance = Arc::new(BalanceLedger::open(data_dir, config.paper.initial_balance)?);
    let store = OpenPositionsStore::new(data_dir)?;

    let market_data = Arc::new(BinanceMarketData::new(config.to_market_data_config())?);
    let signal_source = Arc::new(TrendVolatilitySignal::new(config.to_signal_config()));

    let tracker = TradeTracker::new(
        config.to_tracker_config(),
        config.to_ladder_config(),
        market_data,
        signal_source,
        journal,
        balance,
        store,
        Arc::new(SystemClock),
    );
    tracker.restore().await?;

    tokio::select! {
        result = tracker.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received, exiting");
        }
    }

    Ok(())
}
