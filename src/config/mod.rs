//! Configuration management
//!
//! Layered: built-in defaults, then `config/default` and `config/local`
//! files, then `LADDERBOT_*` environment variables via .env.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::engine::{self, LadderConfig};
use crate::market_data::{MarketDataConfig, BINANCE_REST_URL};
use crate::signal::SignalConfig;
use crate::tracker::TrackerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub strategy: StrategySection,
    pub ladder: LadderSection,
    pub paper: PaperConfig,
    pub market_data: MarketDataSection,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logging
    pub tag: String,
    /// Symbols to cycle over
    pub symbols: Vec<String>,
    /// Candle interval, e.g. "1m"
    pub timeframe: String,
    /// Seconds between evaluation cycles
    pub evaluation_interval_secs: u64,
    /// Re-entry cooldown per symbol after a close (0 disables)
    pub cooldown_secs: i64,
    /// Consecutive per-symbol fetch failures before escalating
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySection {
    pub name: String,
    pub min_trend_strength: f64,
    pub min_volatility: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LadderSection {
    pub tp_multipliers: [f64; 3],
    pub sl_multiplier: f64,
    pub trailing_activation_index: usize,
    pub trailing_gap_atr: f64,
    pub min_tp_spread: f64,
    pub noise_buffer_pct: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    pub initial_balance: f64,
    pub partial_credit_fraction: f64,
    /// Absolute per-position PnL percentage beyond which a close is flagged
    pub suspicious_pnl_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataSection {
    pub rest_url: String,
    pub atr_period: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: String,
    pub csv_enabled: bool,
}

impl AppConfig {
    /// Load configuration from defaults, files, and environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Bot defaults
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.symbols", vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"])?
            .set_default("bot.timeframe", "1m")?
            .set_default("bot.evaluation_interval_secs", 30)?
            .set_default("bot.cooldown_secs", 0)?
            .set_default("bot.max_consecutive_failures", 5)?
            // Strategy defaults
            .set_default("strategy.name", "SmartTrendStrategy")?
            .set_default("strategy.min_trend_strength", 0.0001)?
            .set_default("strategy.min_volatility", 0.0003)?
            // Ladder defaults
            .set_default("ladder.tp_multipliers", vec![1.0, 1.5, 2.5])?
            .set_default("ladder.sl_multiplier", 1.0)?
            .set_default("ladder.trailing_activation_index", 2)?
            .set_default("ladder.trailing_gap_atr", 0.5)?
            .set_default("ladder.min_tp_spread", 0.001)?
            .set_default("ladder.noise_buffer_pct", 0.0)?
            .set_default("ladder.leverage", 1.0)?
            // Paper account defaults
            .set_default("paper.initial_balance", 5000.0)?
            .set_default("paper.partial_credit_fraction", 0.33)?
            .set_default("paper.suspicious_pnl_pct", engine::SUSPICIOUS_PNL_PCT)?
            // Market data defaults
            .set_default("market_data.rest_url", BINANCE_REST_URL)?
            .set_default("market_data.atr_period", 21)?
            .set_default("market_data.request_timeout_secs", 5)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Config files, if present
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Environment overrides (LADDERBOT_*)
            .add_source(Environment::with_prefix("LADDERBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.to_ladder_config().validate()?;
        Ok(app_config)
    }

    pub fn to_ladder_config(&self) -> LadderConfig {
        LadderConfig {
            tp_multipliers: self.ladder.tp_multipliers,
            sl_multiplier: self.ladder.sl_multiplier,
            trailing_activation_index: self.ladder.trailing_activation_index,
            trailing_gap_atr: self.ladder.trailing_gap_atr,
            min_tp_spread: self.ladder.min_tp_spread,
            noise_buffer_pct: self.ladder.noise_buffer_pct,
            leverage: self.ladder.leverage,
        }
    }

    pub fn to_tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            symbols: self.bot.symbols.clone(),
            cycle_interval_secs: self.bot.evaluation_interval_secs,
            cooldown_secs: self.bot.cooldown_secs,
            max_consecutive_failures: self.bot.max_consecutive_failures,
            partial_credit_fraction: self.paper.partial_credit_fraction,
            suspicious_pnl_pct: self.paper.suspicious_pnl_pct,
        }
    }

    pub fn to_market_data_config(&self) -> MarketDataConfig {
        MarketDataConfig {
            rest_url: self.market_data.rest_url.clone(),
            interval: self.bot.timeframe.clone(),
            atr_period: self.market_data.atr_period,
            request_timeout_secs: self.market_data.request_timeout_secs,
        }
    }

    pub fn to_signal_config(&self) -> SignalConfig {
        SignalConfig {
            min_trend_strength: self.strategy.min_trend_strength,
            min_volatility: self.strategy.min_volatility,
            strategy_name: self.strategy.name.clone(),
        }
    }

    /// One-line summary for startup logging.
    pub fn digest(&self) -> String {
        format!(
            "tag={} symbols={:?} timeframe={} interval={}s leverage={} balance={:.2}",
            self.bot.tag,
            self.bot.symbols,
            self.bot.timeframe,
            self.bot.evaluation_interval_secs,
            self.ladder.leverage,
            self.paper.initial_balance
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_and_validate() {
        let config = AppConfig::load().unwrap();
        assert_eq!(config.bot.symbols.len(), 3);
        assert_eq!(config.ladder.tp_multipliers, [1.0, 1.5, 2.5]);
        assert_eq!(config.market_data.atr_period, 21);
        assert!(config.paper.initial_balance > 0.0);
    }

    #[test]
    fn digest_mentions_symbols() {
        let config = AppConfig::load().unwrap();
        assert!(config.digest().contains("BTCUSDT"));
    }
}
