//! Cycle orchestrator.
//!
//! One cycle per interval: for each configured symbol, fetch the latest
//! closed bar, advance the open position through the evaluator or try to
//! open a new one, then route credits and closes to the ledger. The
//! open-positions snapshot is rewritten after every map change, before any
//! ledger write, and ledger failures never roll back in-memory state. A
//! symbol whose data fetch fails is skipped for the cycle; its position
//! stays untouched until data returns.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::engine::{
    is_suspicious, pnl_pct, Evaluation, LadderConfig, PartialCredit, Position, PositionBuilder,
    PositionEvaluator, SUSPICIOUS_PNL_PCT,
};
use crate::ledger::{
    BalanceLedger, CloseRecord, OpenPositionsStore, OpenRecord, PartialCreditRecord,
    TradeJournal, CLOSE_SCHEMA_VERSION,
};
use crate::market_data::MarketData;
use crate::signal::SignalSource;
use crate::types::Bar;

/// Wall-clock source. Injected so cooldown logic is testable; the evaluator
/// itself never reads the clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Symbols to cycle over, e.g. BTCUSDT
    pub symbols: Vec<String>,
    pub cycle_interval_secs: u64,
    /// Re-entry cooldown per symbol after a close
    pub cooldown_secs: i64,
    /// Consecutive per-symbol failures before escalating to error logs
    pub max_consecutive_failures: u32,
    /// Fraction of a rung's PnL credited on each partial fill
    pub partial_credit_fraction: f64,
    /// Absolute PnL percentage beyond which a close is flagged, never altered
    pub suspicious_pnl_pct: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            cycle_interval_secs: 60,
            cooldown_secs: 300,
            max_consecutive_failures: 5,
            partial_credit_fraction: 0.33,
            suspicious_pnl_pct: SUSPICIOUS_PNL_PCT,
        }
    }
}

pub struct TradeTracker {
    config: TrackerConfig,
    ladder: LadderConfig,
    builder: PositionBuilder,
    evaluator: PositionEvaluator,
    market_data: Arc<dyn MarketData>,
    signal_source: Arc<dyn SignalSource>,
    journal: Arc<TradeJournal>,
    balance: Arc<BalanceLedger>,
    store: OpenPositionsStore,
    clock: Arc<dyn Clock>,
    /// Open positions keyed by symbol. Closed positions are removed once
    /// their completion record is written.
    positions: Mutex<HashMap<String, Position>>,
    /// Per-symbol earliest re-entry timestamp (ms)
    cooldowns: Mutex<HashMap<String, i64>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl TradeTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TrackerConfig,
        ladder: LadderConfig,
        market_data: Arc<dyn MarketData>,
        signal_source: Arc<dyn SignalSource>,
        journal: Arc<TradeJournal>,
        balance: Arc<BalanceLedger>,
        store: OpenPositionsStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            builder: PositionBuilder::new(ladder.clone()),
            evaluator: PositionEvaluator::new(ladder.clone()),
            ladder,
            market_data,
            signal_source,
            journal,
            balance,
            store,
            clock,
            positions: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Restore open positions from the snapshot taken by a previous run.
    pub async fn restore(&self) -> Result<()> {
        let snapshot = self.store.load();
        let mut positions = self.positions.lock().await;
        for position in snapshot.into_values() {
            if position.is_open() {
                positions.insert(position.symbol.clone(), position);
            }
        }
        if !positions.is_empty() {
            info!(count = positions.len(), "🔁 Resuming open positions");
        }
        Ok(())
    }

    pub async fn open_position_count(&self) -> usize {
        self.positions.lock().await.len()
    }

    /// Run cycles forever. The caller decides when to stop (e.g. via
    /// `tokio::select!` against a shutdown signal).
    pub async fn run(&self) -> Result<()> {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.config.cycle_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    /// One pass over all configured symbols.
    pub async fn run_cycle(&self) {
        for symbol in &self.config.symbols {
            match self.process_symbol(symbol).await {
                Ok(()) => {
                    self.failures.lock().await.remove(symbol);
                }
                Err(e) => {
                    let mut failures = self.failures.lock().await;
                    let count = failures.entry(symbol.clone()).or_insert(0);
                    *count += 1;
                    if *count >= self.config.max_consecutive_failures {
                        error!(symbol = %symbol, consecutive = *count, error = %e, "Symbol failing repeatedly, position left untouched");
                    } else {
                        warn!(symbol = %symbol, consecutive = *count, error = %e, "Cycle step failed, will retry next cycle");
                    }
                }
            }
        }
    }

    async fn process_symbol(&self, symbol: &str) -> Result<()> {
        let bar = self
            .market_data
            .latest_bar(symbol)
            .await
            .with_context(|| format!("Failed to fetch bar for {}", symbol))?;

        let open = self.positions.lock().await.get(symbol).cloned();
        match open {
            Some(position) => self.advance_position(symbol, position, &bar).await,
            None => self.try_open(symbol, &bar).await,
        }
    }

    // ── Evaluation path ─────────────────────────────────────────

    async fn advance_position(&self, symbol: &str, position: Position, bar: &Bar) -> Result<()> {
        // A failed ATR refresh is not fatal: the evaluator keeps the last
        // trailing gap for this cycle.
        let atr = match self.market_data.volatility(symbol).await {
            Ok(reading) => Some(reading.value),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "ATR refresh failed, keeping previous trailing gap");
                None
            }
        };

        let evaluation = self.evaluator.evaluate(position, bar, atr);
        self.apply_evaluation(symbol, evaluation).await
    }

    async fn apply_evaluation(&self, symbol: &str, evaluation: Evaluation) -> Result<()> {
        let Evaluation {
            position,
            partial_credits,
        } = evaluation;

        // Commit the evaluated position before any ledger write. The rung
        // bookkeeping in hit_levels and partial_credits_applied is the
        // exactly-once guard against re-crediting a rung, so a failed sink
        // write must never roll it back to the pre-evaluation state.
        if position.is_open() {
            self.positions
                .lock()
                .await
                .insert(symbol.to_string(), position.clone());
        } else {
            self.positions.lock().await.remove(symbol);
            self.cooldowns.lock().await.insert(
                symbol.to_string(),
                self.clock.now_ms() + self.config.cooldown_secs * 1000,
            );
        }
        if let Err(e) = self.snapshot().await {
            error!(symbol = %symbol, error = %e, "Snapshot write failed, retrying on next state change");
        }

        for credit in &partial_credits {
            if let Err(e) = self.book_partial(symbol, &position, credit).await {
                error!(symbol = %symbol, rung = credit.index, error = %e, "Partial credit record lost, position state already committed");
            }
        }

        if !position.is_open() {
            if let Err(e) = self.settle_close(symbol, &position).await {
                error!(symbol = %symbol, error = %e, "Close record lost, position state already committed");
            }
        }
        Ok(())
    }

    async fn book_partial(
        &self,
        symbol: &str,
        position: &Position,
        credit: &PartialCredit,
    ) -> Result<()> {
        let credited_pct = self.config.partial_credit_fraction
            * pnl_pct(
                position.entry_price,
                credit.price,
                position.side,
                self.ladder.leverage,
            );
        let (_, balance_after) = self
            .balance
            .apply_pnl_pct(credited_pct)
            .await
            .context("Failed to credit partial PnL")?;
        self.journal
            .log_partial(PartialCreditRecord {
                timestamp: self.clock.now_ms(),
                position_id: position.id.clone(),
                symbol: symbol.to_string(),
                rung: credit.index,
                level_price: credit.price,
                credit_fraction: self.config.partial_credit_fraction,
                credited_pnl_pct: credited_pct,
                balance_after,
            })
            .await?;
        info!(
            symbol = %symbol,
            rung = %credit.reason,
            price = credit.price,
            credited_pct = format!("{:+.3}%", credited_pct),
            balance = format!("{:.2}", balance_after),
            "🎯 Partial target hit"
        );
        Ok(())
    }

    async fn settle_close(&self, symbol: &str, position: &Position) -> Result<()> {
        let realized = position.realized_pnl_pct.unwrap_or(0.0);
        // Partials already banked a slice of the ladder; the close credits
        // only the remainder so the balance never double-counts a rung.
        let remaining_fraction = (1.0
            - self.config.partial_credit_fraction * position.partial_credits_applied.len() as f64)
            .max(0.0);
        let credited_pct = remaining_fraction * realized;

        if is_suspicious(realized, self.config.suspicious_pnl_pct) {
            warn!(
                symbol = %symbol,
                pnl_pct = realized,
                entry = position.entry_price,
                exit = position.exit_price,
                "🚨 Suspicious PnL on close, recording anyway"
            );
        }

        let (_, balance_after) = self
            .balance
            .apply_pnl_pct(credited_pct)
            .await
            .context("Failed to apply close PnL")?;

        let exit_reason = position
            .exit_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let tp_hits = position
            .hit_levels
            .iter()
            .map(|i| format!("TP{}", i + 1))
            .collect::<Vec<_>>()
            .join(",");

        self.journal
            .log_close(CloseRecord {
                schema_version: CLOSE_SCHEMA_VERSION,
                timestamp: self.clock.now_ms(),
                position_id: position.id.clone(),
                symbol: symbol.to_string(),
                side: position.side.to_string(),
                entry_price: position.entry_price,
                exit_price: position.exit_price.unwrap_or(0.0),
                exit_reason: exit_reason.clone(),
                tp_hits,
                realized_pnl_pct: realized,
                duration_secs: position.duration_secs(),
                balance_after,
                strategy: position.strategy.clone(),
            })
            .await?;

        let marker = if realized >= 0.0 { "✅" } else { "🛑" };
        info!(
            symbol = %symbol,
            reason = %exit_reason,
            pnl_pct = format!("{:+.3}%", realized),
            balance = format!("{:.2}", balance_after),
            "{} Position closed",
            marker
        );
        Ok(())
    }

    // ── Entry path ──────────────────────────────────────────────

    async fn try_open(&self, symbol: &str, bar: &Bar) -> Result<()> {
        let now = self.clock.now_ms();
        if let Some(eligible_at) = self.cooldowns.lock().await.get(symbol) {
            if now < *eligible_at {
                debug!(symbol = %symbol, remaining_secs = (eligible_at - now) / 1000, "Cooldown active, skipping entry");
                return Ok(());
            }
        }

        let signal = match self.signal_source.generate(symbol, bar) {
            Some(s) => s,
            None => return Ok(()),
        };

        let reading = self
            .market_data
            .volatility(symbol)
            .await
            .with_context(|| format!("No volatility reading for {}", symbol))?;
        if reading.fallback {
            warn!(symbol = %symbol, atr = reading.value, "Opening on cached ATR");
        }

        let position = match self.builder.build(&signal, bar, reading.value) {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Signal rejected by position builder");
                return Ok(());
            }
        };

        self.positions
            .lock()
            .await
            .insert(symbol.to_string(), position.clone());
        if let Err(e) = self.snapshot().await {
            error!(symbol = %symbol, error = %e, "Snapshot write failed, retrying on next state change");
        }

        if let Err(e) = self
            .journal
            .log_open(OpenRecord {
                timestamp: now,
                position_id: position.id.clone(),
                symbol: symbol.to_string(),
                side: position.side.to_string(),
                entry_price: position.entry_price,
                stop_level: position.stop_level,
                tp1: position.target_levels[0],
                tp2: position.target_levels[1],
                tp3: position.target_levels[2],
                atr: reading.value,
                strategy: position.strategy.clone(),
                confidence: position.confidence,
            })
            .await
        {
            error!(symbol = %symbol, error = %e, "Open record lost, position state already committed");
        }

        info!(
            symbol = %symbol,
            side = %position.side,
            entry = position.entry_price,
            stop = position.stop_level,
            targets = ?position.target_levels,
            "📈 Position opened"
        );
        Ok(())
    }

    async fn snapshot(&self) -> Result<()> {
        let positions = self.positions.lock().await;
        self.store.save(positions.values())
    }
}
