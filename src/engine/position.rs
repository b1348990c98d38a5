//! Position construction
//!
//! Builds the immutable initial position from a signal, the reference bar,
//! and an ATR reading. The ladder and stop are ATR-scaled; a near-zero ATR
//! is rescaled up to a minimum spread so the ladder cannot be degenerate.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::types::{Bar, ExitReason, PositionStatus, Side, Signal};

/// Ladder and stop geometry, in ATR multiples.
#[derive(Debug, Clone)]
pub struct LadderConfig {
    /// Three take-profit multipliers, strictly increasing
    pub tp_multipliers: [f64; 3],
    /// Stop-loss distance in ATRs
    pub sl_multiplier: f64,
    /// Trailing activates once rung `index` (1-based count of hits) is reached
    pub trailing_activation_index: usize,
    /// Trailing gap in ATRs
    pub trailing_gap_atr: f64,
    /// Minimum distance from entry to TP1, as a fraction of entry price
    pub min_tp_spread: f64,
    /// Noise buffer as a fraction of entry price; levels must be crossed by
    /// more than this before they fire
    pub noise_buffer_pct: f64,
    /// Leverage applied to percentage returns
    pub leverage: f64,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            tp_multipliers: [1.0, 1.5, 2.5],
            sl_multiplier: 1.0,
            trailing_activation_index: 2,
            trailing_gap_atr: 0.5,
            min_tp_spread: 0.001,
            noise_buffer_pct: 0.0,
            leverage: 1.0,
        }
    }
}

impl LadderConfig {
    /// Structural validation, run once at startup.
    pub fn validate(&self) -> Result<(), BuildError> {
        let [a, b, c] = self.tp_multipliers;
        if !(a > 0.0 && a < b && b < c) {
            return Err(BuildError::InvalidLadderConfig(
                "tp_multipliers must be positive and strictly increasing",
            ));
        }
        if self.sl_multiplier <= 0.0 || !self.sl_multiplier.is_finite() {
            return Err(BuildError::InvalidLadderConfig(
                "sl_multiplier must be a positive finite number",
            ));
        }
        if self.trailing_gap_atr <= 0.0 || !self.trailing_gap_atr.is_finite() {
            return Err(BuildError::InvalidLadderConfig(
                "trailing_gap_atr must be a positive finite number",
            ));
        }
        if self.leverage <= 0.0 || !self.leverage.is_finite() {
            return Err(BuildError::InvalidLadderConfig(
                "leverage must be a positive finite number",
            ));
        }
        Ok(())
    }
}

/// Why the builder refused to open a position.
#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    #[error("volatility measure {0} is absent or non-positive")]
    InvalidVolatility(f64),
    #[error("reference price {0} is non-positive or non-finite")]
    InvalidReferencePrice(f64),
    #[error("invalid ladder configuration: {0}")]
    InvalidLadderConfig(&'static str),
}

/// Trailing-stop state. `enabled` transitions false->true exactly once;
/// `level`, once set, only moves in the favorable direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingState {
    pub enabled: bool,
    pub triggered_once: bool,
    pub level: Option<f64>,
    /// Gap below/above the favorable extreme, in price units
    pub gap: f64,
}

/// A single simulated open trade: entry, hard stop, and three-rung ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    /// Hard stop; mutated only by the trailing ratchet path
    pub stop_level: f64,
    /// Exactly 3 levels, strictly increasing in favorable distance from entry
    pub target_levels: Vec<f64>,
    /// Rung indices already triggered; grows monotonically
    pub hit_levels: Vec<usize>,
    /// Rung indices already credited to the balance; prevents double counting
    pub partial_credits_applied: Vec<usize>,
    pub trailing: TrailingState,
    pub status: PositionStatus,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
    /// Milliseconds
    pub opened_at: i64,
    pub closed_at: Option<i64>,
    pub strategy: String,
    pub confidence: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_hit(&self, index: usize) -> bool {
        self.hit_levels.contains(&index)
    }

    pub fn partial_credited(&self, index: usize) -> bool {
        self.partial_credits_applied.contains(&index)
    }

    /// Seconds between open and close; 0 while still open.
    pub fn duration_secs(&self) -> i64 {
        self.closed_at
            .map(|c| (c - self.opened_at).max(0) / 1000)
            .unwrap_or(0)
    }
}

/// Constructs initial positions. Pure apart from tracing diagnostics.
#[derive(Debug, Clone, Default)]
pub struct PositionBuilder {
    config: LadderConfig,
}

impl PositionBuilder {
    pub fn new(config: LadderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    /// Build a position from a signal and its reference bar.
    ///
    /// Rejects when the ATR is absent or non-positive; both the stop and the
    /// ladder derive from it, so there is no valid degenerate case.
    pub fn build(&self, signal: &Signal, bar: &Bar, atr: f64) -> Result<Position, BuildError> {
        if !atr.is_finite() || atr <= 0.0 {
            return Err(BuildError::InvalidVolatility(atr));
        }
        let entry = bar.close;
        if !entry.is_finite() || entry <= 0.0 {
            return Err(BuildError::InvalidReferencePrice(entry));
        }

        let is_long = signal.side.is_long();
        let dir = if is_long { 1.0 } else { -1.0 };

        let mut stop = entry - dir * atr * self.config.sl_multiplier;
        let mut targets: Vec<f64> = self
            .config
            .tp_multipliers
            .iter()
            .map(|mult| entry + dir * atr * mult)
            .collect();

        // Minimum-spread guard: a near-zero ATR must not produce an
        // instantly-triggered ladder. Rescale everything about the entry so
        // level proportions are preserved.
        let actual_distance = (targets[0] - entry).abs();
        let min_distance = entry * self.config.min_tp_spread;
        if actual_distance < min_distance {
            let scale = min_distance / actual_distance;
            for tp in &mut targets {
                *tp = entry + (*tp - entry) * scale;
            }
            stop = entry + (stop - entry) * scale;
        }

        info!(
            symbol = %signal.symbol,
            side = %signal.side,
            entry,
            stop,
            tp1 = targets[0],
            tp2 = targets[1],
            tp3 = targets[2],
            "📊 Trade setup"
        );

        Ok(Position {
            id: Uuid::new_v4().to_string(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            entry_price: entry,
            stop_level: stop,
            target_levels: targets,
            hit_levels: Vec::new(),
            partial_credits_applied: Vec::new(),
            trailing: TrailingState {
                enabled: false,
                triggered_once: false,
                level: None,
                gap: atr * self.config.trailing_gap_atr,
            },
            status: PositionStatus::Open,
            exit_reason: None,
            exit_price: None,
            realized_pnl_pct: None,
            opened_at: bar.close_time,
            closed_at: None,
            strategy: signal.strategy.clone(),
            confidence: signal.confidence,
        })
    }
}
