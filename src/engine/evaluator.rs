//! Position evaluator, the per-bar state machine.
//!
//! Ordering defines the tie-break policy when one bar's wick crosses several
//! levels: the hard stop is checked first (worst-case assumption that the
//! adverse excursion happens before any favorable one within the same bar),
//! then the ladder in increasing rung order, then the trailing ratchet.

use tracing::{error, warn};

use crate::engine::pnl::pnl_pct;
use crate::engine::position::{LadderConfig, Position};
use crate::types::{Bar, ExitReason, PositionStatus};

/// A partial completion event for a non-terminal rung. The position stays
/// open; the orchestrator routes this to the ledger exactly once per rung.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCredit {
    pub index: usize,
    pub price: f64,
    pub reason: ExitReason,
}

/// Result of one evaluation call.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub position: Position,
    pub partial_credits: Vec<PartialCredit>,
}

impl Evaluation {
    fn unchanged(position: Position) -> Self {
        Self {
            position,
            partial_credits: Vec::new(),
        }
    }
}

/// Advances open positions against incoming bars. Synchronous, non-blocking,
/// deterministic given its inputs.
#[derive(Debug, Clone, Default)]
pub struct PositionEvaluator {
    config: LadderConfig,
}

impl PositionEvaluator {
    pub fn new(config: LadderConfig) -> Self {
        Self { config }
    }

    /// Evaluate one bar against one position.
    ///
    /// Returns the input unchanged if the position is already closed. The
    /// optional `atr` refreshes the trailing gap; an invalid reading keeps
    /// the last valid gap for this cycle.
    pub fn evaluate(&self, position: Position, bar: &Bar, atr: Option<f64>) -> Evaluation {
        if position.status == PositionStatus::Closed {
            return Evaluation::unchanged(position);
        }

        let mut pos = position;

        // Structural-integrity guard: a malformed ladder is upstream data
        // corruption, terminal for this position only.
        if !Self::ladder_well_formed(&pos) {
            error!(
                symbol = %pos.symbol,
                id = %pos.id,
                targets = ?pos.target_levels,
                "Malformed target ladder, force-closing position"
            );
            // The bar itself may be garbage too; the defensive exit price
            // must stay finite so the journal row stays readable.
            let exit = if bar.close.is_finite() && bar.close > 0.0 {
                bar.close
            } else {
                pos.entry_price
            };
            self.close(&mut pos, ExitReason::Error, exit, bar.close_time);
            return Evaluation::unchanged(pos);
        }

        // Bad bar data: refuse to transition on it, keep the last valid state.
        if !bar.prices_finite() {
            warn!(
                symbol = %pos.symbol,
                id = %pos.id,
                "Non-finite prices in bar, skipping evaluation this cycle"
            );
            return Evaluation::unchanged(pos);
        }

        let is_long = pos.side.is_long();
        let buffer = pos.entry_price * self.config.noise_buffer_pct;
        let favorable = if is_long { bar.high } else { bar.low };
        let adverse = if is_long { bar.low } else { bar.high };

        // 1. Hard stop, unconditionally before any target check.
        let stop_hit = if is_long {
            adverse <= pos.stop_level - buffer
        } else {
            adverse >= pos.stop_level + buffer
        };
        if stop_hit {
            let stop = pos.stop_level;
            self.close(&mut pos, ExitReason::Sl, stop, bar.close_time);
            return Evaluation::unchanged(pos);
        }

        // 2. Target ladder, in increasing index order. All newly crossed
        //    rungs below the terminal one are processed in this same call.
        let mut partial_credits = Vec::new();
        let last_index = pos.target_levels.len() - 1;
        for i in 0..pos.target_levels.len() {
            if pos.is_hit(i) {
                continue;
            }
            let target = pos.target_levels[i];
            let tp_hit = if is_long {
                favorable >= target - buffer
            } else {
                favorable <= target + buffer
            };
            if !tp_hit {
                continue;
            }

            pos.hit_levels.push(i);

            if i == last_index {
                self.close(&mut pos, ExitReason::terminal_rung(i), target, bar.close_time);
                return Evaluation {
                    position: pos,
                    partial_credits,
                };
            }

            if !pos.partial_credited(i) {
                pos.partial_credits_applied.push(i);
                partial_credits.push(PartialCredit {
                    index: i,
                    price: target,
                    reason: ExitReason::partial_rung(i),
                });
            }

            if i + 1 >= self.config.trailing_activation_index {
                pos.trailing.enabled = true;
            }
        }

        // 3. Trailing ratchet: initialize or tighten, never loosen.
        if pos.trailing.enabled {
            if let Some(atr) = atr {
                if atr.is_finite() && atr > 0.0 {
                    pos.trailing.gap = atr * self.config.trailing_gap_atr;
                } else {
                    warn!(
                        symbol = %pos.symbol,
                        atr,
                        "Invalid refreshed ATR, keeping previous trailing gap"
                    );
                }
            }

            let candidate = if is_long {
                favorable - pos.trailing.gap
            } else {
                favorable + pos.trailing.gap
            };

            match pos.trailing.level {
                None => {
                    pos.trailing.level = Some(candidate);
                    pos.trailing.triggered_once = true;
                }
                Some(level) => {
                    let more_favorable = if is_long {
                        candidate > level
                    } else {
                        candidate < level
                    };
                    if more_favorable {
                        pos.trailing.level = Some(candidate);
                    }
                }
            }

            if let Some(level) = pos.trailing.level {
                let trail_hit = if is_long {
                    adverse <= level - buffer
                } else {
                    adverse >= level + buffer
                };
                if trail_hit {
                    self.close(&mut pos, ExitReason::TrailingSl, level, bar.close_time);
                }
            }
        }

        Evaluation {
            position: pos,
            partial_credits,
        }
    }

    fn ladder_well_formed(pos: &Position) -> bool {
        if pos.target_levels.len() != 3 {
            return false;
        }
        if pos.target_levels.iter().any(|t| !t.is_finite()) {
            return false;
        }
        // Strictly increasing in favorable distance from entry.
        pos.target_levels.windows(2).all(|pair| {
            if pos.side.is_long() {
                pair[0] < pair[1]
            } else {
                pair[0] > pair[1]
            }
        })
    }

    fn close(&self, pos: &mut Position, reason: ExitReason, price: f64, ts: i64) {
        pos.status = PositionStatus::Closed;
        pos.exit_reason = Some(reason);
        pos.exit_price = Some(price);
        pos.realized_pnl_pct = Some(pnl_pct(
            pos.entry_price,
            price,
            pos.side,
            self.config.leverage,
        ));
        pos.closed_at = Some(ts.max(pos.opened_at));
    }
}
