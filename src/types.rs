//! Core types used throughout ladderbot
//!
//! Defines the shared data structures for bars, signals, and exit reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn is_long(&self) -> bool {
        matches!(self, Side::Long)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// One closed OHLCV candle for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    /// Open time (start of interval, milliseconds)
    pub open_time: i64,
    /// Close time (end of interval, milliseconds)
    pub close_time: i64,
    /// Symbol this bar belongs to (e.g. "BTCUSDT")
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// All four price fields are finite numbers.
    pub fn prices_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
    }
}

/// Entry signal produced by a signal source.
///
/// The engine never re-validates trading logic here, only structural
/// validity (side, positive volatility) is checked downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    /// Trend strength behind the call (0.0+)
    pub confidence: f64,
    /// Strategy that produced this signal
    pub strategy: String,
}

/// Position lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position closed, or which rung a partial credit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Hard stop-loss
    Sl,
    Tp1,
    Tp2,
    /// Final rung, terminal
    Tp3,
    TrailingSl,
    /// Non-terminal rung credit, position stays open
    PartialTp1,
    PartialTp2,
    /// Structural corruption, defensive terminal state
    Error,
}

impl ExitReason {
    /// Label for the final rung of an N-level ladder.
    pub fn terminal_rung(index: usize) -> Self {
        match index {
            0 => ExitReason::Tp1,
            1 => ExitReason::Tp2,
            _ => ExitReason::Tp3,
        }
    }

    /// Partial-credit label for a non-terminal rung index.
    pub fn partial_rung(index: usize) -> Self {
        match index {
            0 => ExitReason::PartialTp1,
            _ => ExitReason::PartialTp2,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Sl => write!(f, "SL"),
            ExitReason::Tp1 => write!(f, "TP1"),
            ExitReason::Tp2 => write!(f, "TP2"),
            ExitReason::Tp3 => write!(f, "TP3"),
            ExitReason::TrailingSl => write!(f, "TrailingSL"),
            ExitReason::PartialTp1 => write!(f, "PartialTP1"),
            ExitReason::PartialTp2 => write!(f, "PartialTP2"),
            ExitReason::Error => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_reason_display_matches_journal_labels() {
        assert_eq!(ExitReason::Sl.to_string(), "SL");
        assert_eq!(ExitReason::TrailingSl.to_string(), "TrailingSL");
        assert_eq!(ExitReason::PartialTp2.to_string(), "PartialTP2");
    }

    #[test]
    fn bar_finiteness_check() {
        let mut bar = Bar {
            open_time: 0,
            close_time: 60_000,
            symbol: "BTCUSDT".to_string(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1.0,
        };
        assert!(bar.prices_finite());
        bar.low = f64::NAN;
        assert!(!bar.prices_finite());
    }
}
