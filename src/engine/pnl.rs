//! Signed percentage PnL for a simulated position.

use tracing::warn;

use crate::types::Side;

/// Signed percentage return for (entry, exit, side, leverage).
///
/// `((exit - entry) / entry) * 100 * leverage`, sign flipped for shorts.
/// Degenerate inputs (entry <= 0, non-finite values) yield 0.0 with a
/// diagnostic rather than propagating garbage into the journal.
pub fn pnl_pct(entry: f64, exit: f64, side: Side, leverage: f64) -> f64 {
    if entry <= 0.0 || !entry.is_finite() || !exit.is_finite() || !leverage.is_finite() {
        warn!(entry, exit, leverage, "Invalid PnL inputs, returning 0.0");
        return 0.0;
    }

    let raw = (exit - entry) / entry * 100.0 * leverage;
    if side.is_long() {
        raw
    } else {
        -raw
    }
}

/// Default sanity threshold: single-position returns beyond this are
/// reported as suspicious but never altered.
pub const SUSPICIOUS_PNL_PCT: f64 = 20.0;

pub fn is_suspicious(pnl_pct: f64, threshold: f64) -> bool {
    pnl_pct.abs() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_gain_is_positive() {
        assert!((pnl_pct(100.0, 110.0, Side::Long, 1.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn short_drop_is_positive() {
        assert!((pnl_pct(100.0, 90.0, Side::Short, 1.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn short_rally_is_negative() {
        assert!((pnl_pct(100.0, 110.0, Side::Short, 1.0) + 10.0).abs() < 1e-9);
    }

    #[test]
    fn leverage_scales_linearly() {
        assert!((pnl_pct(100.0, 110.0, Side::Long, 3.0) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_yield_zero() {
        assert_eq!(pnl_pct(0.0, 110.0, Side::Long, 1.0), 0.0);
        assert_eq!(pnl_pct(-5.0, 110.0, Side::Long, 1.0), 0.0);
        assert_eq!(pnl_pct(100.0, f64::NAN, Side::Long, 1.0), 0.0);
        assert_eq!(pnl_pct(100.0, f64::INFINITY, Side::Short, 1.0), 0.0);
    }

    #[test]
    fn suspicious_threshold_reports_not_corrects() {
        assert!(is_suspicious(25.0, SUSPICIOUS_PNL_PCT));
        assert!(is_suspicious(-21.0, SUSPICIOUS_PNL_PCT));
        assert!(!is_suspicious(19.9, SUSPICIOUS_PNL_PCT));
        // The value itself is still what the calculator produced.
        assert!((pnl_pct(100.0, 150.0, Side::Long, 1.0) - 50.0).abs() < 1e-9);
    }
}
