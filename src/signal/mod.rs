//! Entry-signal source
//!
//! The engine only decides what happens after a position exists; whether to
//! open one at all is this collaborator's call. The default implementation
//! is a simple trend-plus-volatility gate over the latest closed bar.

use tracing::debug;

use crate::types::{Bar, Side, Signal};

/// Decides whether a symbol is eligible for entry this cycle.
pub trait SignalSource: Send + Sync {
    fn generate(&self, symbol: &str, bar: &Bar) -> Option<Signal>;
}

#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Minimum |close - open| / open to call a direction
    pub min_trend_strength: f64,
    /// Minimum (high - low) / open per candle
    pub min_volatility: f64,
    pub strategy_name: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_trend_strength: 0.0001,
            min_volatility: 0.0003,
            strategy_name: "SmartTrendStrategy".to_string(),
        }
    }
}

/// Trend/volatility threshold heuristic: the candle body direction picks the
/// side, its magnitude is the confidence.
#[derive(Debug, Clone, Default)]
pub struct TrendVolatilitySignal {
    config: SignalConfig,
}

impl TrendVolatilitySignal {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }
}

impl SignalSource for TrendVolatilitySignal {
    fn generate(&self, symbol: &str, bar: &Bar) -> Option<Signal> {
        if !bar.prices_finite() || bar.open <= 0.0 {
            debug!(symbol = %symbol, "Skipping signal: invalid bar data");
            return None;
        }

        let trend_strength = (bar.close - bar.open) / bar.open;
        let volatility = (bar.high - bar.low) / bar.open;

        if trend_strength.abs() < self.config.min_trend_strength
            || volatility < self.config.min_volatility
        {
            return None;
        }

        let side = if trend_strength > 0.0 {
            Side::Long
        } else {
            Side::Short
        };

        Some(Signal {
            symbol: symbol.to_string(),
            side,
            confidence: trend_strength.abs(),
            strategy: self.config.strategy_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            open_time: 0,
            close_time: 60_000,
            symbol: "BTCUSDT".to_string(),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn source() -> TrendVolatilitySignal {
        TrendVolatilitySignal::new(SignalConfig {
            min_trend_strength: 0.001,
            min_volatility: 0.002,
            ..SignalConfig::default()
        })
    }

    #[test]
    fn upward_body_yields_long() {
        let signal = source()
            .generate("BTCUSDT", &bar(100.0, 100.6, 99.9, 100.5))
            .unwrap();
        assert_eq!(signal.side, Side::Long);
        assert!((signal.confidence - 0.005).abs() < 1e-9);
        assert_eq!(signal.symbol, "BTCUSDT");
    }

    #[test]
    fn downward_body_yields_short() {
        let signal = source()
            .generate("BTCUSDT", &bar(100.0, 100.1, 99.4, 99.5))
            .unwrap();
        assert_eq!(signal.side, Side::Short);
    }

    #[test]
    fn weak_trend_is_filtered() {
        assert!(source()
            .generate("BTCUSDT", &bar(100.0, 100.3, 99.7, 100.05))
            .is_none());
    }

    #[test]
    fn low_volatility_is_filtered() {
        // Strong body but total range under the volatility floor.
        assert!(source()
            .generate("BTCUSDT", &bar(100.0, 100.15, 100.0, 100.15))
            .is_none());
    }

    #[test]
    fn invalid_bar_is_filtered() {
        assert!(source()
            .generate("BTCUSDT", &bar(f64::NAN, 100.6, 99.9, 100.5))
            .is_none());
    }
}
