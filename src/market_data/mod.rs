//! Market data collaborator
//!
//! Fetches the latest closed candle per symbol and an ATR volatility reading
//! from the Binance klines REST endpoint. The last good ATR is cached per
//! symbol so a failed refresh can degrade to a stale reading, explicitly
//! marked as fallback.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::types::Bar;

pub const BINANCE_REST_URL: &str = "https://api.binance.com/api/v3/klines";

/// ATR reading handed to the engine. `fallback` marks a cached value served
/// because the refresh failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtrReading {
    pub value: f64,
    pub fallback: bool,
}

/// One bar per symbol per cycle, plus a volatility measure recomputed at
/// least once per cycle.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// The most recent fully closed candle for a symbol.
    async fn latest_bar(&self, symbol: &str) -> Result<Bar>;

    /// Current ATR for a symbol. Implementations may serve a cached value
    /// when the refresh fails, marked `fallback = true`.
    async fn volatility(&self, symbol: &str) -> Result<AtrReading>;
}

/// Configuration for the Binance REST client.
#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub rest_url: String,
    /// Candle interval (Binance notation: 1m, 5m, 15m, ...)
    pub interval: String,
    /// ATR smoothing window
    pub atr_period: usize,
    pub request_timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            rest_url: BINANCE_REST_URL.to_string(),
            interval: "1m".to_string(),
            atr_period: 21,
            request_timeout_secs: 5,
        }
    }
}

/// REST-polling Binance market data source.
pub struct BinanceMarketData {
    config: MarketDataConfig,
    client: reqwest::Client,
    /// Last good ATR per symbol, for stale fallback
    last_atr: RwLock<HashMap<String, f64>>,
}

impl BinanceMarketData {
    pub fn new(config: MarketDataConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            config,
            client,
            last_atr: RwLock::new(HashMap::new()),
        })
    }

    async fn fetch_klines(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>> {
        let url = format!(
            "{}?symbol={}&interval={}&limit={}",
            self.config.rest_url, symbol, self.config.interval, limit
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch klines for {}", symbol))?;

        if !response.status().is_success() {
            bail!("Binance API returned error: {}", response.status());
        }

        // Response: array of arrays
        // [[open_time, open, high, low, close, volume, close_time, ...], ...]
        let klines: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .context("Failed to parse Binance klines response")?;

        let bars: Vec<Bar> = klines
            .into_iter()
            .filter_map(|kline| {
                if kline.len() < 7 {
                    return None;
                }
                let open_time = kline[0].as_i64()?;
                let open: f64 = kline[1].as_str()?.parse().ok()?;
                let high: f64 = kline[2].as_str()?.parse().ok()?;
                let low: f64 = kline[3].as_str()?.parse().ok()?;
                let close: f64 = kline[4].as_str()?.parse().ok()?;
                let volume: f64 = kline[5].as_str()?.parse().ok()?;
                let close_time = kline[6].as_i64()?;

                Some(Bar {
                    open_time,
                    close_time,
                    symbol: symbol.to_string(),
                    open,
                    high,
                    low,
                    close,
                    volume,
                })
            })
            .collect();

        Ok(bars)
    }
}

#[async_trait]
impl MarketData for BinanceMarketData {
    async fn latest_bar(&self, symbol: &str) -> Result<Bar> {
        // Fetch the last 2 candles; the final one is still forming, so the
        // one before it is the most recent fully closed bar.
        let bars = self.fetch_klines(symbol, 2).await?;
        if bars.len() < 2 {
            bail!("Not enough candles returned for {}", symbol);
        }
        Ok(bars[bars.len() - 2].clone())
    }

    async fn volatility(&self, symbol: &str) -> Result<AtrReading> {
        let window = self.config.atr_period + 1;
        match self.fetch_klines(symbol, window).await {
            Ok(bars) => {
                let atr = average_true_range(&bars, self.config.atr_period)?;
                self.last_atr
                    .write()
                    .map_err(|_| anyhow::anyhow!("ATR cache lock poisoned"))?
                    .insert(symbol.to_string(), atr);
                info!(symbol = %symbol, atr, "📐 ATR refreshed");
                Ok(AtrReading {
                    value: atr,
                    fallback: false,
                })
            }
            Err(e) => {
                let cached = self
                    .last_atr
                    .read()
                    .ok()
                    .and_then(|map| map.get(symbol).copied());
                match cached {
                    Some(value) => {
                        warn!(symbol = %symbol, error = %e, atr = value, "ATR refresh failed, serving cached value");
                        Ok(AtrReading {
                            value,
                            fallback: true,
                        })
                    }
                    None => Err(e.context("ATR refresh failed with no cached fallback")),
                }
            }
        }
    }
}

/// ATR over the trailing `period` bars: mean of the true range
/// `max(high - low, |high - prev_close|, |low - prev_close|)`.
pub fn average_true_range(bars: &[Bar], period: usize) -> Result<f64> {
    if period == 0 {
        bail!("ATR period must be positive");
    }
    if bars.len() < period + 1 {
        bail!(
            "Not enough candles for ATR: have {}, need {}",
            bars.len(),
            period + 1
        );
    }

    let start = bars.len() - period;
    let mut sum = 0.0;
    for i in start..bars.len() {
        let prev_close = bars[i - 1].close;
        let tr = (bars[i].high - bars[i].low)
            .max((bars[i].high - prev_close).abs())
            .max((bars[i].low - prev_close).abs());
        sum += tr;
    }

    let atr = sum / period as f64;
    if !atr.is_finite() || atr <= 0.0 {
        bail!("Invalid ATR result: {}", atr);
    }
    Ok(atr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            open_time: ts,
            close_time: ts + 60_000,
            symbol: "BTCUSDT".to_string(),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn atr_is_mean_true_range() {
        // Three bars after the seed; each has a 2.0 high-low range and no
        // gaps, so ATR(3) = 2.0.
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 100.0, 101.0, 99.0, 100.0),
            bar(2, 100.0, 101.0, 99.0, 100.0),
            bar(3, 100.0, 101.0, 99.0, 100.0),
        ];
        let atr = average_true_range(&bars, 3).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn atr_accounts_for_gaps() {
        // Second bar gaps up: TR = max(1.0, |111-100|, |110-100|) = 11.0.
        let bars = vec![
            bar(0, 100.0, 100.5, 99.5, 100.0),
            bar(1, 110.0, 111.0, 110.0, 110.5),
        ];
        let atr = average_true_range(&bars, 1).unwrap();
        assert!((atr - 11.0).abs() < 1e-9);
    }

    #[test]
    fn atr_requires_enough_candles() {
        let bars = vec![bar(0, 100.0, 101.0, 99.0, 100.0)];
        assert!(average_true_range(&bars, 21).is_err());
        assert!(average_true_range(&bars, 0).is_err());
    }

    #[test]
    fn flat_market_atr_is_rejected() {
        // Zero range everywhere yields ATR 0, which cannot seed a ladder.
        let bars = vec![
            bar(0, 100.0, 100.0, 100.0, 100.0),
            bar(1, 100.0, 100.0, 100.0, 100.0),
        ];
        assert!(average_true_range(&bars, 1).is_err());
    }
}
