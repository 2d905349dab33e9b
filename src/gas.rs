//! Per-chain gas price forecasting
//!
//! Keeps a ring of recent gas samples per chain, fits an ordinary
//! least-squares slope to classify the trend, and predicts the next-block
//! price. Predictions saturate at the chain's configured ceiling.

use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};

use crate::types::ChainId;

/// Ring capacity per chain (>= 20 samples for a full-confidence fit)
const WINDOW_CAPACITY: usize = 60;

/// Slope threshold per block, as a fraction of the window mean
const TREND_THRESHOLD: f64 = 0.05;

/// Gas price trend over the sample window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasTrend {
    RisingFast,
    Stable,
    DroppingFast,
}

/// Gas volatility band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasVolatility {
    Low,
    Medium,
    High,
}

/// Forecast for the next block
#[derive(Debug, Clone, Copy)]
pub struct GasForecast {
    pub trend: GasTrend,
    /// Predicted next-block gas price in wei, saturated at the chain ceiling
    pub predicted_wei: u128,
    pub volatility: GasVolatility,
    /// True when the scanner should defer dispatch by one tick
    pub wait_advisory: bool,
}

#[derive(Debug, Clone, Copy)]
struct GasSample {
    price_wei: u128,
    #[allow(dead_code)]
    block_ts: u64,
}

#[derive(Debug, Default)]
struct GasWindow {
    samples: VecDeque<GasSample>,
}

/// Sliding-history gas forecaster, one window per chain
pub struct GasForecaster {
    windows: DashMap<ChainId, GasWindow>,
    ceilings: HashMap<ChainId, u128>,
}

impl GasForecaster {
    pub fn new(ceilings: HashMap<ChainId, u128>) -> Self {
        Self {
            windows: DashMap::new(),
            ceilings,
        }
    }

    /// Record an observed gas price for a chain
    pub fn observe(&self, chain_id: ChainId, gas_price_wei: u128, block_ts: u64) {
        let mut window = self.windows.entry(chain_id).or_default();
        if window.samples.len() >= WINDOW_CAPACITY {
            window.samples.pop_front();
        }
        window.samples.push_back(GasSample {
            price_wei: gas_price_wei,
            block_ts,
        });
    }

    /// Latest observed gas price
    pub fn current(&self, chain_id: ChainId) -> Option<u128> {
        self.windows
            .get(&chain_id)
            .and_then(|w| w.samples.back().map(|s| s.price_wei))
    }

    /// Forecast the next block; None until any sample exists
    pub fn predict(&self, chain_id: ChainId) -> Option<GasForecast> {
        let window = self.windows.get(&chain_id)?;
        let samples = &window.samples;
        let last = samples.back()?.price_wei;
        let ceiling = self.ceilings.get(&chain_id).copied().unwrap_or(u128::MAX);

        if samples.len() < 5 {
            // Too little history to regress; report the last price unchanged
            return Some(GasForecast {
                trend: GasTrend::Stable,
                predicted_wei: last.min(ceiling),
                volatility: GasVolatility::Low,
                wait_advisory: false,
            });
        }

        let prices: Vec<f64> = samples.iter().map(|s| s.price_wei as f64).collect();
        let n = prices.len() as f64;
        let mean = prices.iter().sum::<f64>() / n;

        // OLS slope of price against sample index (one index step = one block)
        let mean_x = (n - 1.0) / 2.0;
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, p) in prices.iter().enumerate() {
            let dx = i as f64 - mean_x;
            num += dx * (p - mean);
            den += dx * dx;
        }
        let slope = if den > 0.0 { num / den } else { 0.0 };
        let slope_frac = if mean > 0.0 { slope / mean } else { 0.0 };

        let trend = if slope_frac > TREND_THRESHOLD {
            GasTrend::RisingFast
        } else if slope_frac < -TREND_THRESHOLD {
            GasTrend::DroppingFast
        } else {
            GasTrend::Stable
        };

        let var = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        let cv = if mean > 0.0 { var.sqrt() / mean } else { 0.0 };
        let volatility = if cv < 0.1 {
            GasVolatility::Low
        } else if cv < 0.3 {
            GasVolatility::Medium
        } else {
            GasVolatility::High
        };

        let predicted = (last as f64 + slope).max(0.0) as u128;
        let predicted_wei = predicted.min(ceiling);

        let wait_advisory = trend == GasTrend::RisingFast && last > percentile_75(&prices) as u128;

        Some(GasForecast {
            trend,
            predicted_wei,
            volatility,
            wait_advisory,
        })
    }
}

fn percentile_75(prices: &[f64]) -> f64 {
    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() as f64) * 0.75).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    const GWEI: u128 = 1_000_000_000;

    fn forecaster(ceiling: u128) -> GasForecaster {
        let mut ceilings = HashMap::new();
        ceilings.insert(137, ceiling);
        GasForecaster::new(ceilings)
    }

    #[test]
    fn no_samples_no_forecast() {
        let f = forecaster(200 * GWEI);
        assert!(f.predict(137).is_none());
    }

    #[test]
    fn few_samples_report_last_stable() {
        let f = forecaster(200 * GWEI);
        f.observe(137, 30 * GWEI, 1);
        f.observe(137, 31 * GWEI, 2);
        let fc = f.predict(137).unwrap();
        assert_eq!(fc.trend, GasTrend::Stable);
        assert_eq!(fc.predicted_wei, 31 * GWEI);
    }

    #[test]
    fn rising_fast_detected() {
        let f = forecaster(10_000 * GWEI);
        // +10% per block
        let mut price = 100.0;
        for i in 0..20u64 {
            f.observe(137, (price * GWEI as f64) as u128, i);
            price *= 1.10;
        }
        let fc = f.predict(137).unwrap();
        assert_eq!(fc.trend, GasTrend::RisingFast);
        // latest is at the top of the window -> above p75 -> defer
        assert!(fc.wait_advisory);
    }

    #[test]
    fn dropping_fast_detected() {
        let f = forecaster(10_000 * GWEI);
        let mut price = 1000.0;
        for i in 0..20u64 {
            f.observe(137, (price * GWEI as f64) as u128, i);
            price *= 0.90;
        }
        let fc = f.predict(137).unwrap();
        assert_eq!(fc.trend, GasTrend::DroppingFast);
        assert!(!fc.wait_advisory);
    }

    #[test]
    fn flat_series_is_stable() {
        let f = forecaster(10_000 * GWEI);
        for i in 0..30u64 {
            f.observe(137, 50 * GWEI, i);
        }
        let fc = f.predict(137).unwrap();
        assert_eq!(fc.trend, GasTrend::Stable);
        assert_eq!(fc.predicted_wei, 50 * GWEI);
        assert_eq!(fc.volatility, GasVolatility::Low);
        assert!(!fc.wait_advisory);
    }

    #[test]
    fn prediction_saturates_at_ceiling() {
        let f = forecaster(200 * GWEI);
        let mut price = 150.0;
        for i in 0..20u64 {
            f.observe(137, (price * GWEI as f64) as u128, i);
            price *= 1.15;
        }
        let fc = f.predict(137).unwrap();
        assert_eq!(fc.predicted_wei, 200 * GWEI);
    }

    #[test]
    fn window_is_bounded() {
        let f = forecaster(u128::MAX);
        for i in 0..200u64 {
            f.observe(137, (i as u128 + 1) * GWEI, i);
        }
        let w = f.windows.get(&137).unwrap();
        assert_eq!(w.samples.len(), WINDOW_CAPACITY);
    }
}
