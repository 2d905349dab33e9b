//! Time-weighted average price accumulator with manipulation filtering
//!
//! Keeps a bounded sliding window of price samples per token pair. TWAP is
//! the time-weighted mean over the in-window samples; volatility (sigma/mu)
//! classifies pair stability and feeds edge exclusion in the routing graph.

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::error::TwapError;
use crate::types::{u256_to_f64, ChainId};

/// Default ring capacity per pair
pub const DEFAULT_CAPACITY: usize = 100;

/// Default maximum window age in milliseconds
pub const DEFAULT_MAX_AGE_MS: u64 = 30_000;

/// Minimum in-window samples before twap() returns a value
const MIN_SAMPLES: usize = 3;

/// Directed token pair on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub chain_id: ChainId,
    pub base: Address,
    pub quote: Address,
}

/// One observed price point, 18-decimal fixed
#[derive(Debug, Clone, Copy)]
struct PriceSample {
    value: U256,
    ts_ms: u64,
}

#[derive(Debug, Default)]
struct PairWindow {
    samples: VecDeque<PriceSample>,
}

/// Pair volatility classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable,
    Moderate,
    Unstable,
}

impl Stability {
    pub fn classify(volatility: f32) -> Self {
        if volatility < 0.3 {
            Stability::Stable
        } else if volatility <= 0.5 {
            Stability::Moderate
        } else {
            Stability::Unstable
        }
    }
}

/// Sliding-window TWAP store, per-pair fine-grained locking via the shard map
pub struct TwapAccumulator {
    windows: DashMap<PairKey, PairWindow>,
    capacity: usize,
    max_age_ms: u64,
}

impl Default for TwapAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MAX_AGE_MS)
    }
}

impl TwapAccumulator {
    pub fn new(capacity: usize, max_age_ms: u64) -> Self {
        Self {
            windows: DashMap::new(),
            capacity: capacity.max(MIN_SAMPLES),
            max_age_ms,
        }
    }

    /// Record a price observation; timestamps must be strictly increasing per pair
    pub fn observe(&self, pair: PairKey, value: U256, ts_ms: u64) -> Result<(), TwapError> {
        if value.is_zero() {
            return Err(TwapError::ZeroValue);
        }
        let mut window = self.windows.entry(pair).or_default();
        if let Some(last) = window.samples.back() {
            if ts_ms <= last.ts_ms {
                return Err(TwapError::NonMonotonicTimestamp);
            }
        }
        if window.samples.len() >= self.capacity {
            window.samples.pop_front();
        }
        window.samples.push_back(PriceSample { value, ts_ms });
        self.evict_expired(&mut window, ts_ms);
        Ok(())
    }

    /// Time-weighted average at `now_ms`, or None below 3 in-window samples
    /// or when the newest sample is older than the window
    pub fn twap_at(&self, pair: &PairKey, now_ms: u64) -> Option<U256> {
        let mut window = self.windows.get_mut(pair)?;
        self.evict_expired(&mut window, now_ms);

        let samples = &window.samples;
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        let newest = samples.back()?.ts_ms;
        if now_ms.saturating_sub(newest) > self.max_age_ms {
            return None;
        }

        // Each sample is weighted by the time it was the latest observation
        let mut weighted = U256::ZERO;
        let mut total_dt = U256::ZERO;
        for i in 1..samples.len() {
            let dt = samples[i].ts_ms - samples[i - 1].ts_ms;
            weighted += samples[i].value * U256::from(dt);
            total_dt += U256::from(dt);
        }
        if total_dt.is_zero() {
            return None;
        }
        Some(weighted / total_dt)
    }

    /// TWAP relative to the latest observation (no external clock)
    pub fn twap(&self, pair: &PairKey) -> Option<U256> {
        let newest = self.windows.get(pair)?.samples.back()?.ts_ms;
        self.twap_at(pair, newest)
    }

    /// Coefficient of variation (sigma/mu) over the in-window samples
    pub fn volatility(&self, pair: &PairKey) -> f32 {
        let window = match self.windows.get(pair) {
            Some(w) => w,
            None => return 0.0,
        };
        let n = window.samples.len();
        if n < 2 {
            return 0.0;
        }
        let values: Vec<f64> = window.samples.iter().map(|s| u256_to_f64(s.value)).collect();
        let mean = values.iter().sum::<f64>() / n as f64;
        if mean <= 0.0 {
            return 0.0;
        }
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        (var.sqrt() / mean) as f32
    }

    pub fn stability(&self, pair: &PairKey) -> Stability {
        Stability::classify(self.volatility(pair))
    }

    /// Whether a pair may participate in routing. Pool-state refreshes use
    /// this to set the edge exclusion flag.
    pub fn exec_allowed(&self, pair: &PairKey, max_vol_for_exec: f32) -> bool {
        self.volatility(pair) <= max_vol_for_exec
    }

    /// In-window sample count
    pub fn sample_count(&self, pair: &PairKey) -> usize {
        self.windows.get(pair).map(|w| w.samples.len()).unwrap_or(0)
    }

    fn evict_expired(&self, window: &mut PairWindow, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.max_age_ms);
        while let Some(front) = window.samples.front() {
            if front.ts_ms < cutoff {
                window.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn pair() -> PairKey {
        PairKey {
            chain_id: 137,
            base: address!("0000000000000000000000000000000000000001"),
            quote: address!("0000000000000000000000000000000000000002"),
        }
    }

    fn fixed(v: u64) -> U256 {
        U256::from(v) * U256::from(10u64).pow(U256::from(15u64))
    }

    #[test]
    fn none_until_three_samples() {
        let acc = TwapAccumulator::default();
        let p = pair();
        assert!(acc.twap(&p).is_none());
        acc.observe(p, fixed(500), 1000).unwrap();
        assert!(acc.twap(&p).is_none());
        acc.observe(p, fixed(500), 2000).unwrap();
        assert!(acc.twap(&p).is_none());
        acc.observe(p, fixed(500), 3000).unwrap();
        assert!(acc.twap(&p).is_some());
    }

    #[test]
    fn rejects_out_of_order() {
        let acc = TwapAccumulator::default();
        let p = pair();
        acc.observe(p, fixed(1), 2000).unwrap();
        assert_eq!(
            acc.observe(p, fixed(1), 2000),
            Err(TwapError::NonMonotonicTimestamp)
        );
        assert_eq!(
            acc.observe(p, fixed(1), 1999),
            Err(TwapError::NonMonotonicTimestamp)
        );
    }

    #[test]
    fn rejects_zero_value() {
        let acc = TwapAccumulator::default();
        assert_eq!(acc.observe(pair(), U256::ZERO, 1), Err(TwapError::ZeroValue));
    }

    #[test]
    fn time_weighting_favors_longer_intervals() {
        let acc = TwapAccumulator::default();
        let p = pair();
        // 100 held for 1ms, then 200 held for 9ms
        acc.observe(p, fixed(50), 0).unwrap();
        acc.observe(p, fixed(100), 1).unwrap();
        acc.observe(p, fixed(200), 10).unwrap();
        let twap = acc.twap(&p).unwrap();
        // (100*1 + 200*9) / 10 = 190
        assert_eq!(twap, fixed(190));
    }

    #[test]
    fn stale_window_returns_none() {
        let acc = TwapAccumulator::new(10, 30_000);
        let p = pair();
        acc.observe(p, fixed(100), 1000).unwrap();
        acc.observe(p, fixed(100), 2000).unwrap();
        acc.observe(p, fixed(100), 3000).unwrap();
        assert!(acc.twap_at(&p, 10_000).is_some());
        assert!(acc.twap_at(&p, 40_000).is_none());
    }

    #[test]
    fn eviction_bounds_window() {
        let acc = TwapAccumulator::new(4, 1_000_000);
        let p = pair();
        for i in 0..10u64 {
            acc.observe(p, fixed(100 + i), i * 100).unwrap();
        }
        assert_eq!(acc.sample_count(&p), 4);
    }

    #[test]
    fn volatility_classification() {
        assert_eq!(Stability::classify(0.1), Stability::Stable);
        assert_eq!(Stability::classify(0.4), Stability::Moderate);
        assert_eq!(Stability::classify(0.7), Stability::Unstable);

        let acc = TwapAccumulator::default();
        let p = pair();
        acc.observe(p, fixed(100), 1).unwrap();
        acc.observe(p, fixed(101), 2).unwrap();
        acc.observe(p, fixed(99), 3).unwrap();
        assert!(acc.volatility(&p) < 0.3);
        assert_eq!(acc.stability(&p), Stability::Stable);
        assert!(acc.exec_allowed(&p, 0.5));
    }

    #[test]
    fn unstable_pair_excluded_from_execution() {
        let acc = TwapAccumulator::default();
        let p = pair();
        acc.observe(p, fixed(100), 1).unwrap();
        acc.observe(p, fixed(400), 2).unwrap();
        acc.observe(p, fixed(50), 3).unwrap();
        assert!(acc.volatility(&p) > 0.5);
        assert!(!acc.exec_allowed(&p, 0.5));
    }
}
