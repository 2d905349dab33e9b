//! Admission control: circuit breaker, gas ceiling, backpressure,
//! duplicate suppression, and defense-in-depth re-verification
//!
//! Checks short-circuit in a fixed order. The breaker counts consecutive
//! non-recoverable execution failures from the feedback stream; when open
//! it rejects everything until the cooldown elapses, then allows exactly
//! one half-open probe.

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::RejectReason;
use crate::types::{ChainId, Clock, ExecutionFeedback, Opportunity};

/// Backoff cap after repeated half-open failures
const MAX_BACKOFF_MS: u64 = 15 * 60 * 1000;

/// Gate decision, short-circuit ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    Admit,
    /// Breaker is open: reject all
    BreakerOpen,
    /// Predicted gas above the chain ceiling
    GasCeilingExceeded,
    /// Chain already at max concurrent intents; retry next tick
    BackpressureDefer,
    /// Another half-open probe is already in flight; retry next tick
    HalfOpenBusy,
    /// Fingerprint emitted within the cooldown window
    DuplicateSuppressed,
    /// Defense-in-depth re-verification failed
    Reverify(RejectReason),
}

impl AdmitDecision {
    pub fn is_admitted(&self) -> bool {
        *self == AdmitDecision::Admit
    }

    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            AdmitDecision::BackpressureDefer | AdmitDecision::HalfOpenBusy
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AdmitDecision::Admit => "admit",
            AdmitDecision::BreakerOpen => "breaker_open",
            AdmitDecision::GasCeilingExceeded => "gas_ceiling_exceeded",
            AdmitDecision::BackpressureDefer => "backpressure_defer",
            AdmitDecision::HalfOpenBusy => "half_open_busy",
            AdmitDecision::DuplicateSuppressed => "duplicate_suppressed",
            AdmitDecision::Reverify(r) => r.kind(),
        }
    }
}

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at_ms: u64,
    backoff_ms: u64,
    probe_claimed: bool,
}

/// Breaker configuration
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub max_consecutive_failures: u32,
    pub cooldown_ms: u64,
}

/// Consecutive-failure circuit breaker with half-open probing
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    consecutive_failures: AtomicU32,
    cfg: BreakerConfig,
    clock: Arc<dyn Clock>,
}

enum BreakerGate {
    Pass { probe: bool },
    Open,
    ProbeBusy,
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at_ms: 0,
                backoff_ms: cfg.cooldown_ms,
                probe_claimed: false,
            }),
            consecutive_failures: AtomicU32::new(0),
            cfg,
            clock,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn try_admit(&self) -> BreakerGate {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => BreakerGate::Pass { probe: false },
            CircuitState::Open => {
                let now = self.clock.now_ms();
                if now.saturating_sub(inner.opened_at_ms) >= inner.backoff_ms {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_claimed = true;
                    info!("circuit breaker half-open, admitting one probe");
                    BreakerGate::Pass { probe: true }
                } else {
                    BreakerGate::Open
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_claimed {
                    BreakerGate::ProbeBusy
                } else {
                    inner.probe_claimed = true;
                    BreakerGate::Pass { probe: true }
                }
            }
        }
    }

    /// Return an unused half-open probe claim (downstream check rejected)
    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_claimed = false;
        }
    }

    /// Non-recoverable execution failure from feedback
    pub fn record_failure(&self) {
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed: reopen with doubled backoff
                inner.state = CircuitState::Open;
                inner.opened_at_ms = self.clock.now_ms();
                inner.backoff_ms = (inner.backoff_ms * 2).min(MAX_BACKOFF_MS);
                inner.probe_claimed = false;
                warn!(backoff_ms = inner.backoff_ms, "half-open probe failed, breaker re-opened");
            }
            CircuitState::Closed if count >= self.cfg.max_consecutive_failures => {
                inner.state = CircuitState::Open;
                inner.opened_at_ms = self.clock.now_ms();
                inner.backoff_ms = self.cfg.cooldown_ms;
                warn!(count, "circuit breaker opened");
            }
            _ => {}
        }
    }

    /// Successful execution from feedback
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.backoff_ms = self.cfg.cooldown_ms;
            inner.probe_claimed = false;
            info!("half-open probe succeeded, circuit breaker closed");
        }
    }
}

/// Gate configuration
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub max_concurrent_intents_per_chain: u32,
    pub fingerprint_cooldown_ms: u64,
    pub gas_ceilings: HashMap<ChainId, u128>,
    pub max_impact_bps: u32,
    pub max_twap_dev_bps: u32,
    pub min_profit_usd: Decimal,
}

/// Admission gate in front of the intent bus
pub struct SafetyGate {
    breaker: CircuitBreaker,
    cfg: GateConfig,
    clock: Arc<dyn Clock>,
    /// fingerprint -> cooldown expiry
    cooldowns: Mutex<HashMap<u128, u64>>,
    /// inflight intent count per chain
    inflight: DashMap<ChainId, u32>,
    /// fingerprint -> chain, for releasing inflight slots on feedback
    inflight_by_fp: DashMap<u128, ChainId>,
}

impl SafetyGate {
    pub fn new(cfg: GateConfig, breaker_cfg: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breaker: CircuitBreaker::new(breaker_cfg, clock.clone()),
            cfg,
            clock,
            cooldowns: Mutex::new(HashMap::new()),
            inflight: DashMap::new(),
            inflight_by_fp: DashMap::new(),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Screen an opportunity; on Admit the fingerprint cooldown and the
    /// inflight slot are already registered
    pub fn admit(&self, opp: &Opportunity, predicted_gas_wei: u128) -> AdmitDecision {
        // 1. Breaker
        let probe = match self.breaker.try_admit() {
            BreakerGate::Open => return AdmitDecision::BreakerOpen,
            BreakerGate::ProbeBusy => return AdmitDecision::HalfOpenBusy,
            BreakerGate::Pass { probe } => probe,
        };

        let decision = self.admit_after_breaker(opp, predicted_gas_wei);
        if !decision.is_admitted() && probe {
            // Do not burn the single half-open slot on a local rejection
            self.breaker.release_probe();
        }
        decision
    }

    fn admit_after_breaker(&self, opp: &Opportunity, predicted_gas_wei: u128) -> AdmitDecision {
        // 2. Gas ceiling
        if let Some(ceiling) = self.cfg.gas_ceilings.get(&opp.chain_id) {
            if predicted_gas_wei > *ceiling {
                return AdmitDecision::GasCeilingExceeded;
            }
        }

        // 3. Backpressure
        let inflight = self.inflight.get(&opp.chain_id).map(|c| *c).unwrap_or(0);
        if inflight >= self.cfg.max_concurrent_intents_per_chain {
            return AdmitDecision::BackpressureDefer;
        }

        // 4. Fingerprint cooldown
        let now = self.clock.now_ms();
        {
            let mut cooldowns = self.cooldowns.lock();
            cooldowns.retain(|_, expires| *expires > now);
            if cooldowns.contains_key(&opp.fingerprint.0) {
                return AdmitDecision::DuplicateSuppressed;
            }
            cooldowns.insert(
                opp.fingerprint.0,
                now + self.cfg.fingerprint_cooldown_ms,
            );
        }

        // 5. Defense in depth: re-verify the profit-engine rules
        if opp.price_impact_bps > self.cfg.max_impact_bps {
            return AdmitDecision::Reverify(RejectReason::PriceImpactTooHigh);
        }
        if opp.twap_deviation_bps > self.cfg.max_twap_dev_bps {
            return AdmitDecision::Reverify(RejectReason::TwapDeviationTooHigh);
        }
        if opp.net_profit_usd < self.cfg.min_profit_usd {
            return AdmitDecision::Reverify(RejectReason::MinProfitBelowFloor);
        }

        *self.inflight.entry(opp.chain_id).or_insert(0) += 1;
        self.inflight_by_fp.insert(opp.fingerprint.0, opp.chain_id);
        AdmitDecision::Admit
    }

    /// Feed executor feedback into the breaker and release inflight slots
    pub fn on_feedback(&self, fb: &ExecutionFeedback) {
        if fb.outcome.is_failure() {
            self.breaker.record_failure();
        } else if fb.outcome.is_terminal() {
            self.breaker.record_success();
        }

        if let Some(fp) = fb.fingerprint_value() {
            if fb.outcome.is_terminal() {
                if let Some((_, chain)) = self.inflight_by_fp.remove(&fp.0) {
                    if let Some(mut count) = self.inflight.get_mut(&chain) {
                        *count = count.saturating_sub(1);
                    }
                }
                // Fingerprint record dies on feedback
                self.cooldowns.lock().remove(&fp.0);
            }
        }
    }

    pub fn inflight_count(&self, chain_id: ChainId) -> u32 {
        self.inflight.get(&chain_id).map(|c| *c).unwrap_or(0)
    }

    #[cfg(test)]
    fn forget_cooldown(&self, fp: crate::fingerprint::Fingerprint) {
        self.cooldowns.lock().remove(&fp.0);
    }
}
