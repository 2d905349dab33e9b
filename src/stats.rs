//! Engine counters for the error taxonomy and dispatch outcomes
//!
//! Nothing is silently swallowed: every skipped route, rejection, and
//! overrun lands in a counter keyed by its stable discriminator. The
//! snapshot is what operators export; the engine itself never aborts on
//! a counted error.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counter block
#[derive(Default)]
pub struct EngineStats {
    /// Errors by stable kind (quote errors, rejections, sizer aborts)
    by_kind: DashMap<&'static str, AtomicU64>,
    ticks_completed: AtomicU64,
    tick_overruns: AtomicU64,
    routes_evaluated: AtomicU64,
    route_panics: AtomicU64,
    intents_published: AtomicU64,
    intents_spooled: AtomicU64,
    intents_suppressed: AtomicU64,
    dispatch_deferred: AtomicU64,
    scanner_cooldowns: AtomicU64,
    gas_wait_deferrals: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an error or rejection by its stable discriminator
    pub fn record_kind(&self, kind: &'static str) {
        self.by_kind
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_completed(&self) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_overrun(&self) {
        self.tick_overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route_evaluated(&self) {
        self.routes_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route_panic(&self) {
        self.route_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.intents_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spooled(&self) {
        self.intents_spooled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.intents_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.dispatch_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scanner_cooldown(&self) {
        self.scanner_cooldowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gas_wait(&self) {
        self.gas_wait_deferrals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn kind_count(&self, kind: &str) -> u64 {
        self.by_kind
            .get(kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn tick_overruns(&self) -> u64 {
        self.tick_overruns.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            by_kind: self
                .by_kind
                .iter()
                .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
                .collect(),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            tick_overruns: self.tick_overruns.load(Ordering::Relaxed),
            routes_evaluated: self.routes_evaluated.load(Ordering::Relaxed),
            route_panics: self.route_panics.load(Ordering::Relaxed),
            intents_published: self.intents_published.load(Ordering::Relaxed),
            intents_spooled: self.intents_spooled.load(Ordering::Relaxed),
            intents_suppressed: self.intents_suppressed.load(Ordering::Relaxed),
            dispatch_deferred: self.dispatch_deferred.load(Ordering::Relaxed),
            scanner_cooldowns: self.scanner_cooldowns.load(Ordering::Relaxed),
            gas_wait_deferrals: self.gas_wait_deferrals.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view for export
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub by_kind: BTreeMap<String, u64>,
    pub ticks_completed: u64,
    pub tick_overruns: u64,
    pub routes_evaluated: u64,
    pub route_panics: u64,
    pub intents_published: u64,
    pub intents_spooled: u64,
    pub intents_suppressed: u64,
    pub dispatch_deferred: u64,
    pub scanner_cooldowns: u64,
    pub gas_wait_deferrals: u64,
}
