//! RPC endpoint health tracking and rotation
//!
//! Each chain gets a ring of providers (primary first). An endpoint is
//! circuit-broken after consecutive timeouts and the pool rotates to the
//! next one; a later success on the active endpoint resets its counter.
//! Scanners never die on endpoint exhaustion — the pool keeps handing out
//! the least-bad endpoint and the caller backs off.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Consecutive timeouts before an endpoint is rotated out
pub const TIMEOUTS_BEFORE_ROTATION: u32 = 5;

struct Endpoint<P> {
    provider: Arc<P>,
    label: String,
    consecutive_timeouts: AtomicU32,
}

/// Health-tracked provider ring for one chain
pub struct EndpointPool<P> {
    endpoints: Vec<Endpoint<P>>,
    active: AtomicUsize,
}

impl<P> EndpointPool<P> {
    /// Build a pool from providers; `labels` is used only for logging
    pub fn new(providers: Vec<Arc<P>>, labels: Vec<String>) -> Self {
        let endpoints = providers
            .into_iter()
            .enumerate()
            .map(|(i, provider)| Endpoint {
                provider,
                label: labels.get(i).cloned().unwrap_or_else(|| format!("rpc-{i}")),
                consecutive_timeouts: AtomicU32::new(0),
            })
            .collect();
        Self {
            endpoints,
            active: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Active provider and its index (for outcome reporting)
    pub fn provider(&self) -> Option<(usize, Arc<P>)> {
        if self.endpoints.is_empty() {
            return None;
        }
        let idx = self.active.load(Ordering::Relaxed) % self.endpoints.len();
        Some((idx, self.endpoints[idx].provider.clone()))
    }

    /// Record a successful call on an endpoint
    pub fn record_ok(&self, idx: usize) {
        if let Some(ep) = self.endpoints.get(idx) {
            ep.consecutive_timeouts.store(0, Ordering::Relaxed);
        }
    }

    /// Record a timeout; rotates to the next endpoint once the threshold trips
    pub fn record_timeout(&self, idx: usize) {
        let Some(ep) = self.endpoints.get(idx) else {
            return;
        };
        let count = ep.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= TIMEOUTS_BEFORE_ROTATION && self.endpoints.len() > 1 {
            let next = (idx + 1) % self.endpoints.len();
            // Only rotate if this endpoint is still the active one
            if self
                .active
                .compare_exchange(idx, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                ep.consecutive_timeouts.store(0, Ordering::Relaxed);
                warn!(
                    from = %ep.label,
                    to = %self.endpoints[next].label,
                    "rpc endpoint circuit-broken after {count} consecutive timeouts, rotating"
                );
            }
        }
    }

    /// True when any endpoint is within its timeout budget
    pub fn any_healthy(&self) -> bool {
        self.endpoints
            .iter()
            .any(|e| e.consecutive_timeouts.load(Ordering::Relaxed) < TIMEOUTS_BEFORE_ROTATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> EndpointPool<u32> {
        let providers = (0..n).map(|i| Arc::new(i as u32)).collect();
        let labels = (0..n).map(|i| format!("ep{i}")).collect();
        EndpointPool::new(providers, labels)
    }

    #[test]
    fn rotates_after_threshold() {
        let p = pool(2);
        let (idx, _) = p.provider().unwrap();
        assert_eq!(idx, 0);
        for _ in 0..TIMEOUTS_BEFORE_ROTATION {
            p.record_timeout(0);
        }
        let (idx, provider) = p.provider().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(*provider, 1);
    }

    #[test]
    fn success_resets_counter() {
        let p = pool(2);
        for _ in 0..TIMEOUTS_BEFORE_ROTATION - 1 {
            p.record_timeout(0);
        }
        p.record_ok(0);
        for _ in 0..TIMEOUTS_BEFORE_ROTATION - 1 {
            p.record_timeout(0);
        }
        let (idx, _) = p.provider().unwrap();
        assert_eq!(idx, 0, "reset counter must not rotate");
    }

    #[test]
    fn single_endpoint_never_rotates() {
        let p = pool(1);
        for _ in 0..20 {
            p.record_timeout(0);
        }
        let (idx, _) = p.provider().unwrap();
        assert_eq!(idx, 0);
    }
}
