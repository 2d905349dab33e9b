//! Fingerprint LRU for at-most-once intent emission
//!
//! Single short exclusive lock; capacity- and TTL-bounded. A fingerprint
//! is emitted only if absent from the window.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::fingerprint::Fingerprint;

/// Recent-fingerprint window
pub struct FingerprintLru {
    inner: Mutex<LruInner>,
    capacity: usize,
    ttl_ms: u64,
}

struct LruInner {
    /// fingerprint -> insertion time
    map: HashMap<u128, u64>,
    /// insertion order (each fingerprint appears once)
    order: VecDeque<u128>,
}

impl FingerprintLru {
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                map: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
            ttl_ms,
        }
    }

    /// Insert if absent; returns true when the caller may emit
    pub fn insert_if_absent(&self, fp: Fingerprint, now_ms: u64) -> bool {
        let mut inner = self.inner.lock();

        // Expire from the front (insertion order == age order)
        let cutoff = now_ms.saturating_sub(self.ttl_ms);
        while let Some(front) = inner.order.front().copied() {
            match inner.map.get(&front) {
                Some(at) if *at < cutoff => {
                    inner.order.pop_front();
                    inner.map.remove(&front);
                }
                _ => break,
            }
        }

        if inner.map.contains_key(&fp.0) {
            return false;
        }

        if inner.order.len() >= self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            }
        }
        inner.map.insert(fp.0, now_ms);
        inner.order.push_back(fp.0);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
