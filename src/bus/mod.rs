//! Intent dispatch bus: ordered primary publisher with file-spool fallback
//!
//! Delivery is at-most-once: the fingerprint LRU gates every emit, and a
//! failed publish falls back to the spool rather than retrying the
//! primary. Health flips after consecutive publish failures or a ping
//! timeout; a recovery probe flips it back and new intents return to the
//! primary. Spooled files stay on disk for the Executor.

pub mod dedup;
pub mod spool;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::intent::ExecutionIntent;
use crate::types::{ChainId, Clock, ExecutionFeedback, Opportunity};

pub use dedup::FingerprintLru;
pub use spool::SpoolWriter;

/// Primary-channel publisher seam (pub/sub keyed by chain id)
#[async_trait]
pub trait IntentPublisher: Send + Sync {
    async fn publish(&self, intent: &ExecutionIntent) -> Result<(), BusError>;

    /// Cheap liveness check used by the recovery probe
    async fn ping(&self) -> Result<(), BusError>;
}

/// In-process publisher: one bounded ordered channel per chain
pub struct ChannelPublisher {
    channels: DashMap<ChainId, mpsc::Sender<ExecutionIntent>>,
    capacity: usize,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Executor-side subscription for one chain's ordered intent stream
    pub fn subscribe(&self, chain_id: ChainId) -> mpsc::Receiver<ExecutionIntent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.channels.insert(chain_id, tx);
        rx
    }
}

#[async_trait]
impl IntentPublisher for ChannelPublisher {
    async fn publish(&self, intent: &ExecutionIntent) -> Result<(), BusError> {
        let sender = self
            .channels
            .get(&intent.chain_id)
            .map(|s| s.clone())
            .ok_or_else(|| {
                BusError::PublishFailed(format!("no subscriber for chain {}", intent.chain_id))
            })?;
        sender
            .send(intent.clone())
            .await
            .map_err(|_| BusError::PublishFailed("subscriber dropped".into()))
    }

    async fn ping(&self) -> Result<(), BusError> {
        if self.channels.is_empty() {
            return Err(BusError::PublishFailed("no subscribers".into()));
        }
        Ok(())
    }
}

/// Bus tuning knobs
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Publish/ping deadline before the attempt counts as failed
    pub ping_timeout_ms: u64,
    /// Consecutive publish failures before the primary is unhealthy
    pub failure_threshold: u32,
    pub dedup_capacity: usize,
    pub dedup_ttl_ms: u64,
    /// Feedback fan-out buffer
    pub feedback_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 2_000,
            failure_threshold: 3,
            dedup_capacity: 1024,
            dedup_ttl_ms: 60_000,
            feedback_buffer: 256,
        }
    }
}

/// What happened to an emitted opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Delivered to the primary channel
    Published,
    /// Written to the file spool
    Spooled,
    /// Duplicate fingerprint within the window; not delivered
    Suppressed,
}

/// The opportunity dispatch bus
pub struct IntentBus {
    publisher: Arc<dyn IntentPublisher>,
    spool: SpoolWriter,
    dedup: FingerprintLru,
    consecutive_failures: AtomicU32,
    primary_unhealthy: AtomicBool,
    feedback_tx: broadcast::Sender<ExecutionFeedback>,
    clock: Arc<dyn Clock>,
    cfg: BusConfig,
}

impl IntentBus {
    pub fn new(
        publisher: Arc<dyn IntentPublisher>,
        spool: SpoolWriter,
        clock: Arc<dyn Clock>,
        cfg: BusConfig,
    ) -> Self {
        let (feedback_tx, _) = broadcast::channel(cfg.feedback_buffer);
        Self {
            publisher,
            spool,
            dedup: FingerprintLru::new(cfg.dedup_capacity, cfg.dedup_ttl_ms),
            consecutive_failures: AtomicU32::new(0),
            primary_unhealthy: AtomicBool::new(false),
            feedback_tx,
            clock,
            cfg,
        }
    }

    /// Emit an opportunity at most once
    pub async fn emit(&self, opp: &Opportunity) -> Result<EmitOutcome, BusError> {
        let now = self.clock.now_ms();
        if !self.dedup.insert_if_absent(opp.fingerprint, now) {
            debug!(fp = %opp.fingerprint, "duplicate intent suppressed");
            return Ok(EmitOutcome::Suppressed);
        }

        let intent = ExecutionIntent::from_opportunity(opp);

        if !self.primary_unhealthy.load(Ordering::Relaxed) {
            let deadline = Duration::from_millis(self.cfg.ping_timeout_ms);
            match tokio::time::timeout(deadline, self.publisher.publish(&intent)).await {
                Ok(Ok(())) => {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    return Ok(EmitOutcome::Published);
                }
                Ok(Err(e)) => {
                    self.note_publish_failure(&e.to_string());
                }
                Err(_) => {
                    self.note_publish_failure("publish timed out");
                }
            }
        }

        // Fallback path: the Executor tails the spool directory
        self.spool.write(&intent).await?;
        Ok(EmitOutcome::Spooled)
    }

    fn note_publish_failure(&self, reason: &str) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(failures, reason, "primary publish failed");
        if failures >= self.cfg.failure_threshold {
            if !self.primary_unhealthy.swap(true, Ordering::Relaxed) {
                warn!("primary intent channel unhealthy, spooling to disk");
            }
        }
    }

    /// Liveness probe; flips the bus back to the primary on success.
    /// Run periodically by the supervisor while unhealthy.
    pub async fn probe_primary(&self) {
        if !self.primary_unhealthy.load(Ordering::Relaxed) {
            return;
        }
        let deadline = Duration::from_millis(self.cfg.ping_timeout_ms);
        match tokio::time::timeout(deadline, self.publisher.ping()).await {
            Ok(Ok(())) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.primary_unhealthy.store(false, Ordering::Relaxed);
                info!("primary intent channel recovered");
            }
            _ => {
                debug!("primary still unhealthy");
            }
        }
    }

    pub fn primary_healthy(&self) -> bool {
        !self.primary_unhealthy.load(Ordering::Relaxed)
    }

    pub fn spool(&self) -> &SpoolWriter {
        &self.spool
    }

    /// Handle for the embedding service to inject Executor feedback
    pub fn push_feedback(&self, feedback: ExecutionFeedback) {
        // Nobody listening is fine during shutdown
        let _ = self.feedback_tx.send(feedback);
    }

    /// Subscribe to the feedback stream
    pub fn subscribe_feedback(&self) -> broadcast::Receiver<ExecutionFeedback> {
        self.feedback_tx.subscribe()
    }
}
