//! Engine supervisor: owns shared components and per-chain scanner tasks
//!
//! Configuration comes in as a value; reload publishes a fresh snapshot
//! that scanners pick up at their next tick boundary. Shutdown stops new
//! ticks, drains inflight work for a bounded grace period, then aborts
//! stragglers. A single feedback consumer routes Executor outcomes into
//! the breaker and inflight accounting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::bus::{BusConfig, IntentBus, IntentPublisher, SpoolWriter};
use crate::config::EngineConfig;
use crate::gas::GasForecaster;
use crate::graph::RoutingGraph;
use crate::oracle::{FeedReader, OracleConfig, PriceOracle, SpotPriceApi};
use crate::quoter::RouteQuoter;
use crate::safety::{BreakerConfig, GateConfig, SafetyGate};
use crate::scanner::{OpportunityScanner, ScannerDeps};
use crate::stats::EngineStats;
use crate::twap::TwapAccumulator;
use crate::types::{ChainId, Clock, TokenId, TokenRegistry};

/// External collaborators injected at construction
pub struct EngineDeps {
    pub quoter: Arc<dyn RouteQuoter>,
    pub feeds: Arc<dyn FeedReader>,
    pub spot: Arc<dyn SpotPriceApi>,
    pub publisher: Arc<dyn IntentPublisher>,
    pub clock: Arc<dyn Clock>,
}

/// Top-level engine lifecycle owner
pub struct EngineSupervisor {
    cfg_tx: watch::Sender<Arc<EngineConfig>>,
    shutdown_tx: watch::Sender<bool>,
    config_version: AtomicU64,

    registry: Arc<TokenRegistry>,
    graph: Arc<RoutingGraph>,
    twap: Arc<TwapAccumulator>,
    oracle: Arc<PriceOracle>,
    gas: Arc<GasForecaster>,
    gate: Arc<SafetyGate>,
    bus: Arc<IntentBus>,
    stats: Arc<EngineStats>,
    quoter: Arc<dyn RouteQuoter>,
    clock: Arc<dyn Clock>,

    tasks: parking_lot::Mutex<JoinSet<()>>,
    shutdown_grace: Duration,
}

impl EngineSupervisor {
    /// Build the engine from a configuration value; no globals, no env
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(TokenRegistry::new(config.tokens.clone()));
        let twap = Arc::new(TwapAccumulator::default());

        let anchors: HashMap<ChainId, TokenId> = config
            .chains
            .iter()
            .map(|c| (c.chain_id, c.usd_anchor))
            .collect();
        let oracle = Arc::new(PriceOracle::new(
            deps.feeds,
            twap.clone(),
            deps.spot,
            registry.clone(),
            anchors,
            deps.clock.clone(),
            OracleConfig::default(),
        ));

        let gas = Arc::new(GasForecaster::new(config.gas_ceilings()));
        let graph = Arc::new(RoutingGraph::new(registry.clone()));

        let gate = Arc::new(SafetyGate::new(
            GateConfig {
                max_concurrent_intents_per_chain: config.max_concurrent_intents_per_chain,
                fingerprint_cooldown_ms: config.fingerprint_cooldown_ms,
                gas_ceilings: config.gas_ceilings(),
                max_impact_bps: config.max_impact_bps,
                max_twap_dev_bps: config.max_twap_dev_bps,
                min_profit_usd: config.min_profit_usd,
            },
            BreakerConfig {
                max_consecutive_failures: config.max_consecutive_failures,
                cooldown_ms: config.cooldown_secs * 1000,
            },
            deps.clock.clone(),
        ));

        let bus = Arc::new(IntentBus::new(
            deps.publisher,
            SpoolWriter::new(config.spool_dir.clone()),
            deps.clock.clone(),
            BusConfig::default(),
        ));

        let shutdown_grace = Duration::from_secs(config.shutdown_grace_secs);
        let (cfg_tx, _) = watch::channel(config);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            cfg_tx,
            shutdown_tx,
            config_version: AtomicU64::new(1),
            registry,
            graph,
            twap,
            oracle,
            gas,
            gate,
            bus,
            stats: Arc::new(EngineStats::new()),
            quoter: deps.quoter,
            clock: deps.clock,
            tasks: parking_lot::Mutex::new(JoinSet::new()),
            shutdown_grace,
        }
    }

    /// Spawn scanners, the feedback consumer, and the bus recovery probe
    pub fn start(&self) {
        let config = self.cfg_tx.borrow().clone();
        let mut tasks = self.tasks.lock();

        for chain in &config.chains {
            let deps = ScannerDeps {
                graph: self.graph.clone(),
                quoter: self.quoter.clone(),
                oracle: self.oracle.clone(),
                twap: self.twap.clone(),
                gas: self.gas.clone(),
                gate: self.gate.clone(),
                bus: self.bus.clone(),
                stats: self.stats.clone(),
                registry: self.registry.clone(),
                clock: self.clock.clone(),
            };
            let scanner = Arc::new(OpportunityScanner::new(chain.clone(), deps));
            let cfg_rx = self.cfg_tx.subscribe();
            let shutdown_rx = self.shutdown_tx.subscribe();
            tasks.spawn(async move {
                scanner.run(cfg_rx, shutdown_rx).await;
            });
        }

        // Single feedback consumer: breaker, inflight slots, cooldowns
        {
            let gate = self.gate.clone();
            let bus = self.bus.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tasks.spawn(async move {
                let mut feedback = bus.subscribe_feedback();
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        msg = feedback.recv() => match msg {
                            Ok(fb) => gate.on_feedback(&fb),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!(missed = n, "feedback consumer lagged");
                            }
                            Err(_) => break,
                        }
                    }
                }
            });
        }

        // Primary-channel recovery probe
        {
            let bus = self.bus.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tasks.spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(1000));
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = interval.tick() => bus.probe_primary().await,
                    }
                }
            });
        }

        info!(
            chains = config.chains.len(),
            version = self.config_version.load(Ordering::Relaxed),
            "engine supervisor started"
        );
    }

    /// Publish a new configuration; scanners swap at their tick boundary
    pub fn reload(&self, config: EngineConfig) {
        let version = self.config_version.fetch_add(1, Ordering::Relaxed) + 1;
        self.cfg_tx.send_replace(Arc::new(config));
        info!(version, "configuration reloaded");
    }

    pub fn config_version(&self) -> u64 {
        self.config_version.load(Ordering::Relaxed)
    }

    /// Stop new ticks, drain inflight work within the grace window, then
    /// abort anything still running
    pub async fn shutdown(&self) {
        info!("engine shutdown requested");
        let _ = self.shutdown_tx.send(true);

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!("engine task panicked during drain");
                    }
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!("shutdown grace elapsed, aborting remaining tasks");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        info!("engine stopped");
    }

    pub fn bus(&self) -> &Arc<IntentBus> {
        &self.bus
    }

    pub fn gate(&self) -> &Arc<SafetyGate> {
        &self.gate
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn graph(&self) -> &Arc<RoutingGraph> {
        &self.graph
    }

    pub fn twap(&self) -> &Arc<TwapAccumulator> {
        &self.twap
    }

    pub fn gas(&self) -> &Arc<GasForecaster> {
        &self.gas
    }

    pub fn oracle(&self) -> &Arc<PriceOracle> {
        &self.oracle
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }
}
