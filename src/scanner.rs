//! Per-chain opportunity scanner
//!
//! One scanner task per chain runs a tiered tick loop: select the tier
//! slice, enumerate candidate loops from the routing graph, size each
//! candidate through the quoter and profit engine, then hand survivors to
//! the safety gate and intent bus. Each tick runs under a hard budget;
//! overruns abort the tick and the next one starts on schedule. Route
//! evaluation is isolated in its own task so a panic can never kill a
//! tick.

use parking_lot::Mutex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::{EmitOutcome, IntentBus};
use crate::config::{ChainConfig, EngineConfig};
use crate::fingerprint::Fingerprint;
use crate::gas::{GasForecast, GasForecaster};
use crate::graph::{GraphSnapshot, RoutingGraph};
use crate::oracle::PriceOracle;
use crate::profit::{ProfitConfig, ProfitEngine};
use crate::quoter::RouteQuoter;
use crate::safety::SafetyGate;
use crate::sizer::{LoanSizer, SizerConfig, SizingContext};
use crate::stats::EngineStats;
use crate::twap::{PairKey, TwapAccumulator};
use crate::types::{Clock, Opportunity, Route, TokenId, TokenRegistry};

/// Scanner lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Scanning,
    Dispatching,
    Cooldown,
}

/// Shared components handed to every scanner
#[derive(Clone)]
pub struct ScannerDeps {
    pub graph: Arc<RoutingGraph>,
    pub quoter: Arc<dyn RouteQuoter>,
    pub oracle: Arc<PriceOracle>,
    pub twap: Arc<TwapAccumulator>,
    pub gas: Arc<GasForecaster>,
    pub gate: Arc<SafetyGate>,
    pub bus: Arc<IntentBus>,
    pub stats: Arc<EngineStats>,
    pub registry: Arc<TokenRegistry>,
    pub clock: Arc<dyn Clock>,
}

/// Per-chain scanning loop
pub struct OpportunityScanner {
    chain: ChainConfig,
    deps: ScannerDeps,
    state: Mutex<ScannerState>,
}

impl OpportunityScanner {
    pub fn new(chain: ChainConfig, deps: ScannerDeps) -> Self {
        Self {
            chain,
            deps,
            state: Mutex::new(ScannerState::Idle),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    pub fn state(&self) -> ScannerState {
        *self.state.lock()
    }

    fn set_state(&self, state: ScannerState) {
        *self.state.lock() = state;
    }

    /// Main loop; returns on shutdown signal
    pub async fn run(
        self: Arc<Self>,
        mut cfg_rx: watch::Receiver<Arc<EngineConfig>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut cfg = cfg_rx.borrow().clone();
        let mut period_ms = cfg.tick_period_ms(self.chain.chain_id);
        let mut interval = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tick_index: u64 = 0;
        let mut cooldown_until_ms: u64 = 0;

        info!(chain = %self.chain.name, period_ms, "scanner started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    // Config swaps land exactly at tick boundaries
                    if cfg_rx.has_changed().unwrap_or(false) {
                        cfg = cfg_rx.borrow_and_update().clone();
                        let fresh_period = cfg.tick_period_ms(self.chain.chain_id);
                        if fresh_period != period_ms {
                            period_ms = fresh_period;
                            interval = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
                            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }
                        debug!(chain = %self.chain.name, "scanner picked up new config");
                    }

                    let now = self.deps.clock.now_ms();
                    if now < cooldown_until_ms {
                        continue;
                    }
                    if self.state() == ScannerState::Cooldown {
                        self.set_state(ScannerState::Idle);
                        info!(chain = %self.chain.name, "scanner cooldown over");
                    }

                    tick_index += 1;
                    let budget = Duration::from_millis(cfg.tick_budget_ms);
                    match tokio::time::timeout(budget, self.clone().tick(cfg.clone(), tick_index)).await {
                        Ok(rejections) => {
                            self.deps.stats.record_tick_completed();
                            if rejections >= cfg.cooldown_reject_threshold {
                                cooldown_until_ms = now + cfg.cooldown_secs * 1000;
                                self.set_state(ScannerState::Cooldown);
                                self.deps.stats.record_scanner_cooldown();
                                warn!(
                                    chain = %self.chain.name,
                                    rejections,
                                    "rejection threshold hit, scanner cooling down"
                                );
                                continue;
                            }
                        }
                        Err(_) => {
                            self.deps.stats.record_tick_overrun();
                            warn!(chain = %self.chain.name, "tick exceeded budget, aborted");
                        }
                    }
                    self.set_state(ScannerState::Idle);
                }
            }
        }

        self.set_state(ScannerState::Idle);
        info!(chain = %self.chain.name, "scanner stopped");
    }

    /// One scan pass; returns the safety rejection count
    async fn tick(self: Arc<Self>, cfg: Arc<EngineConfig>, tick_index: u64) -> u32 {
        self.set_state(ScannerState::Scanning);
        let chain_id = self.chain.chain_id;

        let Some(forecast) = self.deps.gas.predict(chain_id) else {
            debug!(chain = %self.chain.name, "no gas history yet, skipping tick");
            return 0;
        };
        if forecast.wait_advisory {
            self.deps.stats.record_gas_wait();
            debug!(chain = %self.chain.name, "gas rising fast, deferring one tick");
            return 0;
        }

        let tokens = self.tier_slice(&cfg, tick_index);
        if tokens.is_empty() {
            return 0;
        }

        let snapshot = self.deps.graph.snapshot();
        let mut candidates: Vec<Route> = Vec::new();
        for token in &tokens {
            candidates.extend(snapshot.candidates(
                chain_id,
                *token,
                &self.deps.registry,
                cfg.max_candidates_per_tick,
            ));
        }
        candidates.truncate(cfg.max_candidates_per_tick);
        if candidates.is_empty() {
            return 0;
        }
        debug!(
            chain = %self.chain.name,
            tokens = tokens.len(),
            candidates = candidates.len(),
            "tick evaluating candidates"
        );

        // Per-route isolation: a panic in one evaluation only loses that route
        let mut handles = Vec::with_capacity(candidates.len());
        for route in candidates {
            let this = self.clone();
            let cfg = cfg.clone();
            let snapshot = snapshot.clone();
            handles.push(tokio::spawn(async move {
                this.evaluate_route(route, cfg, snapshot, forecast).await
            }));
        }

        let mut survivors: Vec<Opportunity> = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(opp)) => survivors.push(opp),
                Ok(None) => {}
                Err(e) if e.is_panic() => {
                    self.deps.stats.record_route_panic();
                    warn!(chain = %self.chain.name, "route evaluation panicked, tick continues");
                }
                Err(_) => {}
            }
        }

        // Dispatch best-first; ordering past the gate is the emit order
        survivors.sort_by(|a, b| b.score.cmp(&a.score));

        self.set_state(ScannerState::Dispatching);
        // The ceiling check wants the observed gas price: predictions
        // saturate at the ceiling and could never exceed it
        let gas_now = self
            .deps
            .gas
            .current(chain_id)
            .unwrap_or(forecast.predicted_wei);
        let mut rejections = 0u32;
        for opp in survivors {
            let decision = self.deps.gate.admit(&opp, gas_now);
            if decision.is_admitted() {
                match self.deps.bus.emit(&opp).await {
                    Ok(EmitOutcome::Published) => self.deps.stats.record_published(),
                    Ok(EmitOutcome::Spooled) => self.deps.stats.record_spooled(),
                    Ok(EmitOutcome::Suppressed) => self.deps.stats.record_suppressed(),
                    Err(e) => {
                        self.deps.stats.record_kind(e.kind());
                        warn!(chain = %self.chain.name, error = %e, "intent emit failed");
                    }
                }
            } else if decision.is_deferred() {
                self.deps.stats.record_deferred();
            } else {
                rejections += 1;
                self.deps.stats.record_kind(decision.kind());
            }
        }
        rejections
    }

    /// Tokens scheduled for this tick according to the tier rotation
    fn tier_slice(&self, cfg: &EngineConfig, tick_index: u64) -> Vec<TokenId> {
        let schedule = &cfg.tier_schedule;
        let tiers = &self.chain.tiers;
        let mut tokens = Vec::new();
        if schedule.t1_every > 0 && tick_index % schedule.t1_every as u64 == 0 {
            tokens.extend_from_slice(&tiers.tier1);
        }
        if schedule.t2_every > 0 && tick_index % schedule.t2_every as u64 == 0 {
            tokens.extend_from_slice(&tiers.tier2);
        }
        if schedule.t3_every > 0 && tick_index % schedule.t3_every as u64 == 0 {
            tokens.extend_from_slice(&tiers.tier3);
        }
        tokens.dedup();
        tokens
    }

    /// Quote, size, and package one candidate route
    async fn evaluate_route(
        self: Arc<Self>,
        route: Route,
        cfg: Arc<EngineConfig>,
        snapshot: Arc<GraphSnapshot>,
        forecast: GasForecast,
    ) -> Option<Opportunity> {
        self.deps.stats.record_route_evaluated();
        let chain_id = self.chain.chain_id;
        let loan = route.loan_token();

        let loan_price = match self.deps.oracle.price_usd(loan.id, chain_id).await {
            Ok(p) => p,
            Err(e) => {
                self.deps.stats.record_kind(e.kind());
                return None;
            }
        };
        let loan_decimals = self
            .deps
            .registry
            .deployment(loan.id, loan.chain_id, loan.variant)
            .map(|d| d.decimals)
            .unwrap_or(18);

        let tvl_usd = Decimal::from_f64(snapshot.route_min_liquidity(&route))
            .unwrap_or_default();

        let profit = ProfitEngine::new(ProfitConfig {
            max_impact_bps: cfg.max_impact_bps,
            max_twap_dev_bps: cfg.max_twap_dev_bps,
            min_profit_usd: cfg.min_profit_usd,
        });
        let sizer = LoanSizer::new(SizerConfig {
            min_loan_usd: cfg.min_loan_usd,
            target_loan_usd: cfg.target_loan_usd,
            tvl_share_cap: cfg.tvl_share_cap,
        });
        let ctx = SizingContext {
            thinnest_pool_tvl_usd: tvl_usd,
            loan_decimals,
            loan_price_usd: loan_price,
            forecast,
            flash_fee_bps: self.chain.flash_fee_bps,
            native_token: self.chain.wrapped_native,
        };

        match sizer
            .optimize(
                &route,
                self.deps.quoter.as_ref(),
                &profit,
                self.deps.oracle.as_ref(),
                &self.deps.registry,
                &ctx,
            )
            .await
        {
            Ok((quoted, report)) => {
                // Every successful quote feeds the TWAP window
                for quote in &quoted.hop_quotes {
                    if quote.spot_price <= 0.0 {
                        continue;
                    }
                    let pair = PairKey {
                        chain_id,
                        base: quote.token_in,
                        quote: quote.token_out,
                    };
                    let fixed = alloy::primitives::U256::from(
                        (quote.exec_price() * 1e18).max(0.0) as u128,
                    );
                    if !fixed.is_zero() {
                        // Out-of-order observations are rejected and counted
                        if let Err(e) =
                            self.deps.twap.observe(pair, fixed, quote.observed_at_ms)
                        {
                            self.deps.stats.record_kind(e.kind());
                        }
                    }
                }

                let now = self.deps.clock.now_ms();
                let epoch_bucket = now / cfg.fingerprint_cooldown_ms.max(1);
                let fingerprint = Fingerprint::compute(
                    chain_id,
                    &route.pool_addresses(),
                    loan.address,
                    report.loan_amount,
                    epoch_bucket,
                );

                Some(Opportunity {
                    loan_token: loan,
                    route,
                    loan_amount: report.loan_amount,
                    expected_out: report.expected_out,
                    gross_profit_usd: report.gross_profit_usd,
                    gas_cost_usd: report.gas_cost_usd,
                    flash_fee_usd: report.flash_fee_usd,
                    bridge_fee_usd: report.bridge_fee_usd,
                    net_profit_usd: report.net_profit_usd,
                    price_impact_bps: report.price_impact_bps,
                    twap_deviation_bps: report.twap_deviation_bps,
                    score: report.score,
                    fingerprint,
                    chain_id,
                    generated_at_ms: now,
                })
            }
            Err(abort) => {
                self.deps.stats.record_kind(abort.kind());
                None
            }
        }
    }
}
