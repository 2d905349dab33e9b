//! DEX quoting across protocols, with per-chain request coalescing
//!
//! Requests funnel through a batcher task: everything arriving within a
//! short coalescing window is issued in parallel up to a concurrency cap.
//! Per-request timeouts feed the endpoint health ring so a flaky RPC gets
//! rotated out instead of stalling the scanner.

pub mod endpoints;
pub mod stable;
pub mod v2;
pub mod v3;

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::QuoteError;
use crate::types::{
    ChainId, Clock, HopKind, PoolEntry, PoolMeta, Protocol, Quote, QuoteSource, QuotedRoute,
    Route, TokenRef,
};

pub use endpoints::EndpointPool;

/// Gas unit estimates per hop protocol
pub const V2_HOP_GAS: u64 = 120_000;
pub const V3_HOP_GAS: u64 = 150_000;
pub const STABLE_HOP_GAS: u64 = 220_000;
pub const BRIDGE_HOP_GAS: u64 = 350_000;

/// Flash-loan borrow/repay overhead
pub const FLASH_LOAN_OVERHEAD_GAS: u64 = 90_000;

/// Gas units for a swap hop by protocol
pub fn hop_gas_units(kind: HopKind) -> u64 {
    match kind {
        HopKind::Swap(Protocol::V2) => V2_HOP_GAS,
        HopKind::Swap(Protocol::V3) => V3_HOP_GAS,
        HopKind::Swap(Protocol::Stable) => STABLE_HOP_GAS,
        HopKind::Bridge => BRIDGE_HOP_GAS,
    }
}

/// Total predicted gas units for a route including loan overhead
pub fn route_gas_units(route: &Route) -> u64 {
    FLASH_LOAN_OVERHEAD_GAS
        + route
            .hops()
            .iter()
            .map(|h| hop_gas_units(h.kind))
            .sum::<u64>()
}

/// Quoter tuning knobs
#[derive(Debug, Clone)]
pub struct QuoterConfig {
    pub coalesce_window_ms: u64,
    pub max_concurrent_quotes: usize,
    pub request_timeout_ms: u64,
}

impl Default for QuoterConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 10,
            max_concurrent_quotes: 12,
            request_timeout_ms: 800,
        }
    }
}

/// A single pending quote request
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub chain_id: ChainId,
    pub pool: Address,
    pub token_in: Address,
    pub amount_in: U256,
}

/// Bridge cost/delay source, supplied by the external collaborator
pub trait BridgeInfo: Send + Sync {
    /// Fee charged for moving `amount_in` of `token` over `bridge`, in USD
    fn fee_usd(&self, bridge: Address, token: TokenRef, amount_in: U256) -> Decimal;

    /// Expected transfer delay in seconds
    fn delay_secs(&self, bridge: Address) -> u64;
}

/// No bridges configured: cross-chain hops cost nothing and never occur
pub struct NoBridges;

impl BridgeInfo for NoBridges {
    fn fee_usd(&self, _bridge: Address, _token: TokenRef, _amount_in: U256) -> Decimal {
        Decimal::ZERO
    }
    fn delay_secs(&self, _bridge: Address) -> u64 {
        0
    }
}

/// Capability seam: anything that can quote a full route at a loan size
#[async_trait]
pub trait RouteQuoter: Send + Sync {
    async fn quote_route(&self, route: &Route, amount_in: U256)
        -> Result<QuotedRoute, QuoteError>;
}

type Job = (
    QuoteRequest,
    oneshot::Sender<Result<Quote, QuoteError>>,
);

struct QuoterInner<P> {
    endpoints: HashMap<ChainId, EndpointPool<P>>,
    v3_quoters: HashMap<ChainId, Address>,
    pools: HashMap<(ChainId, Address), PoolEntry>,
    cfg: QuoterConfig,
    clock: Arc<dyn Clock>,
}

/// Batching DEX quoter over health-tracked endpoint pools
pub struct DexQuoter<P> {
    inner: Arc<QuoterInner<P>>,
    bridges: Arc<dyn BridgeInfo>,
    tx: mpsc::Sender<Job>,
}

impl<P> DexQuoter<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    /// Build the quoter and spawn its batcher task (requires a runtime)
    pub fn new(
        endpoints: HashMap<ChainId, EndpointPool<P>>,
        v3_quoters: HashMap<ChainId, Address>,
        pool_table: Vec<PoolEntry>,
        bridges: Arc<dyn BridgeInfo>,
        cfg: QuoterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pools = pool_table
            .into_iter()
            .map(|p| ((p.chain_id, p.address), p))
            .collect();
        let inner = Arc::new(QuoterInner {
            endpoints,
            v3_quoters,
            pools,
            cfg,
            clock,
        });
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(run_batcher(inner.clone(), rx));
        Self { inner, bridges, tx }
    }

    /// Quote one hop; coalesced with concurrent requests on the same chain
    pub async fn quote(&self, req: QuoteRequest) -> Result<Quote, QuoteError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send((req, tx))
            .await
            .map_err(|_| QuoteError::ProtocolRevert("quoter batcher stopped".into()))?;
        rx.await
            .map_err(|_| QuoteError::ProtocolRevert("quote dropped by batcher".into()))?
    }

    pub fn pool_entry(&self, chain_id: ChainId, pool: Address) -> Option<&PoolEntry> {
        self.inner.pools.get(&(chain_id, pool))
    }

    /// True when the chain still has a healthy endpoint
    pub fn chain_healthy(&self, chain_id: ChainId) -> bool {
        self.inner
            .endpoints
            .get(&chain_id)
            .map(|p| p.any_healthy())
            .unwrap_or(false)
    }
}

async fn run_batcher<P>(inner: Arc<QuoterInner<P>>, mut rx: mpsc::Receiver<Job>)
where
    P: Provider + Clone + Send + Sync + 'static,
{
    let window = Duration::from_millis(inner.cfg.coalesce_window_ms);
    while let Some(first) = rx.recv().await {
        let mut batch: Vec<Job> = vec![first];
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(job)) => batch.push(job),
                Ok(None) | Err(_) => break,
            }
        }
        debug!(batch = batch.len(), "issuing coalesced quote batch");
        let concurrency = inner.cfg.max_concurrent_quotes;
        stream::iter(batch)
            .for_each_concurrent(concurrency, |(req, reply)| {
                let inner = inner.clone();
                async move {
                    let result = execute(&inner, &req).await;
                    let _ = reply.send(result);
                }
            })
            .await;
    }
}

async fn execute<P>(inner: &QuoterInner<P>, req: &QuoteRequest) -> Result<Quote, QuoteError>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    let pool_entry = inner
        .pools
        .get(&(req.chain_id, req.pool))
        .ok_or_else(|| QuoteError::ProtocolRevert(format!("unknown pool {}", req.pool)))?
        .clone();

    let endpoint_pool = inner
        .endpoints
        .get(&req.chain_id)
        .ok_or_else(|| QuoteError::ProtocolRevert(format!("no endpoints for chain {}", req.chain_id)))?;
    let (idx, provider) = endpoint_pool
        .provider()
        .ok_or_else(|| QuoteError::ProtocolRevert("endpoint pool is empty".into()))?;

    let timeout = Duration::from_millis(inner.cfg.request_timeout_ms);
    let dispatched = dispatch(inner, provider, &pool_entry, req);
    match tokio::time::timeout(timeout, dispatched).await {
        Ok(Ok(quote)) => {
            endpoint_pool.record_ok(idx);
            Ok(quote)
        }
        Ok(Err(e)) => {
            // A revert still proves the endpoint is alive
            endpoint_pool.record_ok(idx);
            Err(e)
        }
        Err(_) => {
            endpoint_pool.record_timeout(idx);
            warn!(chain = req.chain_id, pool = %req.pool, "quote rpc timed out");
            Err(QuoteError::RpcTimeout)
        }
    }
}

async fn dispatch<P>(
    inner: &QuoterInner<P>,
    provider: Arc<P>,
    pool: &PoolEntry,
    req: &QuoteRequest,
) -> Result<Quote, QuoteError>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    let token_out = pool
        .other_token(req.token_in)
        .ok_or_else(|| QuoteError::ProtocolRevert("token not in pool".into()))?;
    let now_ms = inner.clock.now_ms();

    match pool.protocol {
        Protocol::V2 => {
            let reserves = v2::fetch_reserves(provider, pool.address).await?;
            let (reserve_in, reserve_out) = reserves.oriented(req.token_in, pool.token0);
            let out = v2::amount_out(req.amount_in, reserve_in, reserve_out, pool.fee_bps)?;
            Quote::new(
                pool.address,
                req.token_in,
                token_out,
                req.amount_in,
                out,
                pool.fee_bps,
                v2::spot_price(reserve_in, reserve_out, pool.fee_bps),
                now_ms,
                QuoteSource::Reserves,
            )
        }
        Protocol::V3 => {
            let quoter = inner
                .v3_quoters
                .get(&pool.chain_id)
                .copied()
                .ok_or_else(|| {
                    QuoteError::ProtocolRevert(format!("no v3 quoter for chain {}", pool.chain_id))
                })?;
            let preferred_tier = match pool.meta {
                PoolMeta::V3 { fee_tier } => fee_tier,
                _ => pool.fee_bps * 100,
            };
            let v3q = v3::quote_exact_input(
                provider,
                quoter,
                req.token_in,
                token_out,
                req.amount_in,
                preferred_tier,
            )
            .await?;
            let quote = Quote::new(
                pool.address,
                req.token_in,
                token_out,
                req.amount_in,
                v3q.amount_out,
                v3q.fee_tier / 100,
                0.0,
                now_ms,
                QuoteSource::Quoter,
            )?;
            // The quoter gives no pre-trade spot; treat the realized price
            // as marginal so v3 hops contribute no measured impact
            Ok(Quote {
                spot_price: quote.exec_price(),
                ..quote
            })
        }
        Protocol::Stable => {
            let (i, j, underlying) = match pool.meta {
                PoolMeta::Stable {
                    index0,
                    index1,
                    underlying,
                } => {
                    if req.token_in == pool.token0 {
                        (index0, index1, underlying)
                    } else {
                        (index1, index0, underlying)
                    }
                }
                _ => (0, 1, false),
            };
            let dy =
                stable::quote_get_dy(provider, pool.address, i, j, req.amount_in, underlying)
                    .await?;
            let quote = Quote::new(
                pool.address,
                req.token_in,
                token_out,
                req.amount_in,
                dy,
                pool.fee_bps,
                0.0,
                now_ms,
                QuoteSource::Quoter,
            )?;
            Ok(Quote {
                spot_price: quote.exec_price(),
                ..quote
            })
        }
    }
}

#[async_trait]
impl<P> RouteQuoter for DexQuoter<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    async fn quote_route(
        &self,
        route: &Route,
        amount_in: U256,
    ) -> Result<QuotedRoute, QuoteError> {
        let mut hop_quotes = Vec::with_capacity(route.hop_count());
        let mut amount = amount_in;
        let mut bridge_fee_usd = Decimal::ZERO;

        for hop in route.hops() {
            match hop.kind {
                HopKind::Bridge => {
                    bridge_fee_usd +=
                        self.bridges.fee_usd(hop.pool_or_bridge, hop.token_in, amount);
                    // Token amount carries over to the destination chain;
                    // the fee is accounted in USD by the profit engine
                    let quote = Quote::new(
                        hop.pool_or_bridge,
                        hop.token_in.address,
                        hop.token_out.address,
                        amount,
                        amount,
                        0,
                        1.0,
                        self.inner.clock.now_ms(),
                        QuoteSource::Quoter,
                    )?;
                    hop_quotes.push(quote);
                }
                HopKind::Swap(_) => {
                    let quote = self
                        .quote(QuoteRequest {
                            chain_id: hop.token_in.chain_id,
                            pool: hop.pool_or_bridge,
                            token_in: hop.token_in.address,
                            amount_in: amount,
                        })
                        .await?;
                    amount = quote.amount_out;
                    hop_quotes.push(quote);
                }
            }
        }

        Ok(QuotedRoute {
            route: route.clone(),
            gas_units: route_gas_units(route),
            hop_quotes,
            bridge_fee_usd,
        })
    }
}
