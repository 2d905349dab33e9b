//! Shared fixtures: an in-memory v2 quoter, stub oracle tiers, and a
//! small Polygon-like configuration with a USDC/WMATIC/USDT triangle.

#![allow(dead_code)]

use alloy::primitives::{address, Address, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use omniarb_engine::config::{ChainConfig, PoolConfigEntry, TierAssignment};
use omniarb_engine::error::{PriceError, QuoteError};
use omniarb_engine::oracle::{FeedReader, FeedRound, SpotPriceApi};
use omniarb_engine::quoter::{v2, RouteQuoter};
use omniarb_engine::types::{
    PoolMeta, Protocol, Quote, QuoteSource, QuotedRoute, Route, TokenDeployment,
};
use omniarb_engine::{EngineConfig, PoolEntry, PoolRate, TokenId, TokenVariant};

pub const CHAIN: u64 = 137;

/// Opt-in test logging: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const USDC: Address = address!("0000000000000000000000000000000000000010");
pub const WMATIC: Address = address!("0000000000000000000000000000000000000020");
pub const USDT: Address = address!("0000000000000000000000000000000000000030");

pub const POOL1: Address = address!("00000000000000000000000000000000000000b1");
pub const POOL2: Address = address!("00000000000000000000000000000000000000b2");
pub const POOL3: Address = address!("00000000000000000000000000000000000000b3");

pub const USDC_ID: TokenId = TokenId(0);
pub const WMATIC_ID: TokenId = TokenId(1);
pub const USDT_ID: TokenId = TokenId(2);

/// One simulated v2 pool with raw reserves
#[derive(Debug, Clone)]
pub struct SimPool {
    pub entry: PoolEntry,
    pub reserve0: U256,
    pub reserve1: U256,
}

impl SimPool {
    pub fn oriented(&self, token_in: Address) -> (U256, U256) {
        if token_in == self.entry.token0 {
            (self.reserve0, self.reserve1)
        } else {
            (self.reserve1, self.reserve0)
        }
    }
}

/// In-memory route quoter running the real constant-product math
pub struct SimQuoter {
    pools: Mutex<HashMap<Address, SimPool>>,
    ts: std::sync::atomic::AtomicU64,
}

impl SimQuoter {
    pub fn new(pools: Vec<SimPool>) -> Self {
        Self {
            pools: Mutex::new(pools.into_iter().map(|p| (p.entry.address, p)).collect()),
            ts: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn next_ts(&self) -> u64 {
        self.ts.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl RouteQuoter for SimQuoter {
    async fn quote_route(
        &self,
        route: &Route,
        amount_in: U256,
    ) -> Result<QuotedRoute, QuoteError> {
        let pools = self.pools.lock();
        let mut amount = amount_in;
        let mut quotes = Vec::with_capacity(route.hop_count());
        for hop in route.hops() {
            let pool = pools
                .get(&hop.pool_or_bridge)
                .ok_or_else(|| QuoteError::ProtocolRevert("unknown pool".into()))?;
            let (rin, rout) = pool.oriented(hop.token_in.address);
            let out = v2::amount_out(amount, rin, rout, pool.entry.fee_bps)?;
            quotes.push(Quote::new(
                hop.pool_or_bridge,
                hop.token_in.address,
                hop.token_out.address,
                amount,
                out,
                pool.entry.fee_bps,
                v2::spot_price(rin, rout, pool.entry.fee_bps),
                self.next_ts(),
                QuoteSource::Reserves,
            )?);
            amount = out;
        }
        Ok(QuotedRoute {
            route: route.clone(),
            hop_quotes: quotes,
            bridge_fee_usd: Decimal::ZERO,
            gas_units: omniarb_engine::quoter::route_gas_units(route),
        })
    }
}

/// Feed table with fresh timestamps
pub struct SimFeeds {
    pub prices: HashMap<Address, Decimal>,
    pub updated_at: u64,
}

#[async_trait]
impl FeedReader for SimFeeds {
    async fn latest_round(
        &self,
        _chain_id: u64,
        token: Address,
    ) -> Result<Option<FeedRound>, PriceError> {
        Ok(self.prices.get(&token).map(|p| FeedRound {
            price_usd: *p,
            updated_at: self.updated_at,
        }))
    }
}

/// HTTP tier that always misses
pub struct NoSpot;

#[async_trait]
impl SpotPriceApi for NoSpot {
    async fn spot_usd(&self, _symbol: &str) -> Result<Decimal, PriceError> {
        Err(PriceError::Upstream("offline".into()))
    }
}

pub fn token_rows() -> Vec<TokenDeployment> {
    vec![
        TokenDeployment {
            token: USDC_ID,
            chain_id: CHAIN,
            variant: TokenVariant::Bridged,
            address: USDC,
            decimals: 6,
            symbol: "USDC".into(),
        },
        TokenDeployment {
            token: WMATIC_ID,
            chain_id: CHAIN,
            variant: TokenVariant::Wrapped,
            address: WMATIC,
            decimals: 18,
            symbol: "WMATIC".into(),
        },
        TokenDeployment {
            token: USDT_ID,
            chain_id: CHAIN,
            variant: TokenVariant::Canonical,
            address: USDT,
            decimals: 6,
            symbol: "USDT".into(),
        },
    ]
}

pub fn pool_entries() -> Vec<PoolEntry> {
    vec![
        PoolEntry::new(CHAIN, Protocol::V2, POOL1, USDC, WMATIC, 30, PoolMeta::V2),
        PoolEntry::new(CHAIN, Protocol::V2, POOL2, WMATIC, USDT, 30, PoolMeta::V2),
        PoolEntry::new(CHAIN, Protocol::V2, POOL3, USDT, USDC, 30, PoolMeta::V2),
    ]
}

/// Raw reserves for the scenario triangle:
///   POOL1 1,000,000 USDC / 2,000,000 WMATIC
///   POOL2 2,000,000 WMATIC / 1,100,000 USDT
///   POOL3 50,000,000 USDT / 50,000,000 USDC (deep closing leg)
pub fn scenario_pools() -> Vec<SimPool> {
    let entries = pool_entries();
    let usdc = |v: u64| U256::from(v) * U256::from(1_000_000u64);
    let wmatic = |v: u64| U256::from(v) * U256::from(10u64).pow(U256::from(18u64));

    let mk = |entry: &PoolEntry, a: Address, ra: U256, rb: U256| {
        // Reserves given as (a, other); orient to the normalized token order
        let (reserve0, reserve1) = if entry.token0 == a { (ra, rb) } else { (rb, ra) };
        SimPool {
            entry: entry.clone(),
            reserve0,
            reserve1,
        }
    };

    vec![
        mk(&entries[0], USDC, usdc(1_000_000), wmatic(2_000_000)),
        mk(&entries[1], WMATIC, wmatic(2_000_000), usdc(1_100_000)),
        mk(&entries[2], USDT, usdc(50_000_000), usdc(50_000_000)),
    ]
}

/// PoolRates matching `scenario_pools`, for the routing graph
pub fn scenario_rates() -> Vec<PoolRate> {
    scenario_pools()
        .into_iter()
        .map(|p| {
            let dec0 = decimals_of(p.entry.token0);
            let dec1 = decimals_of(p.entry.token1);
            let r0 = u256_f64(p.reserve0);
            let r1 = u256_f64(p.reserve1);
            // Liquidity in USD-ish terms: stables at par, WMATIC at ~$0.525
            let liq = (r0 / 10f64.powi(dec0 as i32)) * usdish(p.entry.token0)
                + (r1 / 10f64.powi(dec1 as i32)) * usdish(p.entry.token1);
            omniarb_engine::RoutingGraph::v2_rate(&p.entry, r0, r1, dec0, dec1, liq, true)
        })
        .collect()
}

fn decimals_of(token: Address) -> u8 {
    if token == WMATIC {
        18
    } else {
        6
    }
}

fn usdish(token: Address) -> f64 {
    if token == WMATIC {
        0.525
    } else {
        1.0
    }
}

fn u256_f64(v: U256) -> f64 {
    omniarb_engine::types::u256_to_f64(v)
}

/// Feed table keeping the deviation gate quiet for the scenario pools:
/// WMATIC is marked mid-way between the two venues
pub fn consistent_feeds(now_secs: u64) -> SimFeeds {
    let mut prices = HashMap::new();
    prices.insert(USDC, Decimal::ONE);
    prices.insert(USDT, Decimal::ONE);
    prices.insert(WMATIC, Decimal::new(525, 3)); // 0.525
    SimFeeds {
        prices,
        updated_at: now_secs,
    }
}

pub fn engine_config(spool_dir: std::path::PathBuf, tick_period_ms: u64) -> EngineConfig {
    let base: EngineConfig =
        serde_json::from_str(r#"{ "chains": [], "tokens": [] }"#).expect("defaults");
    EngineConfig {
        chains: vec![ChainConfig {
            chain_id: CHAIN,
            name: "polygon".into(),
            gas_ceiling_wei: 200_000_000_000, // 200 gwei
            wrapped_native: WMATIC_ID,
            usd_anchor: USDC_ID,
            flash_fee_bps: 9,
            tick_period_ms: Some(tick_period_ms),
            rpc_endpoints: vec![],
            tiers: TierAssignment {
                tier1: vec![USDC_ID],
                tier2: vec![],
                tier3: vec![],
            },
        }],
        tokens: token_rows(),
        pools: pool_entries()
            .into_iter()
            .map(|p| PoolConfigEntry {
                chain_id: p.chain_id,
                protocol: p.protocol,
                address: p.address,
                token0: p.token0,
                token1: p.token1,
                fee_bps: p.fee_bps,
                meta: p.meta,
            })
            .collect(),
        spool_dir,
        min_loan_usd: Decimal::new(100, 0),
        ..base
    }
}

/// Recompute the triangle output with plain f64 constant-product math,
/// independent of the crate's own arithmetic
pub fn expected_triangle_out(loan_usdc: f64) -> f64 {
    let fee = 0.997;
    let step = |x: f64, rin: f64, rout: f64| {
        let xf = x * fee;
        xf * rout / (rin + xf)
    };
    // Whole-token units throughout
    let wmatic = step(loan_usdc, 1_000_000.0, 2_000_000.0);
    let usdt = step(wmatic, 2_000_000.0, 1_100_000.0);
    step(usdt, 50_000_000.0, 50_000_000.0)
}
