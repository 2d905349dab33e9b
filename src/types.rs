//! Core data model: chains, tokens, pools, quotes, routes, opportunities

use alloy::primitives::{Address, U256};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{QuoteError, RouteError};
use crate::fingerprint::Fingerprint;

/// EVM chain id
pub type ChainId = u64;

/// Maximum hops for a closed loop staying on one chain
pub const MAX_HOPS_SAME_CHAIN: usize = 3;

/// Maximum hops for a closed loop crossing chains
pub const MAX_HOPS_CROSS_CHAIN: usize = 4;

/// Wall-clock capability so shared state can run on deterministic test clocks
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Production clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Canonical token identifier in a universe of at most 256 entries
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TokenId(pub u8);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Deployment flavor of a token on a given chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenVariant {
    Canonical,
    Bridged,
    Wrapped,
}

/// A token as it exists on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRef {
    pub id: TokenId,
    pub variant: TokenVariant,
    pub chain_id: ChainId,
    pub address: Address,
}

/// One deployment row for the token registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDeployment {
    pub token: TokenId,
    pub chain_id: ChainId,
    pub variant: TokenVariant,
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
}

/// Token universe with O(1) reverse lookup from on-chain address
pub struct TokenRegistry {
    deployments: HashMap<(TokenId, ChainId, TokenVariant), TokenDeployment>,
    reverse: HashMap<(ChainId, Address), (TokenId, TokenVariant)>,
    symbols: HashMap<TokenId, String>,
}

impl TokenRegistry {
    pub fn new(rows: Vec<TokenDeployment>) -> Self {
        let mut deployments = HashMap::with_capacity(rows.len());
        let mut reverse = HashMap::with_capacity(rows.len());
        let mut symbols = HashMap::new();

        for row in rows {
            reverse.insert((row.chain_id, row.address), (row.token, row.variant));
            symbols.entry(row.token).or_insert_with(|| row.symbol.clone());
            deployments.insert((row.token, row.chain_id, row.variant), row);
        }

        Self {
            deployments,
            reverse,
            symbols,
        }
    }

    pub fn deployment(
        &self,
        token: TokenId,
        chain_id: ChainId,
        variant: TokenVariant,
    ) -> Option<&TokenDeployment> {
        self.deployments.get(&(token, chain_id, variant))
    }

    /// Preferred deployment on a chain: canonical first, then bridged, then wrapped
    pub fn preferred(&self, token: TokenId, chain_id: ChainId) -> Option<&TokenDeployment> {
        [
            TokenVariant::Canonical,
            TokenVariant::Bridged,
            TokenVariant::Wrapped,
        ]
        .iter()
        .find_map(|v| self.deployments.get(&(token, chain_id, *v)))
    }

    /// O(1) reverse lookup from an on-chain address
    pub fn resolve(&self, chain_id: ChainId, address: Address) -> Option<(TokenId, TokenVariant)> {
        self.reverse.get(&(chain_id, address)).copied()
    }

    pub fn symbol(&self, token: TokenId) -> &str {
        self.symbols.get(&token).map(String::as_str).unwrap_or("?")
    }

    pub fn token_ref(
        &self,
        token: TokenId,
        chain_id: ChainId,
        variant: TokenVariant,
    ) -> Option<TokenRef> {
        self.deployment(token, chain_id, variant).map(|d| TokenRef {
            id: token,
            variant,
            chain_id,
            address: d.address,
        })
    }
}

/// Supported pool protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    V2,
    V3,
    Stable,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::V2 => write!(f, "V2"),
            Protocol::V3 => write!(f, "V3"),
            Protocol::Stable => write!(f, "STABLE"),
        }
    }
}

/// Protocol-specific pool parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolMeta {
    V2,
    V3 {
        /// Fee tier in hundredths of a bip (500 = 0.05%)
        fee_tier: u32,
    },
    Stable {
        /// Coin indices for get_dy(i, j, dx)
        index0: u8,
        index1: u8,
        /// True when the wrapping variant requires get_dy_underlying
        underlying: bool,
    },
}

/// Immutable pool descriptor for a scan epoch
///
/// `token0 < token1` by address, normalized at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub chain_id: ChainId,
    pub protocol: Protocol,
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub fee_bps: u32,
    pub meta: PoolMeta,
}

impl PoolEntry {
    pub fn new(
        chain_id: ChainId,
        protocol: Protocol,
        address: Address,
        token_a: Address,
        token_b: Address,
        fee_bps: u32,
        meta: PoolMeta,
    ) -> Self {
        let (token0, token1) = if token_a < token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        Self {
            chain_id,
            protocol,
            address,
            token0,
            token1,
            fee_bps,
            meta,
        }
    }

    pub fn other_token(&self, token: Address) -> Option<Address> {
        if token == self.token0 {
            Some(self.token1)
        } else if token == self.token1 {
            Some(self.token0)
        } else {
            None
        }
    }
}

/// Where a quote's numbers came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteSource {
    /// Off-chain quoter contract simulation
    Quoter,
    /// Derived locally from on-chain reserves
    Reserves,
}

/// A single-hop swap quote
#[derive(Debug, Clone)]
pub struct Quote {
    pub pool: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_bps: u32,
    /// Pre-trade marginal price (token_out per token_in, decimal adjusted)
    pub spot_price: f64,
    pub observed_at_ms: u64,
    pub source: QuoteSource,
}

impl Quote {
    /// Construct a quote, rejecting zero output
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Address,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        amount_out: U256,
        fee_bps: u32,
        spot_price: f64,
        observed_at_ms: u64,
        source: QuoteSource,
    ) -> Result<Self, QuoteError> {
        if amount_out.is_zero() {
            return Err(QuoteError::PoolDrained);
        }
        Ok(Self {
            pool,
            token_in,
            token_out,
            amount_in,
            amount_out,
            fee_bps,
            spot_price,
            observed_at_ms,
            source,
        })
    }

    /// Realized execution price (amount_out / amount_in)
    pub fn exec_price(&self) -> f64 {
        if self.amount_in.is_zero() {
            return 0.0;
        }
        u256_to_f64(self.amount_out) / u256_to_f64(self.amount_in)
    }
}

/// Hop-specific call parameters carried to the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HopExtra {
    V3 { fee_tier: u32 },
    Stable { i: u8, j: u8 },
    None {},
}

/// One leg of a route: a swap through a pool or a bridge transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHop {
    pub pool_or_bridge: Address,
    pub kind: HopKind,
    pub token_in: TokenRef,
    pub token_out: TokenRef,
    pub extra: HopExtra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKind {
    Swap(Protocol),
    Bridge,
}

impl HopKind {
    pub fn protocol_tag(&self) -> &'static str {
        match self {
            HopKind::Swap(Protocol::V2) => "V2",
            HopKind::Swap(Protocol::V3) => "V3",
            HopKind::Swap(Protocol::Stable) => "STABLE",
            HopKind::Bridge => "BRIDGE",
        }
    }
}

/// Ordered, non-empty hop list forming a closed arbitrage loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    hops: Vec<RouteHop>,
}

impl Route {
    /// Validate hop chaining, closure and hop/bridge limits
    pub fn new(hops: Vec<RouteHop>) -> Result<Self, RouteError> {
        if hops.is_empty() {
            return Err(RouteError::Empty);
        }
        for i in 1..hops.len() {
            let prev = &hops[i - 1];
            let cur = &hops[i];
            if prev.token_out.id != cur.token_in.id
                || prev.token_out.chain_id != cur.token_in.chain_id
            {
                return Err(RouteError::BrokenChain(i));
            }
        }
        let first = &hops[0];
        let last = &hops[hops.len() - 1];
        if first.token_in.id != last.token_out.id
            || first.token_in.chain_id != last.token_out.chain_id
        {
            return Err(RouteError::NotClosed);
        }

        let bridge_hops = hops.iter().filter(|h| h.kind == HopKind::Bridge).count();
        let cross_chain = bridge_hops > 0;
        let max_hops = if cross_chain {
            MAX_HOPS_CROSS_CHAIN
        } else {
            MAX_HOPS_SAME_CHAIN
        };
        if hops.len() > max_hops {
            return Err(RouteError::TooManyHops);
        }
        // At most one bridge out and one bridge back
        if bridge_hops > 2 {
            return Err(RouteError::TooManyBridges);
        }

        Ok(Self { hops })
    }

    pub fn hops(&self) -> &[RouteHop] {
        &self.hops
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Chain the loop starts and ends on
    pub fn home_chain(&self) -> ChainId {
        self.hops[0].token_in.chain_id
    }

    /// Token borrowed and repaid
    pub fn loan_token(&self) -> TokenRef {
        self.hops[0].token_in
    }

    pub fn is_cross_chain(&self) -> bool {
        self.hops.iter().any(|h| h.kind == HopKind::Bridge)
    }

    /// Pool/bridge addresses in hop order
    pub fn pool_addresses(&self) -> Vec<Address> {
        self.hops.iter().map(|h| h.pool_or_bridge).collect()
    }

    /// Human-readable token path for logging
    pub fn describe(&self, registry: &TokenRegistry) -> String {
        let mut parts: Vec<String> = self
            .hops
            .iter()
            .map(|h| registry.symbol(h.token_in.id).to_string())
            .collect();
        parts.push(registry.symbol(self.hops[self.hops.len() - 1].token_out.id).to_string());
        parts.join(" -> ")
    }
}

/// A route together with the per-hop quotes obtained at one loan size
#[derive(Debug, Clone)]
pub struct QuotedRoute {
    pub route: Route,
    pub hop_quotes: Vec<Quote>,
    /// Bridge fees charged along the way, in USD
    pub bridge_fee_usd: Decimal,
    /// Total gas units predicted across all hops plus loan overhead
    pub gas_units: u64,
}

impl QuotedRoute {
    pub fn amount_in(&self) -> U256 {
        self.hop_quotes.first().map(|q| q.amount_in).unwrap_or(U256::ZERO)
    }

    /// Final output amount after the last hop
    pub fn amount_out_end(&self) -> U256 {
        self.hop_quotes.last().map(|q| q.amount_out).unwrap_or(U256::ZERO)
    }

    /// Cumulative price impact across hops, in basis points
    ///
    /// impact = 1 - Π(exec_i / spot_i)
    pub fn price_impact_bps(&self) -> u32 {
        let mut ratio = 1.0_f64;
        for q in &self.hop_quotes {
            if q.spot_price <= 0.0 {
                continue;
            }
            let exec = q.exec_price();
            ratio *= (exec / q.spot_price).clamp(0.0, 2.0);
        }
        if ratio >= 1.0 {
            0
        } else {
            ((1.0 - ratio) * 10_000.0).round() as u32
        }
    }
}

/// Execution-ready opportunity produced by the loan sizer
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub route: Route,
    pub loan_token: TokenRef,
    pub loan_amount: U256,
    pub expected_out: U256,
    pub gross_profit_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub flash_fee_usd: Decimal,
    pub bridge_fee_usd: Decimal,
    pub net_profit_usd: Decimal,
    pub price_impact_bps: u32,
    pub twap_deviation_bps: u32,
    pub score: Decimal,
    pub fingerprint: Fingerprint,
    pub chain_id: ChainId,
    pub generated_at_ms: u64,
}

/// Outcome reported back by the executor for a dispatched intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    SimulatedOk,
    Submitted,
    Included,
    Reverted,
    Rejected,
    Timeout,
}

impl ExecutionOutcome {
    /// True when the outcome should feed the circuit breaker failure count
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Reverted | ExecutionOutcome::Rejected | ExecutionOutcome::Timeout
        )
    }

    /// True when the outcome terminates an inflight intent
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionOutcome::Submitted)
    }
}

/// Feedback message from the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFeedback {
    pub fingerprint: String,
    pub outcome: ExecutionOutcome,
    #[serde(default)]
    pub realized_profit_usd: Option<f64>,
    #[serde(default)]
    pub gas_used: Option<u64>,
    #[serde(default)]
    pub error_kind: Option<String>,
}

impl ExecutionFeedback {
    pub fn fingerprint_value(&self) -> Option<Fingerprint> {
        Fingerprint::from_hex(&self.fingerprint)
    }
}

/// Safely convert U256 to f64, handling values larger than u128::MAX
pub fn u256_to_f64(value: U256) -> f64 {
    if value.is_zero() {
        return 0.0;
    }
    if value <= U256::from(u128::MAX) {
        return value.to::<u128>() as f64;
    }
    let bits = 256 - value.leading_zeros();
    let shift = bits.saturating_sub(64);
    let mantissa = (value >> shift).to::<u64>() as f64;
    mantissa * 2_f64.powi(shift as i32)
}

/// Convert a raw token amount to a Decimal in whole-token units
pub fn amount_to_decimal(amount: U256, decimals: u8) -> Decimal {
    let scaled = u256_to_f64(amount) / 10_f64.powi(decimals as i32);
    Decimal::from_f64(scaled).unwrap_or_default()
}

/// Convert a whole-token Decimal to a raw amount, flooring fractional wei
pub fn decimal_to_amount(value: Decimal, decimals: u8) -> U256 {
    if value <= Decimal::ZERO {
        return U256::ZERO;
    }
    let scaled = value * Decimal::from(10_u64.pow(decimals.min(18) as u32));
    let as_u128 = scaled.trunc().to_u128().unwrap_or(0);
    U256::from(as_u128)
}
