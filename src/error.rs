//! Error taxonomy for the opportunity engine
//!
//! Every variant carries a stable `kind()` discriminator suitable for
//! metrics labels. Recoverable errors are skipped at the scanner level and
//! counted; nothing is silently swallowed without a count.

use thiserror::Error;

/// Errors surfaced by DEX quoting (all recoverable at the scanner level)
#[derive(Debug, Clone, Error)]
pub enum QuoteError {
    #[error("rpc request timed out")]
    RpcTimeout,

    #[error("pool has zero liquidity on one side")]
    PoolDrained,

    #[error("protocol call reverted: {0}")]
    ProtocolRevert(String),

    #[error("quote data is stale")]
    Stale,
}

impl QuoteError {
    /// Stable discriminator for metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            QuoteError::RpcTimeout => "rpc_timeout",
            QuoteError::PoolDrained => "pool_drained",
            QuoteError::ProtocolRevert(_) => "protocol_revert",
            QuoteError::Stale => "stale",
        }
    }
}

/// Errors from the tiered price oracle
#[derive(Debug, Clone, Error)]
pub enum PriceError {
    /// All tiers (feed, TWAP, external HTTP) missed
    #[error("no price available for token {token} on chain {chain_id}")]
    Unavailable { chain_id: u64, token: u8 },

    #[error("upstream price call failed: {0}")]
    Upstream(String),
}

impl PriceError {
    pub fn kind(&self) -> &'static str {
        match self {
            PriceError::Unavailable { .. } => "price_unavailable",
            PriceError::Upstream(_) => "price_upstream",
        }
    }
}

/// Profit-evaluation rejections, in the order they are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("route produced zero output")]
    Infeasible,

    #[error("gross spread is not positive")]
    NotProfitable,

    #[error("price impact exceeds cap")]
    PriceImpactTooHigh,

    #[error("spot deviates from TWAP beyond cap")]
    TwapDeviationTooHigh,

    #[error("net profit below minimum floor")]
    MinProfitBelowFloor,
}

impl RejectReason {
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::Infeasible => "infeasible",
            RejectReason::NotProfitable => "not_profitable",
            RejectReason::PriceImpactTooHigh => "price_impact_too_high",
            RejectReason::TwapDeviationTooHigh => "twap_deviation_too_high",
            RejectReason::MinProfitBelowFloor => "min_profit_below_floor",
        }
    }
}

/// Loan sizing aborts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SizerError {
    /// Thinnest pool TVL is below the minimum loan floor
    #[error("pool liquidity below minimum loan size")]
    InsufficientLiquidity,

    /// Even the minimum loan size loses money before costs
    #[error("route is unprofitable at minimum size")]
    UnprofitableAtMinimum,

    /// Search converged without any size passing the profit engine
    #[error("no feasible loan size found")]
    NoFeasibleSize,
}

impl SizerError {
    pub fn kind(&self) -> &'static str {
        match self {
            SizerError::InsufficientLiquidity => "insufficient_liquidity",
            SizerError::UnprofitableAtMinimum => "unprofitable_at_minimum",
            SizerError::NoFeasibleSize => "no_feasible_size",
        }
    }
}

/// TWAP accumulator observation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TwapError {
    /// Observation timestamp not after the latest stored sample
    #[error("out-of-order observation rejected")]
    NonMonotonicTimestamp,

    #[error("zero-valued sample rejected")]
    ZeroValue,
}

impl TwapError {
    pub fn kind(&self) -> &'static str {
        match self {
            TwapError::NonMonotonicTimestamp => "twap_out_of_order",
            TwapError::ZeroValue => "twap_zero_value",
        }
    }
}

/// Intent bus delivery failures
#[derive(Debug, Error)]
pub enum BusError {
    #[error("primary publish failed: {0}")]
    PublishFailed(String),

    #[error("spool write failed: {0}")]
    SpoolIo(#[from] std::io::Error),

    #[error("intent serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BusError {
    pub fn kind(&self) -> &'static str {
        match self {
            BusError::PublishFailed(_) => "publish_failed",
            BusError::SpoolIo(_) => "spool_io",
            BusError::Encode(_) => "intent_encode",
        }
    }
}

/// Route structure violations (fatal for the route, not the scanner)
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    #[error("route has no hops")]
    Empty,

    #[error("hop {0} token_in does not match previous hop token_out")]
    BrokenChain(usize),

    #[error("route does not close back to the loan token")]
    NotClosed,

    #[error("route exceeds hop limit for its span")]
    TooManyHops,

    #[error("route crosses more than one bridge per direction")]
    TooManyBridges,
}

impl RouteError {
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::Empty => "route_empty",
            RouteError::BrokenChain(_) => "route_broken_chain",
            RouteError::NotClosed => "route_not_closed",
            RouteError::TooManyHops => "route_too_many_hops",
            RouteError::TooManyBridges => "route_too_many_bridges",
        }
    }
}

/// Top-level engine failures (fatal for a single scanner, never the process)
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config version mismatch: scanner at v{scanner}, supervisor at v{supervisor}")]
    ConfigVersionMismatch { scanner: u64, supervisor: u64 },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("unknown chain id {0}")]
    UnknownChain(u64),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ConfigVersionMismatch { .. } => "config_version_mismatch",
            EngineError::InvariantViolation(_) => "invariant_violation",
            EngineError::UnknownChain(_) => "unknown_chain",
            EngineError::Bus(e) => e.kind(),
        }
    }
}
