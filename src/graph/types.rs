//! Routing graph node and edge data

use alloy::primitives::Address;

use crate::types::{ChainId, HopExtra, HopKind, Protocol, TokenId, TokenVariant};

/// Graph node: a token deployment on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub chain_id: ChainId,
    pub token: TokenId,
    pub variant: TokenVariant,
}

/// Directed edge through a pool or bridge
#[derive(Debug, Clone)]
pub struct EdgeData {
    /// Pool or bridge address
    pub venue: Address,
    pub kind: HopKind,
    pub fee_bps: u32,
    /// Effective price after fees (token_out per token_in, decimal adjusted)
    pub price: f64,
    /// -ln(price): a profitable loop is a negative-sum cycle
    pub weight: f64,
    /// Normalized liquidity for tie-breaking
    pub liquidity: f64,
    /// Monotone pool-state version, bumped on refresh
    pub version: u64,
    /// False when the pair's TWAP volatility excludes it from routing
    pub twap_ok: bool,
    /// Hop call parameters carried into the route
    pub extra: HopExtra,
}

impl EdgeData {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        venue: Address,
        kind: HopKind,
        fee_bps: u32,
        price: f64,
        liquidity: f64,
        version: u64,
        twap_ok: bool,
        extra: HopExtra,
    ) -> Self {
        Self {
            venue,
            kind,
            fee_bps,
            price,
            weight: -price.ln(),
            liquidity,
            version,
            twap_ok,
            extra,
        }
    }

    /// Gas estimate for traversing this edge
    pub fn gas_units(&self) -> u64 {
        crate::quoter::hop_gas_units(self.kind)
    }

    pub fn is_bridge(&self) -> bool {
        self.kind == HopKind::Bridge
    }

    pub fn protocol(&self) -> Option<Protocol> {
        match self.kind {
            HopKind::Swap(p) => Some(p),
            HopKind::Bridge => None,
        }
    }
}
