//! Stable-pool quoting via get_dy / get_dy_underlying

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::sol;
use std::sync::Arc;
use tracing::debug;

use crate::error::QuoteError;

sol! {
    #[sol(rpc)]
    interface IStableSwap {
        function get_dy(int128 i, int128 j, uint256 dx) external view returns (uint256);
        function get_dy_underlying(int128 i, int128 j, uint256 dx) external view returns (uint256);
    }
}

/// Quote a stable-pool swap between coin indices `i` and `j`
///
/// Pools wrapping interest-bearing tokens quote through
/// `get_dy_underlying`; plain pools use `get_dy`. When `underlying` is set
/// we still try `get_dy` first and fall back, matching pools that expose
/// both entry points.
pub async fn quote_get_dy<P>(
    provider: Arc<P>,
    pool: Address,
    i: u8,
    j: u8,
    dx: U256,
    underlying: bool,
) -> Result<U256, QuoteError>
where
    P: Provider + Clone + 'static,
{
    let contract = IStableSwap::new(pool, provider);
    let i = i as i128;
    let j = j as i128;

    match contract.get_dy(i, j, dx).call().await {
        Ok(dy) if !dy.is_zero() => return Ok(dy),
        Ok(_) => {
            if !underlying {
                return Err(QuoteError::PoolDrained);
            }
        }
        Err(e) => {
            if !underlying {
                return Err(QuoteError::ProtocolRevert(e.to_string()));
            }
            debug!(error = %e, "get_dy reverted, falling back to get_dy_underlying");
        }
    }

    let dy = contract
        .get_dy_underlying(i, j, dx)
        .call()
        .await
        .map_err(|e| QuoteError::ProtocolRevert(e.to_string()))?;

    if dy.is_zero() {
        return Err(QuoteError::PoolDrained);
    }
    Ok(dy)
}
