//! Constant-product (v2) quoting from on-chain reserves
//!
//! Output amounts are computed locally with the x*y=k formula; only the
//! reserve read touches the chain.

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::sol;
use std::sync::Arc;

use crate::error::QuoteError;
use crate::types::u256_to_f64;

sol! {
    #[sol(rpc)]
    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
        function token0() external view returns (address);
        function token1() external view returns (address);
    }
}

/// Reserves snapshot, ordered (token0, token1)
#[derive(Debug, Clone, Copy)]
pub struct Reserves {
    pub reserve0: U256,
    pub reserve1: U256,
}

impl Reserves {
    /// Orient reserves for a swap of `token_in`
    pub fn oriented(&self, token_in: Address, token0: Address) -> (U256, U256) {
        if token_in == token0 {
            (self.reserve0, self.reserve1)
        } else {
            (self.reserve1, self.reserve0)
        }
    }
}

/// Read both reserves atomically from the pair contract
pub async fn fetch_reserves<P>(provider: Arc<P>, pool: Address) -> Result<Reserves, QuoteError>
where
    P: Provider + Clone + 'static,
{
    let pair = IUniswapV2Pair::new(pool, provider);
    let result = pair
        .getReserves()
        .call()
        .await
        .map_err(|e| QuoteError::ProtocolRevert(e.to_string()))?;

    Ok(Reserves {
        reserve0: U256::from(result.reserve0),
        reserve1: U256::from(result.reserve1),
    })
}

/// Constant-product output with protocol fee
///
/// amountOut = (amountIn * (10000 - feeBps) * reserveOut)
///           / (reserveIn * 10000 + amountIn * (10000 - feeBps))
pub fn amount_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee_bps: u32,
) -> Result<U256, QuoteError> {
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(QuoteError::PoolDrained);
    }
    if amount_in.is_zero() {
        return Ok(U256::ZERO);
    }
    let fee_num = U256::from(10_000u32.saturating_sub(fee_bps));
    let amount_in_with_fee = amount_in * fee_num;
    let numerator = amount_in_with_fee * reserve_out;
    let denominator = reserve_in * U256::from(10_000u32) + amount_in_with_fee;
    Ok(numerator / denominator)
}

/// Pre-trade marginal price (reserve_out / reserve_in) after the fee haircut
pub fn spot_price(reserve_in: U256, reserve_out: U256, fee_bps: u32) -> f64 {
    let rin = u256_to_f64(reserve_in);
    let rout = u256_to_f64(reserve_out);
    if rin <= 0.0 {
        return 0.0;
    }
    (rout / rin) * (1.0 - fee_bps as f64 / 10_000.0)
}
