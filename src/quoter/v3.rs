//! Concentrated-liquidity (v3) quoting via the off-chain quoter contract

use alloy::primitives::{
    aliases::{U160, U24},
    Address, U256,
};
use alloy::providers::Provider;
use alloy::sol;
use std::sync::Arc;
use tracing::debug;

use crate::error::QuoteError;

/// Fee tiers retried in order when the configured tier reverts
pub const RETRY_FEE_TIERS: [u32; 3] = [500, 3000, 10_000];

sol! {
    #[sol(rpc)]
    interface IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }

        function quoteExactInputSingle(QuoteExactInputSingleParams memory params)
            external
            returns (
                uint256 amountOut,
                uint160 sqrtPriceX96After,
                uint32 initializedTicksCrossed,
                uint256 gasEstimate
            );
    }
}

/// Result of a successful v3 quoter call
#[derive(Debug, Clone, Copy)]
pub struct V3Quote {
    pub amount_out: U256,
    pub fee_tier: u32,
    pub gas_estimate: u64,
}

/// Quote exact-input through the quoter contract, retrying across fee tiers
///
/// The configured tier is tried first; on revert the standard tiers
/// {500, 3000, 10000} are attempted in order and the first success wins.
pub async fn quote_exact_input<P>(
    provider: Arc<P>,
    quoter: Address,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
    preferred_tier: u32,
) -> Result<V3Quote, QuoteError>
where
    P: Provider + Clone + 'static,
{
    let contract = IQuoterV2::new(quoter, provider);

    let mut tiers: Vec<u32> = Vec::with_capacity(1 + RETRY_FEE_TIERS.len());
    tiers.push(preferred_tier);
    for t in RETRY_FEE_TIERS {
        if t != preferred_tier {
            tiers.push(t);
        }
    }

    let mut last_err: Option<QuoteError> = None;
    for tier in tiers {
        let params = IQuoterV2::QuoteExactInputSingleParams {
            tokenIn: token_in,
            tokenOut: token_out,
            amountIn: amount_in,
            fee: U24::from(tier),
            sqrtPriceLimitX96: U160::ZERO,
        };
        match contract.quoteExactInputSingle(params).call().await {
            Ok(result) => {
                if result.amountOut.is_zero() {
                    last_err = Some(QuoteError::PoolDrained);
                    continue;
                }
                return Ok(V3Quote {
                    amount_out: result.amountOut,
                    fee_tier: tier,
                    gas_estimate: result.gasEstimate.to::<u64>(),
                });
            }
            Err(e) => {
                debug!(tier, error = %e, "v3 quoter reverted, trying next fee tier");
                last_err = Some(QuoteError::ProtocolRevert(e.to_string()));
            }
        }
    }

    Err(last_err.unwrap_or(QuoteError::PoolDrained))
}
