//! Flash-loan sizing via bounded binary search
//!
//! The search interval is [min_loan_usd, min(target_usd, tvl_share_cap x
//! thinnest pool TVL)]. Each probe re-quotes the route at the candidate
//! size and runs the full profit evaluation; the search walks toward the
//! best net profit and stops on convergence or after 24 probes.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, trace};

use crate::error::{QuoteError, RejectReason, SizerError};
use crate::gas::GasForecast;
use crate::oracle::UsdPricer;
use crate::profit::{EvalError, ProfitEngine, ProfitReport};
use crate::quoter::RouteQuoter;
use crate::types::{decimal_to_amount, QuotedRoute, Route, TokenId, TokenRegistry};

/// Hard cap on probes per optimization
const MAX_ITERATIONS: u32 = 24;

/// Convergence: improvement below this fraction of the best net stops the search
const CONVERGENCE_FRACTION: f64 = 0.001;

/// Sizing abort: structural, quoting, or evaluation failure
#[derive(Debug, Error)]
pub enum SizerAbort {
    #[error(transparent)]
    Sizer(#[from] SizerError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl SizerAbort {
    pub fn kind(&self) -> &'static str {
        match self {
            SizerAbort::Sizer(e) => e.kind(),
            SizerAbort::Quote(e) => e.kind(),
            SizerAbort::Eval(e) => e.kind(),
        }
    }
}

/// Sizer bounds
#[derive(Debug, Clone)]
pub struct SizerConfig {
    pub min_loan_usd: Decimal,
    pub target_loan_usd: Decimal,
    /// Fraction of the thinnest pool's TVL a loan may consume
    pub tvl_share_cap: Decimal,
}

/// Route-level facts the sizer needs beyond the route itself
#[derive(Debug, Clone)]
pub struct SizingContext {
    /// TVL of the thinnest pool in the route, in USD
    pub thinnest_pool_tvl_usd: Decimal,
    pub loan_decimals: u8,
    pub loan_price_usd: Decimal,
    pub forecast: GasForecast,
    pub flash_fee_bps: u32,
    pub native_token: TokenId,
}

/// Optimal loan size search
pub struct LoanSizer {
    cfg: SizerConfig,
}

impl LoanSizer {
    pub fn new(cfg: SizerConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &SizerConfig {
        &self.cfg
    }

    /// Find the best feasible loan size for a route
    ///
    /// Returns the quoted route and profit report at the winning size, or
    /// an abort describing why no size works.
    pub async fn optimize(
        &self,
        route: &Route,
        quoter: &dyn RouteQuoter,
        engine: &ProfitEngine,
        pricer: &dyn UsdPricer,
        registry: &TokenRegistry,
        ctx: &SizingContext,
    ) -> Result<(QuotedRoute, ProfitReport), SizerAbort> {
        if ctx.thinnest_pool_tvl_usd < self.cfg.min_loan_usd {
            return Err(SizerError::InsufficientLiquidity.into());
        }
        let cap_usd = (ctx.thinnest_pool_tvl_usd * self.cfg.tvl_share_cap)
            .min(self.cfg.target_loan_usd);
        if cap_usd < self.cfg.min_loan_usd {
            return Err(SizerError::InsufficientLiquidity.into());
        }

        // Probe the minimum size: a negative spread here means the spread
        // is gone at any size
        let min_amount = self.usd_to_amount(self.cfg.min_loan_usd, ctx);
        let min_quoted = quoter.quote_route(route, min_amount).await?;
        if min_quoted.amount_out_end() < min_amount {
            return Err(SizerError::UnprofitableAtMinimum.into());
        }

        let mut lo = self.cfg.min_loan_usd;
        let mut hi = cap_usd;
        let mut best: Option<(QuotedRoute, ProfitReport)> = None;

        for iteration in 0..MAX_ITERATIONS {
            let mid = (lo + hi) / Decimal::TWO;
            let amount = self.usd_to_amount(mid, ctx);
            if amount.is_zero() {
                break;
            }

            let quoted = quoter.quote_route(route, amount).await?;
            match engine
                .evaluate(
                    &quoted,
                    &ctx.forecast,
                    pricer,
                    registry,
                    ctx.flash_fee_bps,
                    ctx.native_token,
                )
                .await
            {
                Ok(report) => {
                    let improved = match &best {
                        Some((_, prev)) => report.net_profit_usd > prev.net_profit_usd,
                        None => true,
                    };
                    if improved {
                        let delta = match &best {
                            Some((_, prev)) => report.net_profit_usd - prev.net_profit_usd,
                            None => report.net_profit_usd,
                        };
                        let prev_best = best
                            .as_ref()
                            .map(|(_, p)| p.net_profit_usd)
                            .unwrap_or(Decimal::ZERO);
                        best = Some((quoted, report));
                        lo = mid;
                        // Converged when the gain is a rounding error
                        if prev_best > Decimal::ZERO {
                            let frac = (delta / prev_best).to_f64().unwrap_or(1.0);
                            if frac < CONVERGENCE_FRACTION {
                                trace!(iteration, "sizer converged");
                                break;
                            }
                        }
                    } else {
                        hi = mid;
                    }
                }
                Err(EvalError::Reject(RejectReason::MinProfitBelowFloor)) => {
                    // Fixed costs dominate at this size; push larger
                    lo = mid;
                }
                Err(EvalError::Reject(RejectReason::TwapDeviationTooHigh)) => {
                    // Size-independent: the route is suspect at any size
                    return Err(EvalError::Reject(RejectReason::TwapDeviationTooHigh).into());
                }
                Err(EvalError::Reject(_)) => {
                    // Impact or slippage ate the spread; shrink
                    hi = mid;
                }
                Err(e @ EvalError::Price(_)) => return Err(e.into()),
            }

            if hi - lo < self.cfg.min_loan_usd / Decimal::from(100u32) {
                break;
            }
        }

        match best {
            Some(win) => {
                debug!(
                    net = %win.1.net_profit_usd,
                    loan = %win.1.loan_amount,
                    "sizer selected loan"
                );
                Ok(win)
            }
            None => Err(SizerError::NoFeasibleSize.into()),
        }
    }

    fn usd_to_amount(&self, usd: Decimal, ctx: &SizingContext) -> alloy::primitives::U256 {
        if ctx.loan_price_usd.is_zero() {
            return alloy::primitives::U256::ZERO;
        }
        decimal_to_amount(usd / ctx.loan_price_usd, ctx.loan_decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PriceError;
    use crate::gas::{GasTrend, GasVolatility};
    use crate::profit::ProfitConfig;
    use crate::quoter::v2;
    use crate::types::{
        u256_to_f64, HopExtra, HopKind, Protocol, Quote, QuoteSource, Route, RouteHop,
        TokenDeployment, TokenRef, TokenVariant,
    };
    use alloy::primitives::{address, Address, U256};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;

    const USDC: Address = address!("0000000000000000000000000000000000000010");
    const WMATIC: Address = address!("0000000000000000000000000000000000000020");
    const P1: Address = address!("00000000000000000000000000000000000000e1");
    const P2: Address = address!("00000000000000000000000000000000000000e2");

    /// In-memory v2 pools quoted with the real constant-product math.
    /// Reserves are in raw 6-decimal units on both sides to keep the
    /// arithmetic easy to follow.
    struct SimPools {
        reserves: Mutex<HashMap<Address, (U256, U256)>>, // keyed by pool, (in, out) oriented per hop order
        fee_bps: u32,
    }

    #[async_trait]
    impl RouteQuoter for SimPools {
        async fn quote_route(
            &self,
            route: &Route,
            amount_in: U256,
        ) -> Result<QuotedRoute, QuoteError> {
            let reserves = self.reserves.lock();
            let mut amount = amount_in;
            let mut quotes = Vec::new();
            for hop in route.hops() {
                let (rin, rout) = *reserves
                    .get(&hop.pool_or_bridge)
                    .ok_or_else(|| QuoteError::ProtocolRevert("unknown pool".into()))?;
                let out = v2::amount_out(amount, rin, rout, self.fee_bps)?;
                quotes.push(
                    Quote::new(
                        hop.pool_or_bridge,
                        hop.token_in.address,
                        hop.token_out.address,
                        amount,
                        out,
                        self.fee_bps,
                        v2::spot_price(rin, rout, self.fee_bps),
                        1,
                        QuoteSource::Reserves,
                    )
                    .unwrap(),
                );
                amount = out;
            }
            Ok(QuotedRoute {
                route: route.clone(),
                hop_quotes: quotes,
                bridge_fee_usd: Decimal::ZERO,
                gas_units: crate::quoter::route_gas_units(route),
            })
        }
    }

    struct OnePricer;

    #[async_trait]
    impl UsdPricer for OnePricer {
        async fn price_usd(&self, _t: TokenId, _c: u64) -> Result<Decimal, PriceError> {
            Ok(Decimal::ONE)
        }
    }

    fn registry() -> Arc<TokenRegistry> {
        Arc::new(TokenRegistry::new(vec![
            TokenDeployment {
                token: TokenId(0),
                chain_id: 137,
                variant: TokenVariant::Bridged,
                address: USDC,
                decimals: 6,
                symbol: "USDC".into(),
            },
            TokenDeployment {
                token: TokenId(1),
                chain_id: 137,
                variant: TokenVariant::Canonical,
                address: WMATIC,
                decimals: 6,
                symbol: "WMATIC".into(),
            },
        ]))
    }

    fn route() -> Route {
        let usdc = TokenRef {
            id: TokenId(0),
            variant: TokenVariant::Bridged,
            chain_id: 137,
            address: USDC,
        };
        let wmatic = TokenRef {
            id: TokenId(1),
            variant: TokenVariant::Canonical,
            chain_id: 137,
            address: WMATIC,
        };
        Route::new(vec![
            RouteHop {
                pool_or_bridge: P1,
                kind: HopKind::Swap(Protocol::V2),
                token_in: usdc,
                token_out: wmatic,
                extra: HopExtra::None {},
            },
            RouteHop {
                pool_or_bridge: P2,
                kind: HopKind::Swap(Protocol::V2),
                token_in: wmatic,
                token_out: usdc,
                extra: HopExtra::None {},
            },
        ])
        .unwrap()
    }

    fn ctx(tvl_usd: Decimal) -> SizingContext {
        SizingContext {
            thinnest_pool_tvl_usd: tvl_usd,
            loan_decimals: 6,
            loan_price_usd: Decimal::ONE,
            forecast: GasForecast {
                trend: GasTrend::Stable,
                predicted_wei: 30_000_000_000,
                volatility: GasVolatility::Low,
                wait_advisory: false,
            },
            flash_fee_bps: 9,
            native_token: TokenId(0),
        }
    }

    fn sizer(min_usd: Decimal, target_usd: Decimal) -> LoanSizer {
        LoanSizer::new(SizerConfig {
            min_loan_usd: min_usd,
            target_loan_usd: target_usd,
            tvl_share_cap: dec!(0.20),
        })
    }

    fn engine() -> ProfitEngine {
        ProfitEngine::new(ProfitConfig {
            max_impact_bps: 500,
            max_twap_dev_bps: 50_000, // deviation gate exercised elsewhere
            min_profit_usd: dec!(5.0),
        })
    }

    /// Pools with a real spread: P1 prices WMATIC at 1 USDC : 1.1 WMATIC,
    /// P2 prices it back at 1:1
    fn spread_pools() -> SimPools {
        let mut m = HashMap::new();
        let unit = U256::from(1_000_000u64); // one 6-decimal token
        m.insert(P1, (unit * U256::from(1_000_000u64), unit * U256::from(1_100_000u64)));
        m.insert(P2, (unit * U256::from(1_000_000u64), unit * U256::from(1_000_000u64)));
        SimPools {
            reserves: Mutex::new(m),
            fee_bps: 30,
        }
    }

    #[tokio::test]
    async fn respects_tvl_share_cap() {
        let pools = spread_pools();
        let s = sizer(dec!(100.0), dec!(20000.0));
        // Thinnest pool $50,000, cap 20% -> loan must stay <= $10,000
        let (quoted, report) = s
            .optimize(&route(), &pools, &engine(), &OnePricer, &registry(), &ctx(dec!(50000.0)))
            .await
            .unwrap();
        let loan_usd = u256_to_f64(quoted.amount_in()) / 1e6;
        assert!(loan_usd <= 10_000.0 + 1e-6, "loan {loan_usd} breaches TVL cap");
        assert!(report.net_profit_usd >= dec!(5.0));
    }

    #[tokio::test]
    async fn thin_pool_is_insufficient_liquidity() {
        let pools = spread_pools();
        let s = sizer(dec!(100.0), dec!(20000.0));
        let err = s
            .optimize(&route(), &pools, &engine(), &OnePricer, &registry(), &ctx(dec!(50.0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_liquidity");
    }

    #[tokio::test]
    async fn dead_spread_aborts_at_minimum() {
        // Both pools 1:1 -> fees guarantee a loss in any direction
        let mut m = HashMap::new();
        let r = U256::from(1_000_000_000_000u64);
        m.insert(P1, (r, r));
        m.insert(P2, (r, r));
        let pools = SimPools {
            reserves: Mutex::new(m),
            fee_bps: 30,
        };
        let s = sizer(dec!(100.0), dec!(20000.0));
        let err = s
            .optimize(&route(), &pools, &engine(), &OnePricer, &registry(), &ctx(dec!(50000.0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unprofitable_at_minimum");
    }

    #[tokio::test]
    async fn grows_loan_beyond_minimum_when_profitable() {
        let pools = spread_pools();
        let s = sizer(dec!(100.0), dec!(1000000.0));
        let (quoted, _) = s
            .optimize(&route(), &pools, &engine(), &OnePricer, &registry(), &ctx(dec!(2000000.0)))
            .await
            .unwrap();
        let loan_usd = u256_to_f64(quoted.amount_in()) / 1e6;
        assert!(loan_usd > 100.0, "sizer should grow past the minimum, got {loan_usd}");
    }
}
