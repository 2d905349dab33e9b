//! Net-profit evaluation for quoted routes
//!
//! All monetary math runs in raw U256 amounts and Decimal USD; USD
//! conversion goes through the price oracle at evaluation time and is
//! never cached across ticks. Rejection rules fire in a fixed order and
//! every rejection is typed.

use alloy::primitives::U256;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::trace;

use crate::error::{PriceError, RejectReason};
use crate::gas::GasForecast;
use crate::oracle::UsdPricer;
use crate::types::{amount_to_decimal, HopKind, QuotedRoute, TokenId, TokenRegistry};

/// Profit evaluation failure: a typed rejection or an oracle miss
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Reject(#[from] RejectReason),

    #[error(transparent)]
    Price(#[from] PriceError),
}

impl EvalError {
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Reject(r) => r.kind(),
            EvalError::Price(p) => p.kind(),
        }
    }
}

/// Engine thresholds (engine-wide, chain-independent)
#[derive(Debug, Clone)]
pub struct ProfitConfig {
    pub max_impact_bps: u32,
    pub max_twap_dev_bps: u32,
    pub min_profit_usd: Decimal,
}

/// Full cost breakdown for an evaluated route at one loan size
#[derive(Debug, Clone)]
pub struct ProfitReport {
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
    pub gas_units: u64,
}

/// Route profitability evaluator
pub struct ProfitEngine {
    cfg: ProfitConfig,
}

impl ProfitEngine {
    pub fn new(cfg: ProfitConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ProfitConfig {
        &self.cfg
    }

    /// Evaluate a quoted route; rejections fire in documented order
    pub async fn evaluate(
        &self,
        quoted: &QuotedRoute,
        forecast: &GasForecast,
        pricer: &dyn UsdPricer,
        registry: &TokenRegistry,
        flash_fee_bps: u32,
        native_token: TokenId,
    ) -> Result<ProfitReport, EvalError> {
        let route = &quoted.route;
        let loan = route.loan_token();
        let chain_id = route.home_chain();
        let loan_amount = quoted.amount_in();
        let expected_out = quoted.amount_out_end();

        // 1. Zero output is structurally infeasible
        if expected_out.is_zero() {
            return Err(RejectReason::Infeasible.into());
        }

        // 2. The loop must return more of the loan token than it borrowed
        if expected_out <= loan_amount {
            return Err(RejectReason::NotProfitable.into());
        }

        // 3. Price impact cap
        let price_impact_bps = quoted.price_impact_bps();
        if price_impact_bps > self.cfg.max_impact_bps {
            return Err(RejectReason::PriceImpactTooHigh.into());
        }

        // 4. Spot-vs-oracle deviation cap (manipulation filter)
        let twap_deviation_bps = self
            .max_hop_deviation_bps(quoted, pricer, registry)
            .await?;
        if twap_deviation_bps > self.cfg.max_twap_dev_bps {
            return Err(RejectReason::TwapDeviationTooHigh.into());
        }

        // Cost model, all in USD at evaluation time
        let loan_decimals = registry
            .deployment(loan.id, loan.chain_id, loan.variant)
            .map(|d| d.decimals)
            .unwrap_or(18);
        let loan_price_usd = pricer.price_usd(loan.id, chain_id).await?;
        let native_price_usd = pricer.price_usd(native_token, chain_id).await?;

        let gross_tokens = amount_to_decimal(expected_out - loan_amount, loan_decimals);
        let gross_profit_usd = gross_tokens * loan_price_usd;

        let gas_cost_usd = gas_cost_usd(quoted.gas_units, forecast.predicted_wei, native_price_usd);

        let loan_usd = amount_to_decimal(loan_amount, loan_decimals) * loan_price_usd;
        let flash_fee_usd = loan_usd * Decimal::from(flash_fee_bps) / Decimal::from(10_000u32);

        let bridge_fee_usd = quoted.bridge_fee_usd;

        let net_profit_usd = gross_profit_usd - gas_cost_usd - flash_fee_usd - bridge_fee_usd;

        // 5. Floor check; exactly at the floor is accepted
        if net_profit_usd < self.cfg.min_profit_usd {
            trace!(%net_profit_usd, "below profit floor");
            return Err(RejectReason::MinProfitBelowFloor.into());
        }

        let score = net_profit_usd
            * (Decimal::ONE - Decimal::from(price_impact_bps) / Decimal::from(10_000u32));

        Ok(ProfitReport {
            loan_amount,
            expected_out,
            gross_profit_usd,
            gas_cost_usd,
            flash_fee_usd,
            bridge_fee_usd,
            net_profit_usd,
            price_impact_bps,
            twap_deviation_bps,
            score,
            gas_units: quoted.gas_units,
        })
    }

    /// Worst spot-vs-oracle deviation across the route's swap hops
    async fn max_hop_deviation_bps(
        &self,
        quoted: &QuotedRoute,
        pricer: &dyn UsdPricer,
        registry: &TokenRegistry,
    ) -> Result<u32, PriceError> {
        let mut worst = 0u32;
        for (hop, quote) in quoted.route.hops().iter().zip(&quoted.hop_quotes) {
            if hop.kind == HopKind::Bridge || quote.spot_price <= 0.0 {
                continue;
            }
            let usd_in = pricer.price_usd(hop.token_in.id, hop.token_in.chain_id).await?;
            let usd_out = pricer
                .price_usd(hop.token_out.id, hop.token_out.chain_id)
                .await?;
            if usd_in.is_zero() || usd_out.is_zero() {
                continue;
            }
            let dec_in = registry
                .deployment(hop.token_in.id, hop.token_in.chain_id, hop.token_in.variant)
                .map(|d| d.decimals)
                .unwrap_or(18) as i32;
            let dec_out = registry
                .deployment(hop.token_out.id, hop.token_out.chain_id, hop.token_out.variant)
                .map(|d| d.decimals)
                .unwrap_or(18) as i32;

            // Oracle-implied raw price: (usd_in/usd_out) * 10^(dec_out - dec_in)
            let usd_in_f = decimal_to_f64(usd_in);
            let usd_out_f = decimal_to_f64(usd_out);
            let implied = (usd_in_f / usd_out_f) * 10_f64.powi(dec_out - dec_in);
            if implied <= 0.0 || !implied.is_finite() {
                continue;
            }
            let dev = ((quote.spot_price - implied) / implied).abs() * 10_000.0;
            worst = worst.max(dev.round() as u32);
        }
        Ok(worst)
    }
}

/// gas_units x gas_price(wei) x native USD price, scaled from wei
pub fn gas_cost_usd(gas_units: u64, gas_price_wei: u128, native_price_usd: Decimal) -> Decimal {
    let wei = gas_units as u128 as f64 * gas_price_wei as f64;
    let native = wei / 1e18;
    Decimal::from_f64(native).unwrap_or_default() * native_price_usd
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::{GasForecast, GasTrend, GasVolatility};
    use crate::types::{
        HopExtra, Protocol, Quote, QuoteSource, Route, RouteHop, TokenDeployment, TokenRef,
        TokenVariant,
    };
    use alloy::primitives::{address, Address};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;

    const USDC: Address = address!("0000000000000000000000000000000000000010");
    const WMATIC: Address = address!("0000000000000000000000000000000000000020");
    const P1: Address = address!("00000000000000000000000000000000000000e1");
    const P2: Address = address!("00000000000000000000000000000000000000e2");

    struct TablePricer(HashMap<TokenId, Decimal>);

    #[async_trait]
    impl UsdPricer for TablePricer {
        async fn price_usd(
            &self,
            token: TokenId,
            _chain_id: u64,
        ) -> Result<Decimal, PriceError> {
            self.0
                .get(&token)
                .copied()
                .ok_or(PriceError::Unavailable {
                    chain_id: 0,
                    token: token.0,
                })
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
                variant: TokenVariant::Wrapped,
                address: WMATIC,
                decimals: 18,
                symbol: "WMATIC".into(),
            },
        ]))
    }

    fn tref(id: u8, variant: TokenVariant, addr: Address) -> TokenRef {
        TokenRef {
            id: TokenId(id),
            variant,
            chain_id: 137,
            address: addr,
        }
    }

    fn forecast(gwei: u128) -> GasForecast {
        GasForecast {
            trend: GasTrend::Stable,
            predicted_wei: gwei * 1_000_000_000,
            volatility: GasVolatility::Low,
            wait_advisory: false,
        }
    }

    /// USDC -> WMATIC -> USDC loop with explicit amounts (raw units)
    ///
    /// The intermediate amount tracks `spot1` exactly so hop 1 contributes
    /// no measured impact; hop 2's impact follows from `out_raw` vs `spot2`.
    fn quoted(loan_raw: u128, out_raw: u128, spot1: f64, spot2: f64) -> QuotedRoute {
        let usdc = tref(0, TokenVariant::Bridged, USDC);
        let wmatic = tref(1, TokenVariant::Wrapped, WMATIC);
        let mid_raw = (spot1 * loan_raw as f64) as u128;
        let route = Route::new(vec![
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
        .unwrap();
        let q1 = Quote::new(
            P1,
            USDC,
            WMATIC,
            U256::from(loan_raw),
            U256::from(mid_raw),
            30,
            spot1,
            1,
            QuoteSource::Reserves,
        )
        .unwrap();
        let q2 = Quote::new(
            P2,
            WMATIC,
            USDC,
            U256::from(mid_raw),
            U256::from(out_raw),
            30,
            spot2,
            1,
            QuoteSource::Reserves,
        )
        .unwrap();
        QuotedRoute {
            route,
            hop_quotes: vec![q1, q2],
            bridge_fee_usd: Decimal::ZERO,
            gas_units: 330_000,
        }
    }

    fn engine(min_profit: Decimal) -> ProfitEngine {
        ProfitEngine::new(ProfitConfig {
            max_impact_bps: 500,
            max_twap_dev_bps: 500,
            min_profit_usd: min_profit,
        })
    }

    fn pricer() -> TablePricer {
        let mut m = HashMap::new();
        m.insert(TokenId(0), dec!(1.0));
        m.insert(TokenId(1), dec!(0.50));
        TablePricer(m)
    }

    // Raw spot prices consistent with $1 USDC / $0.50 WMATIC:
    // USDC(6) -> WMATIC(18): 2 WMATIC per USDC -> raw 2e12
    // WMATIC(18) -> USDC(6): 0.5 USDC per WMATIC -> raw 0.5e-12
    const SPOT1: f64 = 2.0e12;
    const SPOT2: f64 = 0.5e-12;

    #[tokio::test]
    async fn profitable_loop_accepted() {
        // Borrow 10,000 USDC, come back with 10,100
        let quoted = quoted(10_000_000_000, 10_100_000_000, SPOT1, SPOT2);
        let report = engine(dec!(5.0))
            .evaluate(&quoted, &forecast(30), &pricer(), &registry(), 9, TokenId(1))
            .await
            .unwrap();
        // gross = 100 USDC = $100; flash fee = 9 bps of 10,000 = $9
        assert_eq!(report.gross_profit_usd, dec!(100.0));
        assert_eq!(report.flash_fee_usd, dec!(9.0));
        assert!(report.gas_cost_usd > Decimal::ZERO);
        let expected_net =
            report.gross_profit_usd - report.gas_cost_usd - report.flash_fee_usd;
        assert_eq!(report.net_profit_usd, expected_net);
        assert!(report.score <= report.net_profit_usd);
    }

    #[tokio::test]
    async fn losing_loop_rejected() {
        let quoted = quoted(10_000_000_000, 9_900_000_000, SPOT1, SPOT2);
        let err = engine(dec!(5.0))
            .evaluate(&quoted, &forecast(30), &pricer(), &registry(), 9, TokenId(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_profitable");
    }

    #[tokio::test]
    async fn floor_boundary_is_inclusive() {
        // Net must land exactly on the floor: gross $14.0, flash 0 bps,
        // zero gas price -> net = 14.0; floor 14.0 accepts
        let quoted1 = quoted(10_000_000_000, 10_014_000_000, SPOT1, SPOT2);
        let report = engine(dec!(14.0))
            .evaluate(&quoted1, &forecast(0), &pricer(), &registry(), 0, TokenId(1))
            .await
            .unwrap();
        assert_eq!(report.net_profit_usd, dec!(14.0));

        // One cent under the floor rejects
        let quoted2 = quoted(10_000_000_000, 10_013_990_000, SPOT1, SPOT2);
        let err = engine(dec!(14.0))
            .evaluate(&quoted2, &forecast(0), &pricer(), &registry(), 0, TokenId(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "min_profit_below_floor");
    }

    #[tokio::test]
    async fn manipulation_deviation_rejected() {
        // Spot says 3 WMATIC per USDC while the oracle implies 2: 50% off.
        // Hop 2's spot matches its execution so impact stays at zero and
        // the deviation gate is the one that fires.
        let quoted = quoted(10_000_000_000, 10_100_000_000, 3.0e12, 3.3667e-13);
        let err = engine(dec!(5.0))
            .evaluate(&quoted, &forecast(30), &pricer(), &registry(), 9, TokenId(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "twap_deviation_too_high");
    }

    #[tokio::test]
    async fn net_identity_holds() {
        let quoted = quoted(10_000_000_000, 10_200_000_000, SPOT1, SPOT2);
        let report = engine(dec!(5.0))
            .evaluate(&quoted, &forecast(45), &pricer(), &registry(), 5, TokenId(1))
            .await
            .unwrap();
        assert_eq!(
            report.net_profit_usd,
            report.gross_profit_usd
                - report.gas_cost_usd
                - report.flash_fee_usd
                - report.bridge_fee_usd
        );
    }
}
