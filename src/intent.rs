//! Execution intent wire format (schema version 1)
//!
//! Intents are the only thing crossing the Executor boundary: a JSON
//! object carrying the logical route, the loan, and the estimate block,
//! sealed with a keccak-256 integrity hash over the canonical payload.

use alloy::primitives::keccak256;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::types::{HopExtra, Opportunity, TokenVariant};

/// Current intent schema version
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentToken {
    pub id: u8,
    pub variant: TokenVariant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentLoan {
    pub token_id: u8,
    pub variant: TokenVariant,
    /// Raw amount as a decimal string (U256 does not fit JSON numbers)
    pub amount_wei: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentHop {
    /// "V2" | "V3" | "STABLE" | "BRIDGE"
    pub protocol: String,
    pub pool_or_bridge: String,
    pub token_in: IntentToken,
    pub token_out: IntentToken,
    pub extra: HopExtra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentEstimates {
    pub expected_out_wei: String,
    pub gross_profit_usd: f64,
    pub gas_cost_usd: f64,
    pub flash_fee_usd: f64,
    pub bridge_fee_usd: f64,
    pub net_profit_usd: f64,
    pub price_impact_bps: u32,
    pub twap_deviation_bps: u32,
    pub score: f64,
}

/// One signed-ready trade description for the Executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionIntent {
    pub schema_version: u32,
    pub fingerprint: String,
    pub chain_id: u64,
    pub loan: IntentLoan,
    pub route: Vec<IntentHop>,
    pub estimates: IntentEstimates,
    pub generated_at_ms: u64,
    /// keccak-256 of the canonical payload (this field empty), hex
    pub integrity: String,
}

impl ExecutionIntent {
    pub fn from_opportunity(opp: &Opportunity) -> Self {
        let route = opp
            .route
            .hops()
            .iter()
            .map(|h| IntentHop {
                protocol: h.kind.protocol_tag().to_string(),
                pool_or_bridge: h.pool_or_bridge.to_string(),
                token_in: IntentToken {
                    id: h.token_in.id.0,
                    variant: h.token_in.variant,
                },
                token_out: IntentToken {
                    id: h.token_out.id.0,
                    variant: h.token_out.variant,
                },
                extra: h.extra,
            })
            .collect();

        let mut intent = Self {
            schema_version: SCHEMA_VERSION,
            fingerprint: opp.fingerprint.to_hex(),
            chain_id: opp.chain_id,
            loan: IntentLoan {
                token_id: opp.loan_token.id.0,
                variant: opp.loan_token.variant,
                amount_wei: opp.loan_amount.to_string(),
            },
            route,
            estimates: IntentEstimates {
                expected_out_wei: opp.expected_out.to_string(),
                gross_profit_usd: opp.gross_profit_usd.to_f64().unwrap_or(0.0),
                gas_cost_usd: opp.gas_cost_usd.to_f64().unwrap_or(0.0),
                flash_fee_usd: opp.flash_fee_usd.to_f64().unwrap_or(0.0),
                bridge_fee_usd: opp.bridge_fee_usd.to_f64().unwrap_or(0.0),
                net_profit_usd: opp.net_profit_usd.to_f64().unwrap_or(0.0),
                price_impact_bps: opp.price_impact_bps,
                twap_deviation_bps: opp.twap_deviation_bps,
                score: opp.score.to_f64().unwrap_or(0.0),
            },
            generated_at_ms: opp.generated_at_ms,
            integrity: String::new(),
        };
        intent.integrity = intent.compute_integrity();
        intent
    }

    /// Hash of the canonical payload with the integrity field empty
    fn compute_integrity(&self) -> String {
        let mut canonical = self.clone();
        canonical.integrity = String::new();
        // Struct field order is stable, so the JSON encoding is canonical
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(keccak256(&bytes))
    }

    /// Verify the integrity seal
    pub fn verify_integrity(&self) -> bool {
        self.integrity == self.compute_integrity()
    }

    /// Spool filename: `<unix_ms>-<fingerprint>.json`
    pub fn spool_filename(&self) -> String {
        format!("{}-{}.json", self.generated_at_ms, self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::types::{
        HopKind, Protocol, Route, RouteHop, TokenId, TokenRef,
    };
    use alloy::primitives::{address, Address, U256};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn sample() -> Opportunity {
        let usdc = TokenRef {
            id: TokenId(1),
            variant: TokenVariant::Canonical,
            chain_id: 137,
            address: address!("0000000000000000000000000000000000000010"),
        };
        let wmatic = TokenRef {
            id: TokenId(3),
            variant: TokenVariant::Wrapped,
            chain_id: 137,
            address: address!("0000000000000000000000000000000000000020"),
        };
        let hop = |p: Address, a: TokenRef, b: TokenRef, proto: Protocol, extra: HopExtra| RouteHop {
            pool_or_bridge: p,
            kind: HopKind::Swap(proto),
            token_in: a,
            token_out: b,
            extra,
        };
        let route = Route::new(vec![
            hop(
                address!("00000000000000000000000000000000000000a1"),
                usdc,
                wmatic,
                Protocol::V3,
                HopExtra::V3 { fee_tier: 3000 },
            ),
            hop(
                address!("00000000000000000000000000000000000000a2"),
                wmatic,
                usdc,
                Protocol::V2,
                HopExtra::None {},
            ),
        ])
        .unwrap();
        Opportunity {
            loan_token: route.loan_token(),
            route,
            loan_amount: U256::from(1_000_000_000_000_000_000u128),
            expected_out: U256::from(1_011_300_000_000_000_000u128),
            gross_profit_usd: dec!(12.5),
            gas_cost_usd: dec!(1.2),
            flash_fee_usd: dec!(0.0),
            bridge_fee_usd: Decimal::ZERO,
            net_profit_usd: dec!(11.3),
            price_impact_bps: 78,
            twap_deviation_bps: 42,
            score: dec!(11.21),
            fingerprint: Fingerprint(0xdead_beef_cafe_babe_1234_5678_9abc_def0),
            chain_id: 137,
            generated_at_ms: 1_737_060_000_123,
        }
    }

    #[test]
    fn round_trip_preserves_value() {
        let intent = ExecutionIntent::from_opportunity(&sample());
        let json = serde_json::to_string(&intent).unwrap();
        let back: ExecutionIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(intent, back);
        assert_eq!(back.schema_version, SCHEMA_VERSION);
        assert!(back.verify_integrity());
    }

    #[test]
    fn wire_shape_matches_contract() {
        let intent = ExecutionIntent::from_opportunity(&sample());
        let value: serde_json::Value = serde_json::to_value(&intent).unwrap();
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["chain_id"], 137);
        assert_eq!(value["loan"]["token_id"], 1);
        assert_eq!(value["loan"]["variant"], "CANONICAL");
        assert_eq!(value["loan"]["amount_wei"], "1000000000000000000");
        assert_eq!(value["route"][0]["protocol"], "V3");
        assert_eq!(value["route"][0]["extra"]["fee_tier"], 3000);
        assert_eq!(value["route"][1]["extra"], serde_json::json!({}));
        assert_eq!(value["estimates"]["net_profit_usd"], 11.3);
        assert_eq!(value["generated_at_ms"], 1_737_060_000_123u64);
    }

    #[test]
    fn tampering_breaks_integrity() {
        let mut intent = ExecutionIntent::from_opportunity(&sample());
        assert!(intent.verify_integrity());
        intent.estimates.net_profit_usd = 999.0;
        assert!(!intent.verify_integrity());
    }

    #[test]
    fn spool_filename_format() {
        let intent = ExecutionIntent::from_opportunity(&sample());
        let name = intent.spool_filename();
        assert!(name.starts_with("1737060000123-"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "1737060000123-".len() + 32 + ".json".len());
    }
}
