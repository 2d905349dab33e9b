//! Engine configuration, supplied as a value to the supervisor
//!
//! There is no environment lookup here: the embedding service builds an
//! `EngineConfig` (from file, flags, or anything else) and hands it to
//! `EngineSupervisor::new`. Reload swaps a fresh value at a tick boundary.

use alloy::primitives::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::types::{ChainId, PoolMeta, Protocol, TokenDeployment, TokenId};

/// Token scan tiers: T1 every tick, T2 every 2nd, T3 every 5th by default
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierSchedule {
    pub t1_every: u32,
    pub t2_every: u32,
    pub t3_every: u32,
}

impl Default for TierSchedule {
    fn default() -> Self {
        Self {
            t1_every: 1,
            t2_every: 2,
            t3_every: 5,
        }
    }
}

/// Token tier assignment per chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierAssignment {
    pub tier1: Vec<TokenId>,
    pub tier2: Vec<TokenId>,
    pub tier3: Vec<TokenId>,
}

/// Per-chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    /// Gas ceiling in wei; predictions saturate here and the gate rejects above it
    pub gas_ceiling_wei: u128,
    /// Wrapped-native token id (gas cost conversion)
    pub wrapped_native: TokenId,
    /// Stable anchor token id used as the TWAP USD quote leg
    pub usd_anchor: TokenId,
    /// Flash-loan provider fee in basis points
    pub flash_fee_bps: u32,
    /// Per-chain tick period override
    #[serde(default)]
    pub tick_period_ms: Option<u64>,
    /// RPC endpoints, primary first
    #[serde(default)]
    pub rpc_endpoints: Vec<String>,
    pub tiers: TierAssignment,
}

/// Pool table row (loaded from config or discovery)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfigEntry {
    pub chain_id: ChainId,
    pub protocol: Protocol,
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub fee_bps: u32,
    pub meta: PoolMeta,
}

/// Chainlink feed registration: token deployment address -> aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfigEntry {
    pub chain_id: ChainId,
    pub token: Address,
    pub aggregator: Address,
}

/// Full engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum admissible net profit in USD
    #[serde(default = "defaults::min_profit_usd")]
    pub min_profit_usd: Decimal,

    /// Price impact cap in basis points
    #[serde(default = "defaults::max_impact_bps")]
    pub max_impact_bps: u32,

    /// Spot-vs-TWAP deviation cap in basis points
    #[serde(default = "defaults::max_twap_dev_bps")]
    pub max_twap_dev_bps: u32,

    /// Share of the thinnest pool's TVL a loan may consume
    #[serde(default = "defaults::tvl_share_cap")]
    pub tvl_share_cap: Decimal,

    /// Minimum loan size in USD
    #[serde(default = "defaults::min_loan_usd")]
    pub min_loan_usd: Decimal,

    /// Upper bound for the loan search in USD (before the TVL cap)
    #[serde(default = "defaults::target_loan_usd")]
    pub target_loan_usd: Decimal,

    #[serde(default = "defaults::max_concurrent_intents_per_chain")]
    pub max_concurrent_intents_per_chain: u32,

    /// Circuit breaker: consecutive failures before opening
    #[serde(default = "defaults::max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Circuit breaker / scanner cooldown in seconds
    #[serde(default = "defaults::cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "defaults::tick_period_ms")]
    pub tick_period_ms: u64,

    #[serde(default = "defaults::tick_budget_ms")]
    pub tick_budget_ms: u64,

    #[serde(default)]
    pub tier_schedule: TierSchedule,

    #[serde(default = "defaults::fingerprint_cooldown_ms")]
    pub fingerprint_cooldown_ms: u64,

    #[serde(default = "defaults::max_candidates_per_tick")]
    pub max_candidates_per_tick: usize,

    /// Pair volatility above which edges are excluded from routing
    #[serde(default = "defaults::max_vol_for_exec")]
    pub max_vol_for_exec: f32,

    #[serde(default = "defaults::shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Scanner cooldown trigger: safety rejections per tick
    #[serde(default = "defaults::cooldown_reject_threshold")]
    pub cooldown_reject_threshold: u32,

    /// Directory for the intent file spool fallback
    #[serde(default = "defaults::spool_dir")]
    pub spool_dir: PathBuf,

    pub chains: Vec<ChainConfig>,
    pub tokens: Vec<TokenDeployment>,
    #[serde(default)]
    pub pools: Vec<PoolConfigEntry>,
    #[serde(default)]
    pub feeds: Vec<FeedConfigEntry>,
}

/// Parse an address from its hex form
pub fn parse_address(addr: &str) -> eyre::Result<Address> {
    use std::str::FromStr;
    Address::from_str(addr).map_err(|e| eyre::eyre!("invalid address {addr}: {e}"))
}

impl EngineConfig {
    /// Sanity-check a configuration before handing it to the supervisor
    pub fn validate(&self) -> eyre::Result<()> {
        if self.chains.is_empty() {
            return Err(eyre::eyre!("no chains configured"));
        }
        if self.tokens.is_empty() {
            return Err(eyre::eyre!("empty token universe"));
        }
        for chain in &self.chains {
            let period = chain.tick_period_ms.unwrap_or(self.tick_period_ms);
            if self.tick_budget_ms > period {
                return Err(eyre::eyre!(
                    "chain {}: tick budget {}ms exceeds tick period {}ms",
                    chain.chain_id,
                    self.tick_budget_ms,
                    period
                ));
            }
            if chain.gas_ceiling_wei == 0 {
                return Err(eyre::eyre!("chain {}: zero gas ceiling", chain.chain_id));
            }
            let has_native = self.tokens.iter().any(|t| {
                t.token == chain.wrapped_native && t.chain_id == chain.chain_id
            });
            if !has_native {
                return Err(eyre::eyre!(
                    "chain {}: wrapped-native token {} has no deployment",
                    chain.chain_id,
                    chain.wrapped_native
                ));
            }
        }
        if self.min_loan_usd <= Decimal::ZERO || self.min_loan_usd > self.target_loan_usd {
            return Err(eyre::eyre!("loan bounds are inverted or non-positive"));
        }
        Ok(())
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    pub fn gas_ceiling(&self, chain_id: ChainId) -> Option<u128> {
        self.chain(chain_id).map(|c| c.gas_ceiling_wei)
    }

    pub fn tick_period_ms(&self, chain_id: ChainId) -> u64 {
        self.chain(chain_id)
            .and_then(|c| c.tick_period_ms)
            .unwrap_or(self.tick_period_ms)
    }

    /// Gas ceilings keyed by chain, for the forecaster
    pub fn gas_ceilings(&self) -> HashMap<ChainId, u128> {
        self.chains
            .iter()
            .map(|c| (c.chain_id, c.gas_ceiling_wei))
            .collect()
    }
}

mod defaults {
    use super::*;

    pub fn min_profit_usd() -> Decimal {
        dec!(5.0)
    }
    pub fn max_impact_bps() -> u32 {
        500
    }
    pub fn max_twap_dev_bps() -> u32 {
        500
    }
    pub fn tvl_share_cap() -> Decimal {
        dec!(0.20)
    }
    pub fn min_loan_usd() -> Decimal {
        dec!(100.0)
    }
    pub fn target_loan_usd() -> Decimal {
        dec!(250000.0)
    }
    pub fn max_concurrent_intents_per_chain() -> u32 {
        3
    }
    pub fn max_consecutive_failures() -> u32 {
        10
    }
    pub fn cooldown_secs() -> u64 {
        60
    }
    pub fn tick_period_ms() -> u64 {
        3000
    }
    pub fn tick_budget_ms() -> u64 {
        2000
    }
    pub fn fingerprint_cooldown_ms() -> u64 {
        5000
    }
    pub fn max_candidates_per_tick() -> usize {
        20
    }
    pub fn max_vol_for_exec() -> f32 {
        0.5
    }
    pub fn shutdown_grace_secs() -> u64 {
        30
    }
    pub fn cooldown_reject_threshold() -> u32 {
        8
    }
    pub fn spool_dir() -> PathBuf {
        PathBuf::from("intent-spool")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let json = r#"{ "chains": [], "tokens": [] }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.min_profit_usd, dec!(5.0));
        assert_eq!(cfg.max_impact_bps, 500);
        assert_eq!(cfg.max_twap_dev_bps, 500);
        assert_eq!(cfg.tvl_share_cap, dec!(0.20));
        assert_eq!(cfg.max_concurrent_intents_per_chain, 3);
        assert_eq!(cfg.max_consecutive_failures, 10);
        assert_eq!(cfg.cooldown_secs, 60);
        assert_eq!(cfg.tick_period_ms, 3000);
        assert_eq!(cfg.tick_budget_ms, 2000);
        assert_eq!(cfg.fingerprint_cooldown_ms, 5000);
        assert_eq!(cfg.max_candidates_per_tick, 20);
        assert_eq!(cfg.tier_schedule, TierSchedule::default());
    }

    #[test]
    fn validate_catches_inverted_budget() {
        let mut cfg: EngineConfig =
            serde_json::from_str(r#"{ "chains": [], "tokens": [] }"#).unwrap();
        assert!(cfg.validate().is_err(), "no chains must not validate");

        cfg.chains.push(ChainConfig {
            chain_id: 137,
            name: "polygon".into(),
            gas_ceiling_wei: 200_000_000_000,
            wrapped_native: TokenId(2),
            usd_anchor: TokenId(0),
            flash_fee_bps: 5,
            tick_period_ms: Some(1000),
            rpc_endpoints: vec![],
            tiers: TierAssignment::default(),
        });
        cfg.tokens.push(crate::types::TokenDeployment {
            token: TokenId(2),
            chain_id: 137,
            variant: crate::types::TokenVariant::Wrapped,
            address: Address::ZERO,
            decimals: 18,
            symbol: "WMATIC".into(),
        });
        // Budget (2000) exceeds the 1000ms per-chain period
        assert!(cfg.validate().is_err());
        cfg.chains[0].tick_period_ms = Some(3000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn address_parsing() {
        assert!(parse_address("0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270").is_ok());
        assert!(parse_address("not-an-address").is_err());
    }

    #[test]
    fn per_chain_tick_override() {
        let base: EngineConfig =
            serde_json::from_str(r#"{ "chains": [], "tokens": [] }"#).unwrap();
        let cfg = EngineConfig {
            chains: vec![ChainConfig {
                chain_id: 137,
                name: "polygon".into(),
                gas_ceiling_wei: 200_000_000_000,
                wrapped_native: TokenId(2),
                usd_anchor: TokenId(0),
                flash_fee_bps: 5,
                tick_period_ms: Some(1500),
                rpc_endpoints: vec![],
                tiers: TierAssignment::default(),
            }],
            ..base
        };
        assert_eq!(cfg.tick_period_ms(137), 1500);
        assert_eq!(cfg.tick_period_ms(1), 3000);
    }
}
