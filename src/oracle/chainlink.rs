//! Chainlink aggregator reads (oracle tier 1)

use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::sol;
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::PriceError;
use crate::types::ChainId;

sol! {
    #[sol(rpc)]
    interface IAggregatorV3 {
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );
        function decimals() external view returns (uint8);
    }
}

/// One feed reading
#[derive(Debug, Clone, Copy)]
pub struct FeedRound {
    pub price_usd: Decimal,
    /// Feed-reported update time, unix seconds
    pub updated_at: u64,
}

/// Capability seam for the aggregator tier, substitutable in tests
#[async_trait]
pub trait FeedReader: Send + Sync {
    /// Latest round for a token's feed; Ok(None) when no feed is registered
    async fn latest_round(
        &self,
        chain_id: ChainId,
        token: Address,
    ) -> Result<Option<FeedRound>, PriceError>;
}

/// Chainlink feed registry over per-chain providers
pub struct ChainlinkFeeds<P> {
    providers: HashMap<ChainId, Arc<P>>,
    feeds: HashMap<(ChainId, Address), Address>,
    decimals_cache: DashMap<Address, u8>,
}

impl<P> ChainlinkFeeds<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    pub fn new(
        providers: HashMap<ChainId, Arc<P>>,
        feeds: HashMap<(ChainId, Address), Address>,
    ) -> Self {
        Self {
            providers,
            feeds,
            decimals_cache: DashMap::new(),
        }
    }

    pub fn has_feed(&self, chain_id: ChainId, token: Address) -> bool {
        self.feeds.contains_key(&(chain_id, token))
    }

    async fn feed_decimals(&self, provider: Arc<P>, aggregator: Address) -> Result<u8, PriceError> {
        if let Some(d) = self.decimals_cache.get(&aggregator) {
            return Ok(*d);
        }
        let contract = IAggregatorV3::new(aggregator, provider);
        let d = contract
            .decimals()
            .call()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?;
        self.decimals_cache.insert(aggregator, d);
        Ok(d)
    }
}

#[async_trait]
impl<P> FeedReader for ChainlinkFeeds<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    async fn latest_round(
        &self,
        chain_id: ChainId,
        token: Address,
    ) -> Result<Option<FeedRound>, PriceError> {
        let Some(aggregator) = self.feeds.get(&(chain_id, token)).copied() else {
            return Ok(None);
        };
        let provider = self
            .providers
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| PriceError::Upstream(format!("no provider for chain {chain_id}")))?;

        let contract = IAggregatorV3::new(aggregator, provider.clone());
        let round = contract
            .latestRoundData()
            .call()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?;

        if round.answer.is_negative() || round.answer.is_zero() {
            return Err(PriceError::Upstream("non-positive feed answer".into()));
        }

        let decimals = self.feed_decimals(provider, aggregator).await?;
        let raw = u128::try_from(round.answer.unsigned_abs())
            .map_err(|_| PriceError::Upstream("feed answer out of range".into()))?;
        let price = Decimal::from_f64(raw as f64 / 10_f64.powi(decimals as i32))
            .ok_or_else(|| PriceError::Upstream("feed answer not representable".into()))?;

        debug!(chain = chain_id, token = %token, %price, "chainlink round");
        Ok(Some(FeedRound {
            price_usd: price,
            updated_at: round.updatedAt.to::<u64>(),
        }))
    }
}
