//! Tiered USD price oracle
//!
//! Resolution order, failing open to the next tier:
//!   1. Chainlink aggregator (miss when stale or unregistered)
//!   2. TWAP of the token against the chain's stable anchor
//!   3. External HTTP spot (rate-limited, bounded timeout)
//!
//! Results are cached briefly; `PriceError::Unavailable` only when every
//! tier misses. The oracle never fabricates a price.

pub mod chainlink;
pub mod http;

use dashmap::DashMap;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::PriceError;
use crate::twap::{PairKey, TwapAccumulator};
use crate::types::{u256_to_f64, ChainId, Clock, TokenId, TokenRegistry};

pub use chainlink::{ChainlinkFeeds, FeedReader, FeedRound};
pub use http::{HttpPriceConfig, HttpPriceSource, SpotPriceApi};

/// Narrow USD-pricing seam consumed by the profit engine and loan sizer
#[async_trait::async_trait]
pub trait UsdPricer: Send + Sync {
    async fn price_usd(&self, token: TokenId, chain_id: ChainId) -> Result<Decimal, PriceError>;
}

/// Oracle tuning knobs
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Successful lookups are cached this long
    pub cache_ttl_ms: u64,
    /// Feed rounds older than this are treated as misses
    pub max_feed_staleness_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 10_000,
            max_feed_staleness_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: Decimal,
    at_ms: u64,
}

/// Tiered price oracle shared across scanners
pub struct PriceOracle {
    feeds: Arc<dyn FeedReader>,
    twap: Arc<TwapAccumulator>,
    spot: Arc<dyn SpotPriceApi>,
    registry: Arc<TokenRegistry>,
    /// Stable anchor token per chain for the TWAP tier
    anchors: HashMap<ChainId, TokenId>,
    cache: DashMap<(ChainId, TokenId), CachedPrice>,
    clock: Arc<dyn Clock>,
    cfg: OracleConfig,
}

impl PriceOracle {
    pub fn new(
        feeds: Arc<dyn FeedReader>,
        twap: Arc<TwapAccumulator>,
        spot: Arc<dyn SpotPriceApi>,
        registry: Arc<TokenRegistry>,
        anchors: HashMap<ChainId, TokenId>,
        clock: Arc<dyn Clock>,
        cfg: OracleConfig,
    ) -> Self {
        Self {
            feeds,
            twap,
            spot,
            registry,
            anchors,
            cache: DashMap::new(),
            clock,
            cfg,
        }
    }

    /// USD price of a token on a chain, resolved through the tier chain
    pub async fn price_usd(
        &self,
        token: TokenId,
        chain_id: ChainId,
    ) -> Result<Decimal, PriceError> {
        let now_ms = self.clock.now_ms();
        if let Some(hit) = self.cache.get(&(chain_id, token)) {
            if now_ms.saturating_sub(hit.at_ms) <= self.cfg.cache_ttl_ms {
                return Ok(hit.price);
            }
        }

        let price = self.resolve(token, chain_id, now_ms).await?;
        self.cache.insert(
            (chain_id, token),
            CachedPrice {
                price,
                at_ms: now_ms,
            },
        );
        Ok(price)
    }

    /// Deviation of a DEX-implied price from the oracle price, in bps
    pub async fn deviation_bps(
        &self,
        token: TokenId,
        chain_id: ChainId,
        dex_price: Decimal,
    ) -> Result<u32, PriceError> {
        let oracle = self.price_usd(token, chain_id).await?;
        if oracle.is_zero() {
            return Ok(u32::MAX);
        }
        let dev = ((dex_price - oracle) / oracle).abs() * Decimal::from(10_000u32);
        Ok(dev.to_u32().unwrap_or(u32::MAX))
    }

    async fn resolve(
        &self,
        token: TokenId,
        chain_id: ChainId,
        now_ms: u64,
    ) -> Result<Decimal, PriceError> {
        // Tier 1: on-chain feed
        if let Some(deployment) = self.registry.preferred(token, chain_id) {
            match self.feeds.latest_round(chain_id, deployment.address).await {
                Ok(Some(round)) => {
                    let age_secs = (now_ms / 1000).saturating_sub(round.updated_at);
                    if age_secs <= self.cfg.max_feed_staleness_secs {
                        return Ok(round.price_usd);
                    }
                    debug!(token = %token, chain = chain_id, age_secs, "feed stale, next tier");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(token = %token, chain = chain_id, error = %e, "feed read failed, next tier");
                }
            }
        }

        // Tier 2: TWAP against the chain's stable anchor
        if let Some(price) = self.twap_price(token, chain_id, now_ms) {
            return Ok(price);
        }

        // Tier 3: external HTTP spot
        let symbol = self.registry.symbol(token).to_string();
        match self.spot.spot_usd(&symbol).await {
            Ok(price) => Ok(price),
            Err(e) => {
                debug!(token = %token, chain = chain_id, error = %e, "all oracle tiers missed");
                Err(PriceError::Unavailable {
                    chain_id,
                    token: token.0,
                })
            }
        }
    }

    fn twap_price(&self, token: TokenId, chain_id: ChainId, now_ms: u64) -> Option<Decimal> {
        let anchor = *self.anchors.get(&chain_id)?;
        if anchor == token {
            // Anchor is the USD reference by definition
            return Some(Decimal::ONE);
        }
        let base = self.registry.preferred(token, chain_id)?.address;
        let quote = self.registry.preferred(anchor, chain_id)?.address;
        let pair = PairKey {
            chain_id,
            base,
            quote,
        };
        let fixed = self.twap.twap_at(&pair, now_ms)?;
        Decimal::from_f64(u256_to_f64(fixed) / 1e18)
    }
}

#[async_trait::async_trait]
impl UsdPricer for PriceOracle {
    async fn price_usd(&self, token: TokenId, chain_id: ChainId) -> Result<Decimal, PriceError> {
        PriceOracle::price_usd(self, token, chain_id).await
    }
}
