//! External HTTP price fallback (oracle tier 3)
//!
//! Two upstream shapes are tried in order: a CoinGecko-style id lookup and
//! a Binance-style ticker. Calls share one semaphore so a burst of misses
//! cannot stampede the upstreams, and every call has a bounded timeout.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::PriceError;

/// Capability seam for the HTTP tier, substitutable in tests
#[async_trait]
pub trait SpotPriceApi: Send + Sync {
    async fn spot_usd(&self, symbol: &str) -> Result<Decimal, PriceError>;
}

/// HTTP fallback client configuration
#[derive(Debug, Clone)]
pub struct HttpPriceConfig {
    pub gecko_base: String,
    pub binance_base: String,
    pub call_timeout_ms: u64,
    pub max_inflight: usize,
}

impl Default for HttpPriceConfig {
    fn default() -> Self {
        Self {
            gecko_base: "https://api.coingecko.com/api/v3".into(),
            binance_base: "https://api.binance.com".into(),
            call_timeout_ms: 500,
            max_inflight: 4,
        }
    }
}

/// Rate-limited HTTP price source
pub struct HttpPriceSource {
    client: reqwest::Client,
    cfg: HttpPriceConfig,
    /// symbol -> coingecko id ("WETH" -> "weth" is not always right)
    gecko_ids: HashMap<String, String>,
    limiter: Arc<Semaphore>,
}

impl HttpPriceSource {
    pub fn new(cfg: HttpPriceConfig, gecko_ids: HashMap<String, String>) -> Self {
        let limiter = Arc::new(Semaphore::new(cfg.max_inflight.max(1)));
        Self {
            client: reqwest::Client::new(),
            cfg,
            gecko_ids,
            limiter,
        }
    }

    async fn gecko_price(&self, symbol: &str) -> Result<Decimal, PriceError> {
        let id = self
            .gecko_ids
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_lowercase());
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.cfg.gecko_base, id
        );
        let body: serde_json::Value = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(self.cfg.call_timeout_ms))
            .send()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?;

        let price = body
            .get(&id)
            .and_then(|v| v.get("usd"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| PriceError::Upstream(format!("no usd price for {id}")))?;
        Decimal::from_str(&price.to_string())
            .map_err(|e| PriceError::Upstream(e.to_string()))
    }

    async fn binance_price(&self, symbol: &str) -> Result<Decimal, PriceError> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}USDT",
            self.cfg.binance_base,
            symbol.to_uppercase()
        );
        let body: serde_json::Value = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(self.cfg.call_timeout_ms))
            .send()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| PriceError::Upstream(e.to_string()))?;

        let price = body
            .get("price")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PriceError::Upstream(format!("no ticker for {symbol}")))?;
        Decimal::from_str(price).map_err(|e| PriceError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl SpotPriceApi for HttpPriceSource {
    async fn spot_usd(&self, symbol: &str) -> Result<Decimal, PriceError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| PriceError::Upstream("rate limiter closed".into()))?;

        match self.gecko_price(symbol).await {
            Ok(price) => Ok(price),
            Err(first) => {
                debug!(symbol, error = %first, "primary http source missed, trying secondary");
                self.binance_price(symbol).await
            }
        }
    }
}
