//! Short-TTL quote cache in front of the market gateway.
//!
//! Monitor ticks run more often than quotes need refreshing, so every quote
//! read goes through here. A hit costs nothing. A miss costs one rate-limited
//! gateway call.

use algo_trade_core::{GatewayError, MarketGateway, Quote};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceCacheConfig {
    /// Age after which a cached quote is refetched.
    pub ttl_secs: u64,
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 10 }
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    quotes: HashMap<String, (Instant, Quote)>,
    hits: u64,
    misses: u64,
}

/// Quote cache shared by every position worker.
///
/// The lock is never held across a gateway call. Two workers missing on the
/// same market at once may both fetch it; the later write wins.
pub struct PriceCache {
    gateway: Arc<dyn MarketGateway>,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl std::fmt::Debug for PriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PriceCache {
    pub fn new(gateway: Arc<dyn MarketGateway>, config: &PriceCacheConfig) -> Self {
        Self::with_ttl(gateway, Duration::from_secs(config.ttl_secs))
    }

    pub fn with_ttl(gateway: Arc<dyn MarketGateway>, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Returns a quote no older than the TTL.
    ///
    /// # Errors
    /// Returns the gateway error on a miss, or [`GatewayError::InvalidQuote`]
    /// if the fetched quote is malformed. Failed fetches are not cached.
    pub async fn get(&self, market_id: &str) -> Result<Quote, GatewayError> {
        {
            let mut inner = self.inner.lock();
            let cached = inner
                .quotes
                .get(market_id)
                .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
                .map(|(_, quote)| quote.clone());
            if let Some(quote) = cached {
                inner.hits += 1;
                return Ok(quote);
            }
            inner.misses += 1;
        }

        let quote = self.gateway.get_quote(market_id).await?;
        quote.validate()?;
        debug!(market_id, bid = %quote.bid, ask = %quote.ask, "quote refreshed");

        self.inner
            .lock()
            .quotes
            .insert(market_id.to_string(), (Instant::now(), quote.clone()));
        Ok(quote)
    }

    /// Drops the cached quote for one market.
    pub fn invalidate(&self, market_id: &str) {
        self.inner.lock().quotes.remove(market_id);
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.quotes.len(),
        }
    }
}
