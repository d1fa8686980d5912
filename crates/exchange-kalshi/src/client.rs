//! Kalshi REST client implementing [`MarketGateway`].
//!
//! All calls go through one [`RateLimitedTransport`], so quote polling and
//! order management draw on the same token bucket.
//!
//! # Example
//!
//! ```ignore
//! use algo_trade_core::MarketGateway;
//! use algo_trade_kalshi::{KalshiClient, KalshiClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = KalshiClient::new(KalshiClientConfig::demo())?;
//!     let quote = client.get_quote("KXBTC-26FEB02-B100000").await?;
//!     println!("bid {} ask {}", quote.bid, quote.ask);
//!     Ok(())
//! }
//! ```

use crate::auth::{KalshiAuthConfig, KalshiSigner, RequestSigner};
use crate::error::{KalshiError, Result};
use crate::rate_limiter::{RateLimiterConfig, RateLimiterStats, TokenBucket};
use crate::transport::{RateLimitedTransport, RetryPolicy, TransportConfig};
use crate::types::{RawMarketResponse, RawOrderResponse, WireOrder};
use algo_trade_core::{GatewayError, MarketGateway, OrderRequest, OrderState, Quote};
use async_trait::async_trait;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Constants
// =============================================================================

/// Kalshi production API base URL.
pub const KALSHI_PROD_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";

/// Kalshi demo API base URL.
pub const KALSHI_DEMO_URL: &str = "https://demo-api.kalshi.co/trade-api/v2";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Kalshi client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalshiClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Authentication configuration.
    pub auth: KalshiAuthConfig,

    /// Sustained requests per minute.
    pub requests_per_minute: NonZeroU32,

    /// Token-bucket capacity.
    pub burst: NonZeroU32,

    /// Longest a call waits for a token before failing.
    pub max_wait_ms: u64,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Retries for 5xx and 429 responses.
    pub max_retries: u32,

    /// First 5xx backoff; doubles per retry.
    pub base_backoff_ms: u64,

    /// Cap on a server-supplied `Retry-After`.
    pub max_retry_after_secs: u64,
}

impl Default for KalshiClientConfig {
    fn default() -> Self {
        Self {
            base_url: KALSHI_PROD_URL.to_string(),
            auth: KalshiAuthConfig::default(),
            requests_per_minute: nonzero!(100u32),
            burst: nonzero!(100u32),
            max_wait_ms: 10_000,
            timeout_secs: 10,
            max_retries: 3,
            base_backoff_ms: 1_000,
            max_retry_after_secs: 60,
        }
    }
}

impl KalshiClientConfig {
    /// Creates a configuration for production.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Creates a configuration for demo environment.
    #[must_use]
    pub fn demo() -> Self {
        Self {
            base_url: KALSHI_DEMO_URL.to_string(),
            auth: KalshiAuthConfig::demo(),
            ..Default::default()
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: NonZeroU32, burst: NonZeroU32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self.burst = burst;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the first retry backoff.
    #[must_use]
    pub fn with_base_backoff_ms(mut self, ms: u64) -> Self {
        self.base_backoff_ms = ms;
        self
    }

    #[must_use]
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(
            self.requests_per_minute,
            self.burst,
            Duration::from_millis(self.max_wait_ms),
        )
    }

    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.base_backoff_ms),
                max_retry_after: Duration::from_secs(self.max_retry_after_secs),
            },
        }
    }
}

// =============================================================================
// KalshiClient
// =============================================================================

/// Kalshi REST API client.
pub struct KalshiClient {
    transport: RateLimitedTransport,
}

impl std::fmt::Debug for KalshiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiClient")
            .field("transport", &self.transport)
            .finish()
    }
}

impl KalshiClient {
    /// Creates a client with credentials read from the environment.
    ///
    /// # Errors
    /// Returns error if credentials are missing or invalid.
    pub fn new(config: KalshiClientConfig) -> Result<Self> {
        let signer = KalshiSigner::from_env(&config.auth)?;
        Self::with_signer(config, Arc::new(signer))
    }

    /// Creates a client with an explicit signer.
    ///
    /// # Errors
    /// Returns error if the transport cannot be built.
    pub fn with_signer(config: KalshiClientConfig, signer: Arc<dyn RequestSigner>) -> Result<Self> {
        let bucket = Arc::new(TokenBucket::new(config.rate_limiter_config()));
        let transport = RateLimitedTransport::new(config.transport_config(), signer, bucket)?;
        Ok(Self { transport })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    #[must_use]
    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.transport.rate_limiter_stats()
    }

    /// Validates a ticker or order id before it is placed in a URL path.
    ///
    /// Valid identifiers contain only alphanumeric characters, hyphens, and
    /// underscores.
    fn validate_identifier(id: &str, max_len: usize) -> Result<&str> {
        if id.is_empty() {
            return Err(KalshiError::InvalidRequest(
                "identifier cannot be empty".to_string(),
            ));
        }
        if id.len() > max_len {
            return Err(KalshiError::InvalidRequest(format!(
                "identifier exceeds maximum length of {max_len}: {}",
                id.len()
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(KalshiError::InvalidRequest(format!(
                "identifier must contain only alphanumeric, hyphen, or underscore: {id}"
            )));
        }
        Ok(id)
    }

    fn validate_ticker(ticker: &str) -> Result<&str> {
        Self::validate_identifier(ticker, 64)
    }

    fn validate_order_id(order_id: &str) -> Result<&str> {
        Self::validate_identifier(order_id, 128)
    }

    /// Fetches the top of book for a market.
    ///
    /// # Errors
    /// Returns error if the market is unknown or the call fails.
    pub async fn fetch_quote(&self, ticker: &str) -> Result<Quote> {
        let ticker = Self::validate_ticker(ticker)?;
        let response: RawMarketResponse = self.transport.get(&format!("/markets/{ticker}")).await?;

        response
            .market
            .map(|m| m.into_quote())
            .ok_or_else(|| KalshiError::market_not_found(ticker))
    }

    /// Submits an order and returns the exchange order id.
    ///
    /// # Errors
    /// Returns error if the order is invalid or rejected.
    pub async fn submit_order(&self, order: &OrderRequest) -> Result<String> {
        Self::validate_ticker(&order.market_id)?;
        let wire = WireOrder::try_from(order)?;

        let response: RawOrderResponse = self.transport.post("/portfolio/orders", &wire).await?;
        let order_id = response
            .order
            .map(|o| o.order_id)
            .ok_or_else(|| KalshiError::Serialization("no order in response".to_string()))?;

        debug!(
            order_id = %order_id,
            ticker = %order.market_id,
            kind = %order.kind,
            count = order.quantity,
            "order submitted"
        );
        Ok(order_id)
    }

    /// Cancels an order. Returns false if the exchange no longer knows it.
    ///
    /// # Errors
    /// Returns error if the cancel request fails for another reason.
    pub async fn cancel(&self, order_id: &str) -> Result<bool> {
        let order_id = Self::validate_order_id(order_id)?;
        let path = format!("/portfolio/orders/{order_id}");

        match self.transport.delete::<serde_json::Value>(&path).await {
            Ok(_) => Ok(true),
            Err(KalshiError::Api {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Gets order fill state.
    ///
    /// # Errors
    /// Returns error if the order is unknown or the call fails.
    pub async fn order_state(&self, order_id: &str) -> Result<OrderState> {
        let order_id = Self::validate_order_id(order_id)?;
        let path = format!("/portfolio/orders/{order_id}");

        let response: RawOrderResponse = self.transport.get(&path).await?;
        response
            .order
            .map(OrderState::from)
            .ok_or_else(|| KalshiError::api(404, format!("order not found: {order_id}")))
    }
}

#[async_trait]
impl MarketGateway for KalshiClient {
    async fn get_quote(&self, market_id: &str) -> std::result::Result<Quote, GatewayError> {
        let quote = self.fetch_quote(market_id).await?;
        quote.validate()?;
        Ok(quote)
    }

    async fn place_order(&self, order: &OrderRequest) -> std::result::Result<String, GatewayError> {
        Ok(self.submit_order(order).await?)
    }

    async fn cancel_order(&self, order_id: &str) -> std::result::Result<bool, GatewayError> {
        Ok(self.cancel(order_id).await?)
    }

    async fn get_order_status(
        &self,
        order_id: &str,
    ) -> std::result::Result<OrderState, GatewayError> {
        Ok(self.order_state(order_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Config Tests ====================

    #[test]
    fn test_client_config_default() {
        let config = KalshiClientConfig::default();
        assert_eq!(config.base_url, KALSHI_PROD_URL);
        assert_eq!(config.requests_per_minute.get(), 100);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_client_config_demo() {
        let config = KalshiClientConfig::demo();
        assert_eq!(config.base_url, KALSHI_DEMO_URL);
        assert_eq!(config.auth.api_key_env, "KALSHI_DEMO_API_KEY");
    }

    #[test]
    fn test_client_config_builder() {
        let config = KalshiClientConfig::default()
            .with_base_url("http://localhost:8080")
            .with_rate_limit(nonzero!(30u32), nonzero!(5u32))
            .with_timeout_secs(3)
            .with_base_backoff_ms(10);

        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.rate_limiter_config().burst.get(), 5);
        let transport = config.transport_config();
        assert_eq!(transport.timeout, Duration::from_secs(3));
        assert_eq!(transport.retry.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_client_config_deserializes_partial() {
        let config: KalshiClientConfig = serde_json::from_value(serde_json::json!({
            "requests_per_minute": 50,
            "max_wait_ms": 2000
        }))
        .unwrap();
        assert_eq!(config.requests_per_minute.get(), 50);
        assert_eq!(config.max_wait_ms, 2000);
        assert_eq!(config.base_url, KALSHI_PROD_URL);
    }

    #[test]
    fn test_client_config_rejects_zero_rate() {
        let result: std::result::Result<KalshiClientConfig, _> =
            serde_json::from_value(serde_json::json!({ "requests_per_minute": 0 }));
        assert!(result.is_err());
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_validate_ticker_valid() {
        assert!(KalshiClient::validate_ticker("KXBTC-26FEB02-B100000").is_ok());
        assert!(KalshiClient::validate_ticker("KXETH_TEST").is_ok());
    }

    #[test]
    fn test_validate_ticker_rejects_path_traversal() {
        assert!(KalshiClient::validate_ticker("../etc/passwd").is_err());
        assert!(KalshiClient::validate_ticker("KXBTC/orders").is_err());
    }

    #[test]
    fn test_validate_ticker_rejects_empty_and_long() {
        assert!(KalshiClient::validate_ticker("").is_err());
        assert!(KalshiClient::validate_ticker(&"A".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_order_id_allows_longer_ids() {
        assert!(KalshiClient::validate_order_id(&"a".repeat(100)).is_ok());
        assert!(KalshiClient::validate_order_id("ord?x=1").is_err());
    }
}
