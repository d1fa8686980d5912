//! Kalshi market gateway for the exit engine.
//!
//! This crate provides:
//! - RSA request signing (`KALSHI-ACCESS-*` headers)
//! - A shared token bucket that every outbound call draws from
//! - A transport that retries 5xx/429 responses with backoff and fails fast otherwise
//! - `KalshiClient`, an implementation of [`algo_trade_core::MarketGateway`]
//!
//! # Example
//!
//! ```ignore
//! use algo_trade_core::{MarketGateway, OrderRequest, Side};
//! use algo_trade_kalshi::{KalshiClient, KalshiClientConfig};
//! use rust_decimal_macros::dec;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = KalshiClient::new(KalshiClientConfig::demo())?;
//!
//!     let quote = client.get_quote("KXBTC-26FEB02-B100000").await?;
//!     let order = OrderRequest::sell_limit(&quote.market_id, Side::Yes, 10, quote.bid, "exit-1");
//!     let order_id = client.place_order(&order).await?;
//!     println!("resting {order_id}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Authentication
//!
//! Set the following environment variables:
//!
//! - `KALSHI_API_KEY`: Your API key ID
//! - `KALSHI_PRIVATE_KEY`: Your RSA private key in PKCS#8 PEM format
//!
//! For demo environment, use `KALSHI_DEMO_API_KEY` and `KALSHI_DEMO_PRIVATE_KEY`.
//!
//! # API Endpoints
//!
//! - `GET /markets/{ticker}` - Top of book
//! - `POST /portfolio/orders` - Submit order
//! - `DELETE /portfolio/orders/{order_id}` - Cancel order
//! - `GET /portfolio/orders/{order_id}` - Order status

pub mod auth;
pub mod client;
pub mod error;
pub mod rate_limiter;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use auth::{KalshiAuthConfig, KalshiSigner, RequestSigner, SignedHeaders};
pub use client::{KalshiClient, KalshiClientConfig, KALSHI_DEMO_URL, KALSHI_PROD_URL};
pub use error::{KalshiError, Result};
pub use rate_limiter::{RateLimiterConfig, RateLimiterStats, TokenBucket, TokioClock};
pub use transport::{RateLimitedTransport, RetryPolicy, TransportConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_exports() {
        let _ = KalshiAuthConfig::default();
        let _ = KalshiClientConfig::default();
        let _ = RateLimiterConfig::default();
        let _ = RetryPolicy::default();
    }

    #[test]
    fn test_constants_accessible() {
        assert!(KALSHI_PROD_URL.starts_with("https://"));
        assert!(KALSHI_DEMO_URL.starts_with("https://"));
    }
}
