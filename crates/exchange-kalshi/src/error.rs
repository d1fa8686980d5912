//! Error types for Kalshi exchange integration.
//!
//! `KalshiError` is the wire-level taxonomy. It converts into the venue-neutral
//! [`GatewayError`] at the `MarketGateway` boundary.

use algo_trade_core::GatewayError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when interacting with Kalshi.
#[derive(Debug, Error)]
pub enum KalshiError {
    /// Authentication failed.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// RSA signing error.
    #[error("RSA signing error: {0}")]
    Signing(String),

    /// API request failed.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from API.
        message: String,
    },

    /// Server-side rate limit (HTTP 429).
    #[error("rate limited by server, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    /// Local token bucket could not admit the call within the wait ceiling.
    #[error("rate limit ceiling reached after waiting {waited_ms}ms")]
    RateLimitExceeded {
        /// Milliseconds spent waiting.
        waited_ms: u64,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Request parameters rejected before sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Market not found.
    #[error("market not found: {ticker}")]
    MarketNotFound {
        /// The market ticker that was not found.
        ticker: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KalshiError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a server rate limit error.
    pub fn rate_limit(retry_after_secs: u64) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    /// Creates a local rate limit ceiling error.
    pub fn rate_limit_exceeded(waited: Duration) -> Self {
        Self::RateLimitExceeded {
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a market not found error.
    pub fn market_not_found(ticker: impl Into<String>) -> Self {
        Self::MarketNotFound {
            ticker: ticker.into(),
        }
    }

    /// Returns true for 5xx responses.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Api { status_code, .. } if *status_code >= 500)
    }

    /// Returns true if the error indicates the request could succeed later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::Timeout(_)
            | Self::RateLimit { .. }
            | Self::RateLimitExceeded { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for KalshiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for KalshiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<KalshiError> for GatewayError {
    fn from(err: KalshiError) -> Self {
        match err {
            KalshiError::RateLimitExceeded { waited_ms } => Self::RateLimitExceeded { waited_ms },
            KalshiError::Timeout(msg) => Self::Timeout(msg),
            KalshiError::Network(msg) => Self::Transient(msg),
            e @ KalshiError::RateLimit { .. } => Self::Transient(e.to_string()),
            e @ KalshiError::Api { .. } if e.is_server_error() => Self::Transient(e.to_string()),
            KalshiError::Api {
                status_code,
                message,
            } => Self::Client {
                status_code,
                message,
            },
            KalshiError::MarketNotFound { ticker } => {
                Self::client(404, format!("market not found: {ticker}"))
            }
            KalshiError::Serialization(msg) => Self::MalformedResponse(msg),
            e @ (KalshiError::Authentication(_)
            | KalshiError::Signing(_)
            | KalshiError::InvalidRequest(_)
            | KalshiError::Configuration(_)) => Self::InvalidRequest(e.to_string()),
        }
    }
}

/// Result type alias for Kalshi operations.
pub type Result<T> = std::result::Result<T, KalshiError>;
