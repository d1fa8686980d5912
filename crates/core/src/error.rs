//! Error taxonomy for calls that cross the market gateway.

use thiserror::Error;

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeouts, 5xx and 429 that survived local retries. Try again next tick.
    Transient,
    /// Bad request or malformed data. Skip this tick only.
    Client,
    /// A bug: state that must never happen. Abort and alert an operator.
    Invariant,
    /// The rate-limit ceiling was reached. Defer, do not fail.
    ResourceExhausted,
}

impl ErrorClass {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Client => "client",
            Self::Invariant => "invariant",
            Self::ResourceExhausted => "resource_exhausted",
        }
    }
}

/// Errors returned by a [`crate::MarketGateway`].
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No rate-limit token became available within the wait ceiling.
    #[error("rate limit ceiling reached after waiting {waited_ms}ms")]
    RateLimitExceeded {
        /// Milliseconds spent waiting before giving up.
        waited_ms: u64,
    },

    /// Network-level timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Network, 5xx or 429 failure left over after retries.
    #[error("transient failure: {0}")]
    Transient(String),

    /// 4xx response.
    #[error("client error {status_code}: {message}")]
    Client {
        status_code: u16,
        message: String,
    },

    /// Quote that cannot describe a binary market.
    #[error("invalid quote for {market_id}: {reason}")]
    InvalidQuote {
        market_id: String,
        reason: String,
    },

    /// Request could not be built (bad identifier, signing, credentials).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Response body did not match the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    pub fn client(status_code: u16, message: impl Into<String>) -> Self {
        Self::Client {
            status_code,
            message: message.into(),
        }
    }

    pub fn invalid_quote(market_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuote {
            market_id: market_id.into(),
            reason: reason.into(),
        }
    }

    /// Classifies the error for the caller's handling policy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimitExceeded { .. } => ErrorClass::ResourceExhausted,
            Self::Timeout(_) | Self::Transient(_) => ErrorClass::Transient,
            Self::Client { .. }
            | Self::InvalidQuote { .. }
            | Self::InvalidRequest(_)
            | Self::MalformedResponse(_) => ErrorClass::Client,
        }
    }

    /// Returns true when the call should be deferred rather than failed.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}
