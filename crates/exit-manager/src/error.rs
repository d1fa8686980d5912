//! Errors raised while monitoring and exiting positions.

use algo_trade_core::{ErrorClass, GatewayError};
use thiserror::Error;

/// Exit engine error.
#[derive(Debug, Clone, Error)]
pub enum ExitError {
    /// Market gateway failure, already retried by the transport.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("persistence error: {0}")]
    Persistence(String),

    /// Input rejected before it could corrupt state.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("position not tracked: {0}")]
    PositionNotTracked(String),

    /// The monitor task has stopped and accepts no more commands.
    #[error("position monitor is not running")]
    MonitorStopped,

    /// State that must never occur. Aborts the position's tick and alerts.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ExitError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Classifies the error for the caller's handling policy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Gateway(e) => e.class(),
            Self::Persistence(_) => ErrorClass::Transient,
            Self::Validation(_)
            | Self::Configuration(_)
            | Self::StrategyNotFound(_)
            | Self::PositionNotTracked(_) => ErrorClass::Client,
            Self::MonitorStopped => ErrorClass::Transient,
            Self::InvariantViolation(_) => ErrorClass::Invariant,
        }
    }

    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

impl From<std::io::Error> for ExitError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ExitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("serialization: {err}"))
    }
}

/// Result type for exit engine operations.
pub type Result<T> = std::result::Result<T, ExitError>;
