//! Operator alerts for conditions a human must look at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    InvariantViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub position_id: String,
    pub market_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl OperatorAlert {
    pub fn invariant_violation(
        position_id: impl Into<String>,
        market_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            position_id: position_id.into(),
            market_id: market_id.into(),
            kind: AlertKind::InvariantViolation,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Receives operator alerts. Must not block.
pub trait OperatorAlertSink: Send + Sync {
    fn raise(&self, alert: OperatorAlert);
}

/// Logs alerts at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl OperatorAlertSink for TracingAlertSink {
    fn raise(&self, alert: OperatorAlert) {
        tracing::error!(
            alert = true,
            kind = ?alert.kind,
            position_id = %alert.position_id,
            market_id = %alert.market_id,
            "{}",
            alert.message
        );
    }
}

/// Forwards alerts to a supervising task.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<OperatorAlert>,
}

impl ChannelAlertSink {
    /// Creates a sink and the receiver its alerts arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OperatorAlert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OperatorAlertSink for ChannelAlertSink {
    fn raise(&self, alert: OperatorAlert) {
        if let Err(e) = self.tx.send(alert) {
            // Receiver gone: fall back to the log so the alert is not lost.
            TracingAlertSink.raise(e.0);
        }
    }
}
