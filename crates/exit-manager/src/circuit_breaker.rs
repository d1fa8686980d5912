//! Engine-wide circuit breaker.
//!
//! Trips after too many consecutive failed exit executions or once the day's
//! realized loss passes a limit. While tripped, the `circuit_breaker` exit
//! condition fires for every monitored position. It resets on an operator call
//! or at the UTC day rollover.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Maximum consecutive failed executions before tripping.
    pub max_consecutive_failures: u32,

    /// Maximum realized loss per UTC day, in dollars.
    pub max_daily_loss: Decimal,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            max_daily_loss: Decimal::new(500, 0),
        }
    }
}

/// Why the breaker tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    ConsecutiveFailures,
    DailyLoss,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Normal operation.
    Closed,
    Tripped(TripReason),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    daily_pnl: Decimal,
    day: NaiveDate,
    tripped_at: Option<DateTime<Utc>>,
}

/// Circuit breaker shared by every position worker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                daily_pnl: Decimal::ZERO,
                day: Utc::now().date_naive(),
                tripped_at: None,
            }),
        }
    }

    /// Returns true while tripped, applying the day rollover first.
    pub fn is_tripped(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        Self::roll_day(&mut inner, now);
        matches!(inner.state, CircuitBreakerState::Tripped(_))
    }

    /// Records an execution that filled something, booking its P&L.
    pub fn record_success(&self, realized_pnl: Decimal, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        Self::roll_day(&mut inner, now);
        inner.consecutive_failures = 0;
        inner.daily_pnl += realized_pnl;

        if inner.daily_pnl < -self.config.max_daily_loss {
            self.trip_locked(&mut inner, TripReason::DailyLoss, now);
        }
    }

    /// Records an execution that filled nothing.
    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        Self::roll_day(&mut inner, now);
        inner.consecutive_failures += 1;

        if inner.consecutive_failures >= self.config.max_consecutive_failures {
            self.trip_locked(&mut inner, TripReason::ConsecutiveFailures, now);
        }
    }

    /// Manually trips the circuit breaker.
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        self.trip_locked(&mut inner, TripReason::Manual, Utc::now());
    }

    /// Resets the circuit breaker.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.tripped_at = None;
        tracing::info!("Circuit breaker reset");
    }

    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Realized P&L booked today.
    #[must_use]
    pub fn daily_pnl(&self) -> Decimal {
        self.inner.lock().daily_pnl
    }

    #[must_use]
    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().tripped_at
    }

    fn trip_locked(&self, inner: &mut BreakerInner, reason: TripReason, now: DateTime<Utc>) {
        if inner.state == CircuitBreakerState::Tripped(reason) {
            return;
        }
        inner.state = CircuitBreakerState::Tripped(reason);
        inner.tripped_at = Some(now);
        tracing::warn!(
            reason = ?reason,
            failures = inner.consecutive_failures,
            daily_pnl = %inner.daily_pnl,
            max_loss = %self.config.max_daily_loss,
            "Circuit breaker tripped"
        );
    }

    fn roll_day(inner: &mut BreakerInner, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today <= inner.day {
            return;
        }
        inner.day = today;
        inner.daily_pnl = Decimal::ZERO;
        inner.consecutive_failures = 0;
        if inner.state != CircuitBreakerState::Closed {
            inner.state = CircuitBreakerState::Closed;
            inner.tripped_at = None;
            tracing::info!(day = %today, "Circuit breaker reset at day rollover");
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
