//! Token-bucket admission for outbound Kalshi calls.
//!
//! Every HTTP attempt made by the transport, retries included, consumes one
//! token. Callers wait for a token up to a configurable ceiling and then fail
//! with [`KalshiError::RateLimitExceeded`], which the exit engine treats as a
//! deferral rather than a failure.
//!
//! The bucket is a governor GCRA limiter driven by [`TokioClock`], so it
//! follows tokio's clock (including paused time in tests).
//!
//! # Usage
//!
//! ```ignore
//! use algo_trade_kalshi::rate_limiter::{RateLimiterConfig, TokenBucket};
//!
//! let bucket = TokenBucket::new(RateLimiterConfig::default());
//! bucket.acquire().await?;
//! // ... make exactly one HTTP call ...
//! ```

use crate::error::{KalshiError, Result};
use governor::{
    clock::Clock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Clock
// =============================================================================

/// governor clock backed by `tokio::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Direct (un-keyed) limiter on the tokio clock.
pub type DirectLimiter =
    RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<<TokioClock as Clock>::Instant>>;

// =============================================================================
// Configuration
// =============================================================================

/// Token-bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Sustained refill rate.
    pub requests_per_minute: NonZeroU32,
    /// Bucket capacity.
    pub burst: NonZeroU32,
    /// Longest a caller may wait for a token.
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: nonzero!(100u32),
            burst: nonzero!(100u32),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RateLimiterConfig {
    #[must_use]
    pub fn new(requests_per_minute: NonZeroU32, burst: NonZeroU32, max_wait: Duration) -> Self {
        Self {
            requests_per_minute,
            burst,
            max_wait,
        }
    }

    /// Half the default quota, for keys shared with other consumers.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            requests_per_minute: nonzero!(50u32),
            burst: nonzero!(10u32),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn quota(&self) -> Quota {
        Quota::per_minute(self.requests_per_minute).allow_burst(self.burst)
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Admission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Calls that received a token.
    pub admitted: u64,
    /// Admitted calls that had to wait first.
    pub delayed: u64,
    /// Calls rejected at the wait ceiling.
    pub rejected: u64,
}

// =============================================================================
// TokenBucket
// =============================================================================

/// Shared token bucket. All admission goes through one governor state.
pub struct TokenBucket {
    config: RateLimiterConfig,
    limiter: DirectLimiter,
    clock: TokioClock,
    admitted: AtomicU64,
    delayed: AtomicU64,
    rejected: AtomicU64,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl TokenBucket {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        let clock = TokioClock;
        Self {
            limiter: RateLimiter::direct_with_clock(config.quota(), &clock),
            config,
            clock,
            admitted: AtomicU64::new(0),
            delayed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Waits for one token.
    ///
    /// Returns how long the caller waited. Fails immediately, without
    /// sleeping, when the next token is further away than the remaining
    /// ceiling.
    ///
    /// # Errors
    /// Returns [`KalshiError::RateLimitExceeded`] when no token is available
    /// within `max_wait`.
    pub async fn acquire(&self) -> Result<Duration> {
        let started = tokio::time::Instant::now();
        let mut waited = false;

        loop {
            match self.limiter.check() {
                Ok(()) => {
                    self.admitted.fetch_add(1, Ordering::Relaxed);
                    if waited {
                        self.delayed.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(started.elapsed());
                }
                Err(not_until) => {
                    let wait = not_until
                        .wait_time_from(self.clock.now())
                        .max(Duration::from_millis(1));
                    let elapsed = started.elapsed();

                    if elapsed + wait > self.config.max_wait {
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            waited_ms = elapsed.as_millis() as u64,
                            next_token_ms = wait.as_millis() as u64,
                            "rate limit ceiling reached"
                        );
                        return Err(KalshiError::rate_limit_exceeded(elapsed));
                    }

                    waited = true;
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Takes a token only if one is available right now.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        if self.limiter.check().is_ok() {
            self.admitted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
