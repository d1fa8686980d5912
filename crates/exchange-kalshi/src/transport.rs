//! Signed, rate-limited HTTP transport with retry and backoff.
//!
//! Each HTTP attempt is admitted by the shared [`TokenBucket`], signed with a
//! fresh timestamp, and sent. Failures are handled as follows:
//!
//! | Response            | Behavior                                         |
//! |---------------------|--------------------------------------------------|
//! | 5xx                 | retry with exponential backoff (1s, 2s, 4s)      |
//! | 429                 | retry after the server's `Retry-After` seconds   |
//! | 4xx                 | fail immediately                                 |
//! | network timeout     | fail immediately; the caller re-polls next tick  |
//! | connection failure  | fail immediately                                 |
//!
//! 5xx and 429 share one retry budget (default 3).

use crate::auth::{current_timestamp_ms, RequestSigner};
use crate::error::{KalshiError, Result};
use crate::rate_limiter::{RateLimiterStats, TokenBucket};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fallback when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

// =============================================================================
// Retry Policy
// =============================================================================

/// Retry schedule for transient HTTP failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub base_delay: Duration,
    /// Upper bound on a server-supplied `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Delay before retrying after `err`, or `None` if it must not be retried.
    #[must_use]
    pub fn delay_for(&self, err: &KalshiError, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        match err {
            KalshiError::RateLimit { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs).min(self.max_retry_after))
            }
            e if e.is_server_error() => Some(self.backoff(retry)),
            _ => None,
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// HTTP settings for the transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL including the API prefix, e.g. `https://host/trade-api/v2`.
    pub base_url: String,
    /// Per-request network timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Authenticated transport shared by every outbound Kalshi call.
pub struct RateLimitedTransport {
    http: Client,
    base_url: String,
    /// Path component of `base_url`, prepended to signed paths.
    base_path: String,
    signer: Arc<dyn RequestSigner>,
    bucket: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RateLimitedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedTransport")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl RateLimitedTransport {
    /// Creates a transport.
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(
        config: TransportConfig,
        signer: Arc<dyn RequestSigner>,
        bucket: Arc<TokenBucket>,
    ) -> Result<Self> {
        let url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| KalshiError::Configuration(format!("invalid base url: {e}")))?;
        let base_path = url.path().trim_end_matches('/').to_string();

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KalshiError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            base_path,
            signer,
            bucket,
            retry: config.retry,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.bucket.stats()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send::<T, ()>(Method::DELETE, path, None).await
    }

    /// Sends a request, retrying transient failures per the [`RetryPolicy`].
    ///
    /// # Errors
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable error.
    pub async fn send<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let body = body.map(serde_json::to_string).transpose()?;
        let mut retry = 0;

        loop {
            match self.send_once(&method, path, body.as_deref()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(delay) = self.retry.delay_for(&err, retry) else {
                        return Err(err);
                    };
                    retry += 1;
                    warn!(
                        method = %method,
                        path,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One admitted, freshly signed HTTP attempt.
    async fn send_once<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<T> {
        self.bucket.acquire().await?;

        let url = format!("{}{}", self.base_url, path);
        let signed_path = format!("{}{}", self.base_path, path);
        let headers = self
            .signer
            .sign(method.as_str(), &signed_path, current_timestamp_ms()?)?;

        debug!(method = %method, url = %url, "sending request");

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json");
        for (name, value) in headers.as_tuples() {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Maps status codes to errors and parses successful bodies.
    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(KalshiError::rate_limit(retry_after));
        }

        let text = response.text().await?;
        if !status.is_success() {
            return Err(KalshiError::api(status.as_u16(), text));
        }

        let text = if text.trim().is_empty() { "null" } else { &text };
        Ok(serde_json::from_str(text)?)
    }
}
