//! RSA request signing for the Kalshi API.
//!
//! Every request carries a signature over `timestamp_ms + METHOD + path`,
//! where `path` is the full URL path without the query string. Signatures are
//! timestamp-bound, so a retried request must be signed again.
//!
//! # Security
//!
//! - Private keys are loaded from environment variables
//! - Private keys are NEVER logged
//! - The API key id is zeroized on drop
//!
//! # Example
//!
//! ```ignore
//! use algo_trade_kalshi::auth::{KalshiAuthConfig, KalshiSigner, RequestSigner};
//!
//! let signer = KalshiSigner::from_env(&KalshiAuthConfig::default())?;
//! let headers = signer.sign("GET", "/trade-api/v2/markets/KXBTC-TEST", current_timestamp_ms()?)?;
//! ```

use crate::error::{KalshiError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

/// Header carrying the API key id.
pub const ACCESS_KEY_HEADER: &str = "KALSHI-ACCESS-KEY";
/// Header carrying the base64 signature.
pub const SIGNATURE_HEADER: &str = "KALSHI-ACCESS-SIGNATURE";
/// Header carrying the signing timestamp in milliseconds.
pub const TIMESTAMP_HEADER: &str = "KALSHI-ACCESS-TIMESTAMP";

// =============================================================================
// Configuration
// =============================================================================

/// Names of the environment variables holding credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalshiAuthConfig {
    /// Environment variable name for API key ID.
    pub api_key_env: String,

    /// Environment variable name for private key (PEM format).
    pub private_key_env: String,
}

impl Default for KalshiAuthConfig {
    fn default() -> Self {
        Self {
            api_key_env: "KALSHI_API_KEY".to_string(),
            private_key_env: "KALSHI_PRIVATE_KEY".to_string(),
        }
    }
}

impl KalshiAuthConfig {
    /// Creates config for demo environment.
    #[must_use]
    pub fn demo() -> Self {
        Self {
            api_key_env: "KALSHI_DEMO_API_KEY".to_string(),
            private_key_env: "KALSHI_DEMO_PRIVATE_KEY".to_string(),
        }
    }

    /// Sets custom environment variable names.
    #[must_use]
    pub fn with_env_vars(
        mut self,
        api_key_env: impl Into<String>,
        private_key_env: impl Into<String>,
    ) -> Self {
        self.api_key_env = api_key_env.into();
        self.private_key_env = private_key_env.into();
        self
    }
}

// =============================================================================
// Signed Headers
// =============================================================================

/// Authentication headers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub access_key: String,
    /// Base64-encoded signature.
    pub signature: String,
    /// Unix timestamp in milliseconds, as sent.
    pub timestamp: String,
}

impl SignedHeaders {
    /// Returns headers as name/value pairs for reqwest.
    #[must_use]
    pub fn as_tuples(&self) -> [(&'static str, &str); 3] {
        [
            (ACCESS_KEY_HEADER, &self.access_key),
            (SIGNATURE_HEADER, &self.signature),
            (TIMESTAMP_HEADER, &self.timestamp),
        ]
    }
}

/// Builds the exact byte string that gets signed.
#[must_use]
pub fn signing_message(timestamp_ms: u64, method: &str, path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    format!("{timestamp_ms}{}{path}", method.to_ascii_uppercase())
}

/// Current Unix time in milliseconds.
///
/// # Errors
/// Returns error if the system clock is before the Unix epoch.
pub fn current_timestamp_ms() -> Result<u64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| KalshiError::Signing(format!("failed to get timestamp: {e}")))?;
    u64::try_from(elapsed.as_millis())
        .map_err(|e| KalshiError::Signing(format!("timestamp overflow: {e}")))
}

// =============================================================================
// Signer
// =============================================================================

/// Produces authentication headers for a request.
///
/// The transport calls this once per HTTP attempt.
pub trait RequestSigner: Send + Sync {
    /// Signs `method` + `path` at `timestamp_ms`.
    ///
    /// # Errors
    /// Returns error if signing fails.
    fn sign(&self, method: &str, path: &str, timestamp_ms: u64) -> Result<SignedHeaders>;
}

/// RSA (PKCS#1 v1.5, SHA-256) signer holding the account's private key.
pub struct KalshiSigner {
    api_key: String,
    signing_key: SigningKey<Sha256>,
}

impl std::fmt::Debug for KalshiSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiSigner")
            .field("api_key", &self.api_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for KalshiSigner {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl KalshiSigner {
    /// Creates a signer from an API key id and a PKCS#8 PEM private key.
    ///
    /// # Errors
    /// Returns error if the private key cannot be parsed.
    pub fn new(api_key: impl Into<String>, private_key_pem: &SecretString) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem.expose_secret())
            .map_err(|e| KalshiError::Signing(format!("failed to parse private key: {e}")))?;
        Ok(Self::from_key(api_key, private_key))
    }

    /// Creates a signer from an already-decoded key.
    #[must_use]
    pub fn from_key(api_key: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self {
            api_key: api_key.into(),
            signing_key: SigningKey::<Sha256>::new(private_key),
        }
    }

    /// Creates a signer from the environment variables named in `config`.
    ///
    /// Literal `\n` sequences in the PEM variable are unescaped, so keys can be
    /// passed on a single line.
    ///
    /// # Errors
    /// Returns error if a variable is missing or the key is invalid.
    pub fn from_env(config: &KalshiAuthConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            KalshiError::Configuration(format!(
                "missing environment variable: {}",
                config.api_key_env
            ))
        })?;

        let pem = std::env::var(&config.private_key_env).map_err(|_| {
            KalshiError::Configuration(format!(
                "missing environment variable: {}",
                config.private_key_env
            ))
        })?;
        let pem = SecretString::from(pem.replace("\\n", "\n"));

        Self::new(api_key, &pem)
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl RequestSigner for KalshiSigner {
    fn sign(&self, method: &str, path: &str, timestamp_ms: u64) -> Result<SignedHeaders> {
        let message = signing_message(timestamp_ms, method, path);
        let signature = self
            .signing_key
            .try_sign(message.as_bytes())
            .map_err(|e| KalshiError::Signing(e.to_string()))?;

        Ok(SignedHeaders {
            access_key: self.api_key.clone(),
            signature: BASE64.encode(signature.to_bytes()),
            timestamp: timestamp_ms.to_string(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
