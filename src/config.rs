//! Service configuration
//!
//! All tunables are collected into [`AppConfig`], constructed once in `main`
//! and injected into the components that need them. The webhook signing
//! secret is validated here so that a misconfigured deployment fails at
//! startup instead of failing on the first delivery.
//!
//! # Environment Variables
//!
//! - `PAYFLOW_SIGNING_SECRET` (required): shared secret for the `X-Signature` HMAC
//! - `PAYFLOW_DELIVERY_TIMEOUT_MS` (optional): per-target webhook timeout (default: 5000)
//! - `PAYFLOW_RENDER_TIMEOUT_MS` (optional): invoice renderer timeout (default: 10000)
//! - `PAYFLOW_OUTBOX_MAX_RETRIES` (optional): retry budget per side effect (default: 3)
//! - `PAYFLOW_ALLOW_LOOPBACK_WEBHOOKS` (optional): set to "true" to disable the
//!   SSRF guard for loopback targets (local development only)

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Default per-target webhook delivery timeout in milliseconds
const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 5_000;

/// Default invoice renderer timeout in milliseconds
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 10_000;

/// Default retry budget for outbox side effects
const DEFAULT_OUTBOX_MAX_RETRIES: u32 = 3;

/// Base delay between outbox retries; doubles per attempt
const DEFAULT_RETRY_BASE_MS: u64 = 500;

/// Upper bound on a single backoff delay
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Interval at which the outbox worker sweeps for stranded entries
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Timeout applied to one processing attempt of one outbox entry
const DEFAULT_PROCESSING_TIMEOUT_SECS: u64 = 30;

/// Service configuration, injected at construction time.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Shared webhook signing secret. Never logged.
    pub signing_secret: String,

    /// Per-target webhook delivery timeout
    pub delivery_timeout: Duration,

    /// Invoice renderer timeout
    pub render_timeout: Duration,

    /// Retry budget per outbox side effect
    pub outbox_max_retries: u32,

    /// Base backoff delay between outbox retries
    pub outbox_retry_base: Duration,

    /// Timeout for a single outbox processing attempt
    pub processing_timeout: Duration,

    /// How often the outbox worker sweeps the store for stranded entries
    pub sweep_interval: Duration,

    /// Disable the loopback/unspecified SSRF guard. Local testing only.
    pub allow_loopback_webhooks: bool,
}

impl AppConfig {
    /// Build a configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `PAYFLOW_SIGNING_SECRET` is unset
    /// or empty, or if a numeric override fails to parse.
    pub fn from_env() -> Result<Self> {
        let secret = env::var("PAYFLOW_SIGNING_SECRET")
            .map_err(|_| Error::configuration("PAYFLOW_SIGNING_SECRET environment variable not set"))?;

        let allow_loopback = env::var("PAYFLOW_ALLOW_LOOPBACK_WEBHOOKS")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        let mut config = Self::with_secret(secret)?;
        config.delivery_timeout =
            Duration::from_millis(env_ms("PAYFLOW_DELIVERY_TIMEOUT_MS", DEFAULT_DELIVERY_TIMEOUT_MS)?);
        config.render_timeout =
            Duration::from_millis(env_ms("PAYFLOW_RENDER_TIMEOUT_MS", DEFAULT_RENDER_TIMEOUT_MS)?);
        config.outbox_max_retries = env_ms("PAYFLOW_OUTBOX_MAX_RETRIES", u64::from(DEFAULT_OUTBOX_MAX_RETRIES))? as u32;
        config.allow_loopback_webhooks = allow_loopback;

        if allow_loopback {
            warn!("SECURITY: loopback webhook targets allowed (PAYFLOW_ALLOW_LOOPBACK_WEBHOOKS=true)");
        }

        Ok(config)
    }

    /// Build a configuration with the given signing secret and defaults for
    /// everything else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the secret is empty.
    pub fn with_secret(secret: impl Into<String>) -> Result<Self> {
        let signing_secret = secret.into();

        if signing_secret.is_empty() {
            return Err(Error::configuration("signing secret cannot be empty"));
        }

        if signing_secret.len() < 32 {
            warn!("SECURITY WARNING: signing secret is less than 32 characters");
        }

        Ok(Self {
            signing_secret,
            delivery_timeout: Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS),
            render_timeout: Duration::from_millis(DEFAULT_RENDER_TIMEOUT_MS),
            outbox_max_retries: DEFAULT_OUTBOX_MAX_RETRIES,
            outbox_retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            processing_timeout: Duration::from_secs(DEFAULT_PROCESSING_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            allow_loopback_webhooks: false,
        })
    }

    /// Backoff delay before retry `attempt` (0-based). Doubles per attempt,
    /// capped at 30 seconds.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.outbox_retry_base.as_millis() as u64;
        let delay = base.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(delay.min(MAX_RETRY_DELAY_MS))
    }

    /// Create a test configuration (for testing only)
    #[cfg(test)]
    pub fn test_config() -> Self {
        let mut config = Self::with_secret("test-signing-secret-for-unit-tests").unwrap();
        config.outbox_retry_base = Duration::from_millis(10);
        config.allow_loopback_webhooks = true;
        config
    }
}

fn env_ms(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| Error::configuration(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_secret_rejected() {
        let err = AppConfig::with_secret("").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::with_secret("a-long-enough-secret-for-tests-okay").unwrap();
        assert_eq!(config.delivery_timeout, Duration::from_millis(5_000));
        assert_eq!(config.outbox_max_retries, 3);
        assert!(!config.allow_loopback_webhooks);
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = AppConfig::with_secret("a-long-enough-secret-for-tests-okay").unwrap();
        assert_eq!(config.retry_delay(0), Duration::from_millis(500));
        assert_eq!(config.retry_delay(1), Duration::from_millis(1_000));
        assert_eq!(config.retry_delay(2), Duration::from_millis(2_000));
        // Large attempts hit the cap instead of overflowing
        assert_eq!(config.retry_delay(30), Duration::from_millis(30_000));
    }
}
