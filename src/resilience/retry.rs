use crate::config::{duration, invalid_field};
use crate::error::ErrorCategory;
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration.
///
/// Callers override individual fields with struct-update syntax:
///
/// ```
/// use mcp_resilience::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig {
///     max_retries: 2,
///     base_delay: Duration::from_millis(100),
///     ..RetryConfig::default()
/// };
/// assert_eq!(config.backoff_factor, 2.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_retries: u32,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Delay before the second attempt, before jitter
    #[serde(rename = "base_delay_ms", with = "duration::millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration::millis")]
    pub max_delay: Duration,
    /// Timeout for individual attempts
    #[serde(rename = "timeout_ms", with = "duration::millis")]
    pub timeout: Duration,
    /// Case-insensitive substrings of the error message, or exact error codes, that allow a retry
    pub retryable_errors: Vec<String>,
}

/// Error codes and message fragments treated as transient upstream failures
pub const DEFAULT_RETRYABLE_ERRORS: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "429",
    "500",
    "502",
    "503",
    "504",
    "network",
    "socket hang up",
];

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl RetryConfig {
    /// Create config for fast retries (for latency-sensitive lookups)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            backoff_factor: 1.5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Create config for rate limited retries
    #[must_use]
    pub fn rate_limited() -> Self {
        Self {
            max_retries: 5,
            backoff_factor: 2.0,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(invalid_field("retry.max_retries", "must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(invalid_field("retry.backoff_factor", "must be a finite number >= 1.0"));
        }
        if self.base_delay > self.max_delay {
            return Err(invalid_field("retry.base_delay_ms", "must not exceed max_delay_ms"));
        }
        if self.timeout.is_zero() {
            return Err(invalid_field("retry.timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    /// Whether `error` matches the retryable list by message substring or exact code
    #[must_use]
    pub fn is_retryable(&self, error: &Error) -> bool {
        // Synthetic breaker rejections are never retried
        if error.category() == ErrorCategory::CircuitBreaker {
            return false;
        }

        let message = error.to_string().to_lowercase();
        let code = error.code().map(|code| code.to_lowercase());

        self.retryable_errors.iter().any(|pattern| {
            let pattern = pattern.to_lowercase();
            !pattern.is_empty()
                && (message.contains(&pattern) || code.as_deref() == Some(pattern.as_str()))
        })
    }

    /// `min(base_delay * backoff_factor^(attempt-1) * jitter, max_delay)`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent) * jitter;
        let capped = delay.min(self.max_delay.as_secs_f64()).max(0.0);

        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Delay before the attempt after `attempt`, honoring an upstream `Retry-After` hint
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, error: &Error) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after.min(self.max_delay);
        }
        self.delay_for_attempt(attempt, jitter_factor())
    }
}

/// Uniform jitter factor in `[0.5, 1.0)`
#[must_use]
pub fn jitter_factor() -> f64 {
    rand::thread_rng().gen_range(0.5..1.0)
}
