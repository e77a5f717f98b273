use std::time::Duration;
use thiserror::Error;

/// Error categorization for the resilience core
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures)
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Network errors (transient - should retry)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timeout error: operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Failure reported by an upstream API wrapper, optionally carrying a
    /// machine-readable code such as `ECONNRESET` or `503`
    #[error("Upstream error from {service}: {message}")]
    Upstream {
        service: String,
        code: Option<String>,
        message: String,
    },

    #[error("Rate limit exceeded: retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    // Client errors (permanent - don't retry)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    // Circuit breaker errors
    #[error("Circuit breaker open for service: {service}")]
    CircuitBreakerOpen { service: String },

    #[error("Operation '{operation}' on {service} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        service: String,
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    // Cache errors
    #[error("Cache error: {operation} failed - {reason}")]
    Cache { operation: String, reason: String },

    #[error("Health check failed for {service}: {reason}")]
    HealthCheck { service: String, reason: String },

    // General service error
    #[error("Service error: {0}")]
    Service(String),
}

/// Error categorization for retry strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry
    Transient,
    /// Rate limited - retry with backoff
    RateLimited,
    /// Circuit breaker triggered - stop retrying temporarily
    CircuitBreaker,
}

impl Error {
    /// Build an upstream error with a code
    pub fn upstream(
        service: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Upstream {
            service: service.into(),
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Machine-readable code used when matching against retryable error lists
    #[must_use]
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Timeout { .. } => Some("ETIMEDOUT".to_string()),
            Self::RateLimitExceeded { .. } => Some("429".to_string()),
            Self::Upstream { code, .. } => code.clone(),
            Self::Http(e) => {
                if e.is_timeout() {
                    Some("ETIMEDOUT".to_string())
                } else if e.is_connect() {
                    Some("ECONNREFUSED".to_string())
                } else {
                    e.status().map(|status| status.as_u16().to_string())
                }
            }
            Self::RetriesExhausted { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Categorize error for retry logic
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::InvalidInput { .. }
            | Self::Serde(_)
            | Self::Cache { .. } => ErrorCategory::Permanent,

            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimited,

            Self::CircuitBreakerOpen { .. } => ErrorCategory::CircuitBreaker,

            Self::RetriesExhausted { source, .. } => source.category(),

            Self::Upstream { code, .. } => match code.as_deref().map(str::parse::<u16>) {
                Some(Ok(429)) => ErrorCategory::RateLimited,
                Some(Ok(400..=499)) => ErrorCategory::Permanent,
                _ => ErrorCategory::Transient,
            },

            Self::Http(_)
            | Self::Timeout { .. }
            | Self::HealthCheck { .. }
            | Self::Service(_) => ErrorCategory::Transient,
        }
    }

    /// Get suggested retry delay for rate limited errors
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<envy::Error> for Error {
    fn from(err: envy::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
