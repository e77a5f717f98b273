use super::circuit_breaker::{
    Admission, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerSnapshot,
};
use super::error_tracker::{ErrorTracker, ErrorTrackingConfig, ServiceErrorStats};
use super::fallback::FallbackStrategy;
use super::retry::RetryConfig;
use super::timeout::with_deadline;
use crate::{Config, Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Identifies a call for breaker keying, logging and error tracking
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    pub operation: String,
    pub service: String,
    /// Current attempt number, starting at 1; maintained by the executor
    pub attempt: u32,
    pub metadata: HashMap<String, Value>,
}

impl ErrorContext {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            service: service.into(),
            attempt: 0,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Circuit breaker key, `service:operation`
    #[must_use]
    pub fn breaker_key(&self) -> String {
        format!("{}:{}", self.service, self.operation)
    }
}

/// Read-only view of error patterns and breaker states
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub services: HashMap<String, ServiceErrorStats>,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
}

/// Runs upstream calls with timeouts, retries, circuit breaking and fallbacks
#[derive(Debug)]
pub struct ResilienceExecutor {
    default_retry: RetryConfig,
    breakers: CircuitBreakerRegistry,
    errors: ErrorTracker,
}

impl ResilienceExecutor {
    pub fn new(
        default_retry: RetryConfig,
        breaker: CircuitBreakerConfig,
        tracking: ErrorTrackingConfig,
    ) -> Result<Self> {
        Ok(Self {
            default_retry,
            breakers: CircuitBreakerRegistry::new(breaker),
            errors: ErrorTracker::new(tracking)?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.retry.clone(),
            config.circuit_breaker.clone(),
            config.error_tracking.clone(),
        )
    }

    #[must_use]
    pub const fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    #[must_use]
    pub const fn error_tracker(&self) -> &ErrorTracker {
        &self.errors
    }

    #[must_use]
    pub const fn default_retry(&self) -> &RetryConfig {
        &self.default_retry
    }

    /// Execute `operation` under the breaker for `service:operation`, retrying retryable failures.
    ///
    /// Returns the operation's value, the fallback's value, or an error: the
    /// breaker rejection when the call was never admitted and no fallback is
    /// set, otherwise [`Error::RetriesExhausted`] wrapping the last cause.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        mut operation: F,
        mut context: ErrorContext,
        retry: Option<RetryConfig>,
        fallback: Option<FallbackStrategy<T>>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = retry.as_ref().unwrap_or(&self.default_retry);
        let key = context.breaker_key();

        if let Admission::Rejected { retry_in } = self.breakers.try_acquire(&key).await {
            debug!("Circuit breaker '{}' rejected call (retry in {:?})", key, retry_in);
            let cause = Error::CircuitBreakerOpen {
                service: key.clone(),
            };
            return match fallback {
                Some(fallback) => {
                    warn!("Circuit open for '{}', using {} fallback", key, fallback.kind());
                    Ok(fallback.resolve(&key).await)
                }
                None => Err(cause),
            };
        }

        let max_attempts = retry.max_retries.max(1);
        let started = Instant::now();
        context.attempt = 0;

        let last_error = loop {
            context.attempt += 1;

            match with_deadline(retry.timeout, operation()).await {
                Ok(value) => {
                    self.breakers.record_success(&key).await;
                    if context.attempt > 1 {
                        info!(
                            "Operation '{}' succeeded after {} attempts ({:?})",
                            key,
                            context.attempt,
                            started.elapsed()
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    self.errors.record(&context.service, &error).await;

                    if !retry.is_retryable(&error) {
                        debug!(
                            "Operation '{}' failed with non-retryable error: {}",
                            key, error
                        );
                        break error;
                    }

                    if context.attempt >= max_attempts {
                        error!(
                            "Operation '{}' failed after {} attempts: {} (metadata: {:?})",
                            key, context.attempt, error, context.metadata
                        );
                        break error;
                    }

                    let delay = retry.backoff_delay(context.attempt, &error);
                    log_retry(&key, context.attempt, delay, &error);
                    sleep(delay).await;
                }
            }
        };

        self.breakers.record_failure(&key).await;

        match fallback {
            Some(fallback) => {
                warn!(
                    "Operation '{}' exhausted, using {} fallback: {}",
                    key,
                    fallback.kind(),
                    last_error
                );
                Ok(fallback.resolve(&key).await)
            }
            None => Err(Error::RetriesExhausted {
                service: context.service,
                operation: context.operation,
                attempts: context.attempt,
                source: Box::new(last_error),
            }),
        }
    }

    /// Error patterns per service plus every breaker's state
    pub async fn get_error_stats(&self) -> ErrorStats {
        ErrorStats {
            services: self.errors.stats().await,
            circuit_breakers: self.breakers.snapshot_all().await,
        }
    }

    /// Operator action: close one breaker
    pub async fn reset_circuit_breaker(&self, key: &str) -> bool {
        self.breakers.reset(key).await
    }

    pub async fn reset_all_circuit_breakers(&self) {
        self.breakers.reset_all().await;
    }
}

/// Severity rises with each retry of the same call
fn log_retry(key: &str, attempt: u32, delay: Duration, error: &Error) {
    match attempt {
        1 => debug!(
            "Operation '{}' failed (attempt {}), retrying after {:?}: {}",
            key, attempt, delay, error
        ),
        2 => warn!(
            "Operation '{}' failed (attempt {}), retrying after {:?}: {}",
            key, attempt, delay, error
        ),
        _ => error!(
            "Operation '{}' failed (attempt {}), retrying after {:?}: {}",
            key, attempt, delay, error
        ),
    }
}
