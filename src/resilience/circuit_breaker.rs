use crate::config::{duration, invalid_field};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// Circuit is half-open - a single trial request tests recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    #[serde(rename = "reset_timeout_ms", with = "duration::millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(invalid_field(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(invalid_field(
                "circuit_breaker.reset_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Breaker state for one `service:operation` key
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub next_attempt_time: Option<Instant>,
    /// When the outstanding half-open trial was admitted
    trial_started: Option<Instant>,
}

impl CircuitBreakerState {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
            trial_started: None,
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.next_attempt_time = None;
        self.trial_started = None;
    }

    fn open(&mut self, now: Instant, reset_timeout: Duration) {
        self.state = CircuitState::Open;
        self.next_attempt_time = Some(now + reset_timeout);
        self.trial_started = None;
    }
}

/// Outcome of asking the breaker whether a call may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit is closed (or has never failed)
    Allowed,
    /// The single half-open trial call
    Trial,
    /// Circuit is open, or a trial is already in flight
    Rejected { retry_in: Option<Duration> },
}

impl Admission {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Point-in-time view of one breaker for operational tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    /// Milliseconds since the last recorded failure
    pub last_failure_ms_ago: Option<u64>,
    /// Milliseconds until an open circuit admits a trial call
    pub retry_in_ms: Option<u64>,
}

/// Per-key circuit breakers.
///
/// State is created lazily on the first recorded failure and kept for the
/// life of the registry; only [`CircuitBreakerRegistry::reset`] and
/// [`CircuitBreakerRegistry::reset_all`] return a breaker to closed outside
/// the normal state machine. Each transition happens inside one write-lock
/// section, so concurrent callers cannot interleave a read-modify-write.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, CircuitBreakerState>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a call for `key` may proceed, moving OPEN to HALF_OPEN once the cooldown has elapsed
    pub async fn try_acquire(&self, key: &str) -> Admission {
        let mut breakers = self.breakers.write().await;
        let Some(breaker) = breakers.get_mut(key) else {
            return Admission::Allowed;
        };

        let now = Instant::now();
        match breaker.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => match breaker.next_attempt_time {
                Some(next) if now < next => Admission::Rejected {
                    retry_in: Some(next - now),
                },
                _ => {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.trial_started = Some(now);
                    info!(
                        "Circuit breaker '{}': Transitioning from Open to Half-Open",
                        key
                    );
                    Admission::Trial
                }
            },
            CircuitState::HalfOpen => match breaker.trial_started {
                Some(started) if now.duration_since(started) < self.config.reset_timeout => {
                    debug!("Circuit breaker '{}': Trial already in flight", key);
                    Admission::Rejected {
                        retry_in: Some(self.config.reset_timeout - now.duration_since(started)),
                    }
                }
                _ => {
                    // The previous trial never reported back
                    breaker.trial_started = Some(now);
                    Admission::Trial
                }
            },
        }
    }

    /// Record a successful call; any non-closed breaker closes
    pub async fn record_success(&self, key: &str) {
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get_mut(key) {
            if breaker.state != CircuitState::Closed {
                info!(
                    "Circuit breaker '{}': Transitioning from {:?} to Closed",
                    key, breaker.state
                );
            }
            breaker.close();
        }
    }

    /// Record a failed call, opening the circuit when the threshold is reached
    pub async fn record_failure(&self, key: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(key.to_string())
            .or_insert_with(CircuitBreakerState::new);

        let now = Instant::now();
        breaker.failure_count = breaker.failure_count.saturating_add(1);
        breaker.last_failure_time = Some(now);

        match breaker.state {
            CircuitState::Closed => {
                if breaker.failure_count >= self.config.failure_threshold {
                    breaker.open(now, self.config.reset_timeout);
                    warn!(
                        "Circuit breaker '{}': Opening due to {} failures",
                        key, breaker.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                breaker.open(now, self.config.reset_timeout);
                warn!(
                    "Circuit breaker '{}': Returning to Open from Half-Open due to failure",
                    key
                );
            }
            CircuitState::Open => {
                // Already open, a call admitted before the trip finished late
            }
        }
    }

    /// Reset one breaker to closed; returns `false` if it has never failed
    pub async fn reset(&self, key: &str) -> bool {
        let mut breakers = self.breakers.write().await;
        breakers.get_mut(key).map_or(false, |breaker| {
            breaker.close();
            breaker.last_failure_time = None;
            info!("Circuit breaker '{}': Reset to Closed state", key);
            true
        })
    }

    pub async fn reset_all(&self) {
        let mut breakers = self.breakers.write().await;
        for (key, breaker) in breakers.iter_mut() {
            breaker.close();
            breaker.last_failure_time = None;
            info!("Circuit breaker '{}': Reset to Closed state", key);
        }
    }

    /// Force a breaker open for one cooldown period (maintenance or testing)
    pub async fn force_open(&self, key: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(key.to_string())
            .or_insert_with(CircuitBreakerState::new);
        breaker.open(Instant::now(), self.config.reset_timeout);
        warn!("Circuit breaker '{}': Forced to Open state", key);
    }

    /// Current state for `key`; keys that never failed are closed
    pub async fn state(&self, key: &str) -> CircuitState {
        self.breakers
            .read()
            .await
            .get(key)
            .map_or(CircuitState::Closed, |breaker| breaker.state)
    }

    pub async fn snapshot(&self, key: &str) -> Option<CircuitBreakerSnapshot> {
        let breakers = self.breakers.read().await;
        breakers
            .get(key)
            .map(|breaker| Self::to_snapshot(key, breaker, Instant::now()))
    }

    /// Snapshots of every breaker, sorted by key
    pub async fn snapshot_all(&self) -> Vec<CircuitBreakerSnapshot> {
        let now = Instant::now();
        let breakers = self.breakers.read().await;
        let mut snapshots: Vec<_> = breakers
            .iter()
            .map(|(key, breaker)| Self::to_snapshot(key, breaker, now))
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    fn to_snapshot(key: &str, breaker: &CircuitBreakerState, now: Instant) -> CircuitBreakerSnapshot {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);

        CircuitBreakerSnapshot {
            key: key.to_string(),
            state: breaker.state,
            failure_count: breaker.failure_count,
            last_failure_ms_ago: breaker
                .last_failure_time
                .map(|at| millis(now.saturating_duration_since(at))),
            retry_in_ms: match breaker.state {
                CircuitState::Open => breaker
                    .next_attempt_time
                    .map(|next| millis(next.saturating_duration_since(now))),
                _ => None,
            },
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
