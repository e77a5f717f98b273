//! Rolling histogram of normalized error patterns per service.
//!
//! Messages are normalized before counting so that the same failure with a
//! different request id, URL or port collapses into one pattern:
//! `GET https://api.x.io/v1/items/9 failed after 3021ms` becomes
//! `GET <URL> failed after <N>ms`.

use crate::config::{duration, invalid_field};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Error tracking settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorTrackingConfig {
    /// Distinct patterns kept per service; the least recently seen is dropped beyond this
    pub max_patterns_per_service: usize,
    /// Patterns not seen within this window are garbage-collected
    #[serde(rename = "monitoring_window_secs", with = "duration::secs")]
    pub monitoring_window: Duration,
    /// Minimum spacing between automatic garbage-collection passes
    #[serde(rename = "gc_interval_secs", with = "duration::secs")]
    pub gc_interval: Duration,
    /// Patterns reported per service in [`ErrorTracker::stats`]
    pub top_patterns: usize,
}

impl Default for ErrorTrackingConfig {
    fn default() -> Self {
        Self {
            max_patterns_per_service: 100,
            monitoring_window: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(300),
            top_patterns: 10,
        }
    }
}

impl ErrorTrackingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_patterns_per_service == 0 {
            return Err(invalid_field(
                "error_tracking.max_patterns_per_service",
                "must be greater than zero",
            ));
        }
        if self.monitoring_window.is_zero() {
            return Err(invalid_field(
                "error_tracking.monitoring_window_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Replaces variable fragments of error messages with placeholders
#[derive(Debug, Clone)]
pub struct ErrorNormalizer {
    url: Regex,
    uuid: Regex,
    digits: Regex,
}

impl ErrorNormalizer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("invalid error pattern regex: {e}")))
        };

        Ok(Self {
            url: compile(r#"(?i)\b(?:https?|wss?)://[^\s"'<>]+"#)?,
            uuid: compile(
                r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            )?,
            digits: compile(r"\d+")?,
        })
    }

    #[must_use]
    pub fn normalize(&self, message: &str) -> String {
        let message = self.url.replace_all(message, "<URL>");
        let message = self.uuid.replace_all(&message, "<UUID>");
        self.digits.replace_all(&message, "<N>").into_owned()
    }
}

/// One normalized error pattern and how often it occurred
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPattern {
    pub pattern: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    last_seen_at: Instant,
}

/// Error summary for one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceErrorStats {
    pub service: String,
    /// Errors recorded since the tracker was created
    pub total_errors: u64,
    pub distinct_patterns: usize,
    /// Most frequent patterns, highest count first
    pub top_patterns: Vec<ErrorPattern>,
}

#[derive(Debug, Default)]
struct ServiceErrors {
    total: u64,
    patterns: HashMap<String, ErrorPattern>,
}

#[derive(Debug)]
struct TrackerState {
    services: HashMap<String, ServiceErrors>,
    last_gc: Instant,
}

/// Per-service error histogram, bounded in size and age
#[derive(Debug)]
pub struct ErrorTracker {
    config: ErrorTrackingConfig,
    normalizer: ErrorNormalizer,
    state: RwLock<TrackerState>,
}

impl ErrorTracker {
    pub fn new(config: ErrorTrackingConfig) -> Result<Self> {
        Ok(Self {
            config,
            normalizer: ErrorNormalizer::new()?,
            state: RwLock::new(TrackerState {
                services: HashMap::new(),
                last_gc: Instant::now(),
            }),
        })
    }

    /// Count one occurrence of `error` against `service`
    pub async fn record(&self, service: &str, error: &Error) {
        let pattern = self.normalizer.normalize(&error.to_string());
        let now = Instant::now();
        let wall = Utc::now();

        let mut state = self.state.write().await;

        if now.duration_since(state.last_gc) >= self.config.gc_interval {
            Self::collect_garbage(&mut state, self.config.monitoring_window, now);
        }

        let errors = state.services.entry(service.to_string()).or_default();
        errors.total += 1;

        if let Some(existing) = errors.patterns.get_mut(&pattern) {
            existing.count += 1;
            existing.last_seen = wall;
            existing.last_seen_at = now;
            return;
        }

        if errors.patterns.len() >= self.config.max_patterns_per_service {
            let stalest = errors
                .patterns
                .values()
                .min_by_key(|p| p.last_seen_at)
                .map(|p| p.pattern.clone());
            if let Some(stalest) = stalest {
                errors.patterns.remove(&stalest);
            }
        }

        debug!("New error pattern for {}: {}", service, pattern);
        errors.patterns.insert(
            pattern.clone(),
            ErrorPattern {
                pattern,
                count: 1,
                first_seen: wall,
                last_seen: wall,
                last_seen_at: now,
            },
        );
    }

    /// Drop patterns older than the monitoring window; returns how many were removed
    pub async fn prune(&self) -> usize {
        let mut state = self.state.write().await;
        Self::collect_garbage(&mut state, self.config.monitoring_window, Instant::now())
    }

    fn collect_garbage(state: &mut TrackerState, window: Duration, now: Instant) -> usize {
        let mut removed = 0;

        for errors in state.services.values_mut() {
            let before = errors.patterns.len();
            errors
                .patterns
                .retain(|_, p| now.duration_since(p.last_seen_at) <= window);
            removed += before - errors.patterns.len();
        }

        state.last_gc = now;
        if removed > 0 {
            debug!("Garbage-collected {} stale error patterns", removed);
        }
        removed
    }

    /// Snapshot of every service's errors
    pub async fn stats(&self) -> HashMap<String, ServiceErrorStats> {
        let state = self.state.read().await;

        state
            .services
            .iter()
            .map(|(service, errors)| {
                let mut patterns: Vec<ErrorPattern> = errors.patterns.values().cloned().collect();
                patterns.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pattern.cmp(&b.pattern)));
                patterns.truncate(self.config.top_patterns);

                (
                    service.clone(),
                    ServiceErrorStats {
                        service: service.clone(),
                        total_errors: errors.total,
                        distinct_patterns: errors.patterns.len(),
                        top_patterns: patterns,
                    },
                )
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.state.write().await.services.clear();
    }
}
