//! # Health Monitor
//!
//! Periodically probes registered upstream services and classifies each one
//! as healthy, degraded or unhealthy.
//!
//! Status is driven by streaks of consecutive probe results:
//!
//! - `unhealthy_threshold` consecutive failures mark a service unhealthy
//! - `healthy_threshold` consecutive successes mark it healthy again
//! - a single failure on a healthy service marks it degraded
//!
//! Lifetime error rate and uptime are tracked and reported alongside, but
//! they never change the status.

use super::timeout::with_deadline;
use crate::config::{duration, invalid_field};
use crate::task::{run_periodic, TaskGroup};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Results kept per service
pub const HISTORY_LIMIT: usize = 100;

/// Health status of a monitored service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Check if status indicates the service is still usable
    #[must_use]
    pub const fn is_operational(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Ordering used for worst-case aggregation
    const fn severity(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unhealthy => 2,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// A check that reports whether a service is currently usable
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(true)` when the service is available
    async fn check(&self) -> Result<bool>;
}

struct FnProbe<F>(F);

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool>> + Send,
{
    async fn check(&self) -> Result<bool> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`HealthProbe`]
pub fn probe_fn<F, Fut>(check: F) -> Arc<dyn HealthProbe>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(FnProbe(check))
}

/// Probe that issues an HTTP GET; any status below 500 counts as reachable
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self) -> Result<bool> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        debug!("Health probe GET {} returned {}", self.url, status);
        Ok(!status.is_server_error())
    }
}

/// Used when neither a custom check nor an endpoint is configured
struct NoopProbe;

#[async_trait]
impl HealthProbe for NoopProbe {
    async fn check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// How and how often one service is probed
#[derive(Clone)]
pub struct HealthCheckConfig {
    pub service: String,
    pub endpoint: Option<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    /// Takes precedence over `endpoint`
    pub custom_check: Option<Arc<dyn HealthProbe>>,
}

impl HealthCheckConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            endpoint: None,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            custom_check: None,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_thresholds(mut self, healthy: u32, unhealthy: u32) -> Self {
        self.healthy_threshold = healthy;
        self.unhealthy_threshold = unhealthy;
        self
    }

    #[must_use]
    pub fn with_custom_check(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.custom_check = Some(probe);
        self
    }

    #[must_use]
    pub fn with_check_fn<F, Fut>(self, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        self.with_custom_check(probe_fn(check))
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(invalid_field("health.service", "must not be empty"));
        }
        if self.healthy_threshold == 0 {
            return Err(invalid_field("health.healthy_threshold", "must be at least 1"));
        }
        if self.unhealthy_threshold == 0 {
            return Err(invalid_field("health.unhealthy_threshold", "must be at least 1"));
        }
        if self.interval.is_zero() {
            return Err(invalid_field("health.interval_secs", "must be greater than zero"));
        }
        if self.timeout.is_zero() {
            return Err(invalid_field("health.timeout_ms", "must be greater than zero"));
        }
        if let Some(endpoint) = &self.endpoint {
            let url = url::Url::parse(endpoint).map_err(|e| {
                invalid_field("health.endpoint", &format!("'{endpoint}' is not a valid URL: {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid_field("health.endpoint", "scheme must be http or https"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HealthCheckConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheckConfig")
            .field("service", &self.service)
            .field("endpoint", &self.endpoint)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("healthy_threshold", &self.healthy_threshold)
            .field("unhealthy_threshold", &self.unhealthy_threshold)
            .field("custom_check", &self.custom_check.is_some())
            .finish()
    }
}

/// Lifetime probe metrics for one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub service: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    #[serde(rename = "average_response_time_ms", with = "duration::millis")]
    pub average_response_time: Duration,
    pub last_health_check: Option<DateTime<Utc>>,
    pub status: HealthStatus,
    /// Successful probes as a percentage of all probes
    pub uptime: f64,
    /// Failed probes as a percentage of all probes
    pub error_rate: f64,
}

impl ServiceMetrics {
    fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time: Duration::ZERO,
            last_health_check: None,
            status: HealthStatus::Healthy,
            uptime: 0.0,
            error_rate: 0.0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, success: bool, response_time: Duration, at: DateTime<Utc>) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        let n = u128::from(self.total_requests);
        let mean = (self.average_response_time.as_nanos() * (n - 1) + response_time.as_nanos()) / n;
        self.average_response_time = Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX));

        let total = self.total_requests as f64;
        self.uptime = self.successful_requests as f64 / total * 100.0;
        self.error_rate = self.failed_requests as f64 / total * 100.0;
        self.last_health_check = Some(at);
    }
}

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub service: String,
    /// Service status after this probe was applied
    pub status: HealthStatus,
    #[serde(rename = "response_time_ms", with = "duration::millis")]
    pub response_time: Duration,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl HealthCheckResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate health across every registered service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub total_services: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    #[serde(rename = "average_response_time_ms", with = "duration::millis")]
    pub average_response_time: Duration,
    pub average_uptime: f64,
    pub timestamp: DateTime<Utc>,
    /// Per-service metrics, sorted by service name
    pub services: Vec<ServiceMetrics>,
}

/// Pure status transition for one probe result
fn derive_status(
    current: HealthStatus,
    success: bool,
    consecutive_successes: u32,
    consecutive_failures: u32,
    config: &HealthCheckConfig,
) -> HealthStatus {
    if consecutive_failures >= config.unhealthy_threshold {
        HealthStatus::Unhealthy
    } else if consecutive_successes >= config.healthy_threshold {
        HealthStatus::Healthy
    } else if !success && current == HealthStatus::Healthy {
        HealthStatus::Degraded
    } else {
        current
    }
}

struct ServiceEntry {
    config: HealthCheckConfig,
    probe: Arc<dyn HealthProbe>,
    metrics: ServiceMetrics,
    consecutive_successes: u32,
    consecutive_failures: u32,
    history: VecDeque<HealthCheckResult>,
}

struct MonitorInner {
    services: RwLock<HashMap<String, ServiceEntry>>,
    client: reqwest::Client,
}

impl MonitorInner {
    fn resolve_probe(&self, config: &HealthCheckConfig) -> Arc<dyn HealthProbe> {
        if let Some(custom) = &config.custom_check {
            return Arc::clone(custom);
        }
        match &config.endpoint {
            Some(endpoint) => Arc::new(HttpProbe::new(self.client.clone(), endpoint.clone())),
            None => Arc::new(NoopProbe),
        }
    }

    async fn check(&self, name: &str) -> Result<HealthCheckResult> {
        let (probe, timeout) = {
            let services = self.services.read().await;
            let entry = services.get(name).ok_or_else(|| not_registered(name))?;
            (Arc::clone(&entry.probe), entry.config.timeout)
        };

        let started = Instant::now();
        let outcome = with_deadline(timeout, probe.check()).await;
        let response_time = started.elapsed();

        let error = match outcome {
            Ok(true) => None,
            Ok(false) => Some("probe reported service unavailable".to_string()),
            Err(e) => Some(e.to_string()),
        };
        let success = error.is_none();
        let timestamp = Utc::now();

        let mut services = self.services.write().await;
        // Unregistered while the probe was in flight
        let entry = services.get_mut(name).ok_or_else(|| not_registered(name))?;

        if success {
            entry.consecutive_successes = entry.consecutive_successes.saturating_add(1);
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            entry.consecutive_successes = 0;
        }

        let previous = entry.metrics.status;
        let status = derive_status(
            previous,
            success,
            entry.consecutive_successes,
            entry.consecutive_failures,
            &entry.config,
        );
        entry.metrics.record(success, response_time, timestamp);
        entry.metrics.status = status;

        if status != previous {
            log_transition(name, previous, status, error.as_deref());
        }

        let result = HealthCheckResult {
            service: name.to_string(),
            status,
            response_time,
            timestamp,
            error,
        };

        if entry.history.len() >= HISTORY_LIMIT {
            entry.history.pop_front();
        }
        entry.history.push_back(result.clone());

        Ok(result)
    }
}

fn not_registered(name: &str) -> Error {
    Error::HealthCheck {
        service: name.to_string(),
        reason: "service is not registered".to_string(),
    }
}

fn log_transition(name: &str, from: HealthStatus, to: HealthStatus, cause: Option<&str>) {
    let cause = cause.unwrap_or("none");
    match to {
        HealthStatus::Healthy => info!("Service '{}' recovered: {} -> {}", name, from, to),
        HealthStatus::Degraded => {
            warn!("Service '{}' degraded: {} -> {} (last error: {})", name, from, to, cause);
        }
        HealthStatus::Unhealthy => {
            error!("Service '{}' is unhealthy: {} -> {} (last error: {})", name, from, to, cause);
        }
    }
}

/// Timers of a running monitor, one group per service
struct Monitoring {
    token: CancellationToken,
    timers: HashMap<String, TaskGroup>,
}

/// Registry of monitored services and their probe timers
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    shutdown: CancellationToken,
    monitoring: Mutex<Option<Monitoring>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client for endpoint probes
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                services: RwLock::new(HashMap::new()),
                client,
            }),
            shutdown: CancellationToken::new(),
            monitoring: Mutex::new(None),
        }
    }

    /// Register or update a service.
    ///
    /// Re-registering an existing name replaces its configuration and keeps
    /// its metrics, streaks and history.
    pub async fn register_service(&self, config: HealthCheckConfig) -> Result<()> {
        config.validate()?;
        let name = config.service.clone();
        let interval = config.interval;
        let probe = self.inner.resolve_probe(&config);

        {
            let mut services = self.inner.services.write().await;
            if let Some(entry) = services.get_mut(&name) {
                debug!("Updating health check configuration for '{}'", name);
                entry.config = config;
                entry.probe = probe;
            } else {
                info!("Registered health check for '{}' every {:?}", name, interval);
                services.insert(
                    name.clone(),
                    ServiceEntry {
                        metrics: ServiceMetrics::new(&name),
                        config,
                        probe,
                        consecutive_successes: 0,
                        consecutive_failures: 0,
                        history: VecDeque::with_capacity(HISTORY_LIMIT),
                    },
                );
            }
        }

        let mut monitoring = self.monitoring.lock().await;
        if let Some(running) = monitoring.as_mut() {
            if let Some(previous) = running.timers.remove(&name) {
                previous.shutdown().await;
            }
            let timer = spawn_timer(&self.inner, &running.token, name.clone(), interval);
            running.timers.insert(name, timer);
        }
        Ok(())
    }

    /// Stop probing a service and drop its state; returns `false` if unknown
    pub async fn unregister_service(&self, name: &str) -> bool {
        if let Some(running) = self.monitoring.lock().await.as_mut() {
            if let Some(timer) = running.timers.remove(name) {
                timer.shutdown().await;
            }
        }

        let removed = self.inner.services.write().await.remove(name).is_some();
        if removed {
            info!("Unregistered health check for '{}'", name);
        }
        removed
    }

    /// Start one probe timer per registered service; the first probe runs immediately
    pub async fn start_monitoring(&self) -> bool {
        let mut monitoring = self.monitoring.lock().await;
        if monitoring.is_some() {
            return false;
        }

        let token = self.shutdown.child_token();
        let services: Vec<(String, Duration)> = self
            .inner
            .services
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.config.interval))
            .collect();

        let timers = services
            .into_iter()
            .map(|(name, interval)| {
                let timer = spawn_timer(&self.inner, &token, name.clone(), interval);
                (name, timer)
            })
            .collect::<HashMap<_, _>>();

        info!("Health monitoring started for {} services", timers.len());
        *monitoring = Some(Monitoring { token, timers });
        true
    }

    /// Cancel and join every probe timer
    pub async fn stop_monitoring(&self) {
        let Some(running) = self.monitoring.lock().await.take() else {
            return;
        };

        running.token.cancel();
        for timer in running.timers.into_values() {
            timer.shutdown().await;
        }
        info!("Health monitoring stopped");
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitoring.lock().await.is_some()
    }

    /// Probe one service now, exactly as a timer tick would
    pub async fn check_service(&self, name: &str) -> Result<HealthCheckResult> {
        self.inner.check(name).await
    }

    pub async fn get_service_health(&self, name: &str) -> Option<ServiceMetrics> {
        self.inner
            .services
            .read()
            .await
            .get(name)
            .map(|entry| entry.metrics.clone())
    }

    /// Metrics for every service, sorted by name
    pub async fn get_all_services_health(&self) -> Vec<ServiceMetrics> {
        let mut all: Vec<ServiceMetrics> = self
            .inner
            .services
            .read()
            .await
            .values()
            .map(|entry| entry.metrics.clone())
            .collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }

    /// Recent probe results, oldest first
    pub async fn get_service_history(&self, name: &str) -> Option<Vec<HealthCheckResult>> {
        self.inner
            .services
            .read()
            .await
            .get(name)
            .map(|entry| entry.history.iter().cloned().collect())
    }

    /// Worst-case status across all services plus averaged metrics
    #[allow(clippy::cast_precision_loss)]
    pub async fn get_system_health(&self) -> SystemHealth {
        let services = self.get_all_services_health().await;

        let mut healthy = 0;
        let mut degraded = 0;
        let mut unhealthy = 0;
        for metrics in &services {
            match metrics.status {
                HealthStatus::Healthy => healthy += 1,
                HealthStatus::Degraded => degraded += 1,
                HealthStatus::Unhealthy => unhealthy += 1,
            }
        }

        let status = services
            .iter()
            .map(|metrics| metrics.status)
            .max_by_key(|status| status.severity())
            .unwrap_or_default();

        let (average_response_time, average_uptime) = if services.is_empty() {
            (Duration::ZERO, 0.0)
        } else {
            let count = services.len();
            let total_nanos: u128 = services
                .iter()
                .map(|metrics| metrics.average_response_time.as_nanos())
                .sum();
            let mean_nanos = total_nanos / count as u128;
            let uptime = services.iter().map(|metrics| metrics.uptime).sum::<f64>() / count as f64;
            (
                Duration::from_nanos(u64::try_from(mean_nanos).unwrap_or(u64::MAX)),
                uptime,
            )
        };

        SystemHealth {
            status,
            total_services: services.len(),
            healthy,
            degraded,
            unhealthy,
            average_response_time,
            average_uptime,
            timestamp: Utc::now(),
            services,
        }
    }

    /// Stop monitoring; registered services are kept
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_timer(
    inner: &Arc<MonitorInner>,
    parent: &CancellationToken,
    name: String,
    interval: Duration,
) -> TaskGroup {
    let mut group = TaskGroup::new(parent);
    let inner = Arc::clone(inner);

    group.spawn(move |token| async move {
        run_periodic(token, interval, true, || async {
            if let Err(e) = inner.check(&name).await {
                debug!("Scheduled health check for '{}' skipped: {}", name, e);
            }
        })
        .await;
    });
    group
}
