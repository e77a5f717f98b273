pub mod circuit_breaker;
pub mod error_tracker;
pub mod executor;
pub mod fallback;
pub mod health;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{
    Admission, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerSnapshot, CircuitState,
};
pub use error_tracker::{ErrorPattern, ErrorTracker, ErrorTrackingConfig, ServiceErrorStats};
pub use executor::{ErrorContext, ErrorStats, ResilienceExecutor};
pub use fallback::FallbackStrategy;
pub use health::{
    probe_fn, HealthCheckConfig, HealthCheckResult, HealthMonitor, HealthProbe, HealthStatus,
    HttpProbe, ServiceMetrics, SystemHealth,
};
pub use retry::RetryConfig;
pub use timeout::{with_deadline, with_timeout};
