pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod resilience;
mod task;

pub use cache::{CacheManager, CacheStats, OptimizeReport};
pub use config::{CacheConfig, Config, EvictionPolicy, LoggingConfig};
pub use error::{Error, ErrorCategory, Result};
pub use resilience::{
    CircuitBreakerConfig, CircuitState, ErrorContext, FallbackStrategy, HealthCheckConfig,
    HealthMonitor, HealthStatus, ResilienceExecutor, RetryConfig,
};
