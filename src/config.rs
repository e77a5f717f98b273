//! # Configuration
//!
//! Configuration is layered: built-in defaults, an optional TOML file,
//! `MCP_RESILIENCE__*` environment overrides, and finally the flat
//! `CACHE_*` variables that size the cache at process start.
//!
//! ```no_run
//! use mcp_resilience::Config;
//!
//! # fn example() -> mcp_resilience::Result<()> {
//! let config = Config::load(Some(std::path::Path::new("resilience.toml")))?;
//! println!("cache holds up to {} entries", config.cache.max_entries);
//! # Ok(())
//! # }
//! ```

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::error_tracker::ErrorTrackingConfig;
use crate::resilience::health::HealthCheckConfig;
use crate::resilience::retry::RetryConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Prefix for nested environment overrides, e.g. `MCP_RESILIENCE__RETRY__MAX_RETRIES=5`
pub const ENV_PREFIX: &str = "MCP_RESILIENCE";

/// Prefix for the flat cache sizing variables, e.g. `CACHE_MAX_ENTRIES=500`
pub const CACHE_ENV_PREFIX: &str = "CACHE_";

/// Serde helpers for durations expressed as integers
pub(crate) mod duration {
    pub mod secs {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u64(value.as_secs())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            u64::deserialize(deserializer).map(Duration::from_secs)
        }
    }

    pub mod millis {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            u64::deserialize(deserializer).map(Duration::from_millis)
        }
    }
}

/// Cache eviction policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest last-access time
    #[default]
    Lru,
    /// Evict the entry with the smallest access count
    Lfu,
    /// Evict the entry with the oldest creation time
    TtlOldest,
}

impl TryFrom<String> for EvictionPolicy {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "ttl" | "ttl-oldest" | "ttl_oldest" => Ok(Self::TtlOldest),
            other => Err(Error::InvalidInput {
                field: "eviction_policy".to_string(),
                reason: format!("unknown policy '{other}', expected lru, lfu or ttl-oldest"),
            }),
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::TtlOldest => "ttl-oldest",
        };
        f.write_str(name)
    }
}

/// Cache sizing, expiry and eviction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget across all serialized entries
    pub max_size: u64,
    /// Entry-count budget
    pub max_entries: usize,
    /// TTL applied when `set` is called without one
    #[serde(rename = "default_ttl_secs", with = "duration::secs")]
    pub default_ttl: Duration,
    /// Period of the background expiry sweep
    #[serde(rename = "cleanup_interval_secs", with = "duration::secs")]
    pub cleanup_interval: Duration,
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100 * 1024 * 1024,
            max_entries: 10_000,
            default_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

/// Flat `CACHE_*` variables; every field is optional and overrides the configured value
#[derive(Debug, Default, Deserialize)]
struct CacheEnv {
    max_size: Option<u64>,
    max_entries: Option<usize>,
    default_ttl: Option<u64>,
    cleanup_interval: Option<u64>,
    eviction_policy: Option<EvictionPolicy>,
}

impl CacheConfig {
    /// Build the cache configuration from `CACHE_*` process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_env_iter(std::env::vars())
    }

    /// Build the cache configuration from an explicit set of variables
    pub fn from_env_iter<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        config.apply_env(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: CacheEnv = envy::prefixed(CACHE_ENV_PREFIX).from_iter(vars)?;

        if let Some(max_size) = env.max_size {
            self.max_size = max_size;
        }
        if let Some(max_entries) = env.max_entries {
            self.max_entries = max_entries;
        }
        if let Some(ttl) = env.default_ttl {
            self.default_ttl = Duration::from_secs(ttl);
        }
        if let Some(interval) = env.cleanup_interval {
            self.cleanup_interval = Duration::from_secs(interval);
        }
        if let Some(policy) = env.eviction_policy {
            self.eviction_policy = policy;
        }
        Ok(())
    }

    /// Replace zero budgets and periods with their defaults, naming each one replaced
    #[must_use]
    pub fn or_defaults(mut self) -> (Self, Vec<&'static str>) {
        let defaults = Self::default();
        let mut replaced = Vec::new();

        if self.max_entries == 0 {
            self.max_entries = defaults.max_entries;
            replaced.push("max_entries");
        }
        if self.max_size == 0 {
            self.max_size = defaults.max_size;
            replaced.push("max_size");
        }
        if self.default_ttl.is_zero() {
            self.default_ttl = defaults.default_ttl;
            replaced.push("default_ttl");
        }
        if self.cleanup_interval.is_zero() {
            self.cleanup_interval = defaults.cleanup_interval;
            replaced.push("cleanup_interval");
        }
        (self, replaced)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(invalid_field("cache.max_entries", "must be greater than zero"));
        }
        if self.max_size == 0 {
            return Err(invalid_field("cache.max_size", "must be greater than zero"));
        }
        if self.default_ttl.is_zero() {
            return Err(invalid_field("cache.default_ttl_secs", "must be greater than zero"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(invalid_field("cache.cleanup_interval_secs", "must be greater than zero"));
        }
        Ok(())
    }
}

/// A service probed over HTTP, as declared in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpServiceConfig {
    pub service: String,
    pub endpoint: String,
    #[serde(rename = "interval_secs", with = "duration::secs", default = "default_probe_interval")]
    pub interval: Duration,
    #[serde(rename = "timeout_ms", with = "duration::millis", default = "default_probe_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

const fn default_probe_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_healthy_threshold() -> u32 {
    2
}

const fn default_unhealthy_threshold() -> u32 {
    3
}

impl From<&HttpServiceConfig> for HealthCheckConfig {
    fn from(value: &HttpServiceConfig) -> Self {
        Self::new(value.service.clone())
            .with_endpoint(value.endpoint.clone())
            .with_interval(value.interval)
            .with_timeout(value.timeout)
            .with_thresholds(value.healthy_threshold, value.unhealthy_threshold)
    }
}

/// Health monitoring settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub services: Vec<HttpServiceConfig>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level configuration for the resilience core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub error_tracking: ErrorTrackingConfig,
    pub health: HealthSettings,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars())
    }

    /// Same as [`Config::load`] with an explicit source for the `CACHE_*` variables
    pub fn load_with_env<I>(path: Option<&Path>, cache_vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.cache.apply_env(cache_vars)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.error_tracking.validate()?;

        for service in &self.health.services {
            HealthCheckConfig::from(service).validate()?;
        }

        Ok(())
    }
}

pub(crate) fn invalid_field(field: &str, reason: &str) -> Error {
    Error::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
