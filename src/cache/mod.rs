//! # Cache Manager
//!
//! A bounded in-memory key/value store with TTL expiry and pluggable
//! eviction. Values are stored in serialized form, which lets one cache hold
//! responses of every wrapper type and gives each entry a byte size that is
//! computed once at insertion.
//!
//! Two budgets are enforced on every insert: the entry count and the total
//! byte size. When either would be exceeded, entries are evicted one at a
//! time according to the configured [`EvictionPolicy`] until both hold.
//!
//! ```no_run
//! use mcp_resilience::{CacheConfig, CacheManager};
//! use serde_json::json;
//!
//! # async fn example() -> mcp_resilience::Result<()> {
//! let cache = CacheManager::new(CacheConfig::from_env()?);
//! let key = CacheManager::generate_key("weather", &json!({"city": "Oslo", "units": "metric"}))?;
//!
//! if cache.get::<serde_json::Value>(&key).await.is_none() {
//!     cache.set(&key, &json!({"temp": 4.5}), None).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod entry;
mod eviction;
pub mod key;

pub use entry::CacheEntry;
pub use key::generate_key;

use crate::config::{CacheConfig, EvictionPolicy};
use crate::task::{run_periodic, TaskGroup};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cache statistics for monitoring and optimization.
///
/// Counters are cumulative since construction or the last [`CacheManager::clear`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Hit rate as a percentage of all lookups
    pub hit_rate: f64,
    /// Miss rate as a percentage of all lookups
    pub miss_rate: f64,
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub average_entry_size: f64,
    pub average_access_count: f64,
    pub max_size: u64,
    pub max_entries: usize,
    /// Byte budget in use, as a percentage
    pub memory_utilization: f64,
    pub eviction_policy: EvictionPolicy,
}

/// Outcome of an [`CacheManager::optimize`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    pub expired_removed: usize,
    pub evicted: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Everything mutated under the cache lock
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
    sequence: u64,
    counters: Counters,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.total_size += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
    }

    fn over_budget(&self, config: &CacheConfig, incoming_size: u64, incoming_entries: usize) -> bool {
        self.entries.len() + incoming_entries > config.max_entries
            || self.total_size + incoming_size > config.max_size
    }

    /// Evict one entry at a time until the incoming entry fits in both budgets
    fn ensure_capacity(&mut self, config: &CacheConfig, incoming_size: u64, incoming_entries: usize) -> usize {
        let mut evicted = 0;

        while self.over_budget(config, incoming_size, incoming_entries) {
            let Some(victim) = eviction::select_victim(config.eviction_policy, self.entries.values())
            else {
                break;
            };

            self.remove(&victim);
            self.counters.evictions += 1;
            evicted += 1;
            debug!("Evicted cache entry ({}): {}", config.eviction_policy, victim);
        }

        evicted
    }

    fn remove_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
            self.counters.expirations += 1;
        }

        expired.len()
    }

    fn optimize(&mut self, config: &CacheConfig) -> OptimizeReport {
        let expired_removed = self.remove_expired();
        let evicted = self.ensure_capacity(config, 0, 0);

        OptimizeReport {
            expired_removed,
            evicted,
        }
    }
}

/// Bounded multi-policy cache shared by every wrapper tool
#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    state: Arc<RwLock<CacheState>>,
    shutdown: CancellationToken,
    cleanup: Mutex<Option<TaskGroup>>,
}

impl CacheManager {
    /// Create a new cache manager; zero budgets or periods fall back to their defaults
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let (config, replaced) = config.or_defaults();
        if !replaced.is_empty() {
            warn!("Invalid cache settings replaced with defaults: {}", replaced.join(", "));
        }

        info!(
            "Cache initialized: {} entries / {} bytes, default TTL {:?}, {} eviction",
            config.max_entries, config.max_size, config.default_ttl, config.eviction_policy
        );

        Self {
            config,
            state: Arc::new(RwLock::new(CacheState::default())),
            shutdown: CancellationToken::new(),
            cleanup: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Build a deterministic key; see [`key::generate_key`]
    pub fn generate_key<P>(prefix: &str, params: &P) -> Result<String>
    where
        P: Serialize + ?Sized,
    {
        key::generate_key(prefix, params)
    }

    /// Get a value, or `None` on a miss, an expired entry, or a type mismatch
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = Instant::now();

        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                state.counters.misses += 1;
                debug!("Cache miss for key: {}", key);
                return None;
            }
        };

        if expired {
            state.remove(key);
            state.counters.expirations += 1;
            state.counters.misses += 1;
            debug!("Cache entry expired and removed: {}", key);
            return None;
        }

        let seq = state.next_seq();
        let entry = state.entries.get_mut(key)?;
        entry.touch(now, seq);

        match T::deserialize(&entry.value) {
            Ok(value) => {
                state.counters.hits += 1;
                debug!("Cache hit for key: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Type mismatch for cache key {}, removing entry: {}", key, e);
                state.remove(key);
                state.counters.misses += 1;
                None
            }
        }
    }

    /// Store a value; `ttl` of `None` uses the configured default
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        if key.trim().is_empty() {
            return Err(Error::InvalidInput {
                field: "key".to_string(),
                reason: "Cache key cannot be empty".to_string(),
            });
        }

        let value = serde_json::to_value(value)?;
        let size = (key.len() + serde_json::to_vec(&value)?.len()) as u64;

        if size > self.config.max_size {
            return Err(Error::Cache {
                operation: "set".to_string(),
                reason: format!(
                    "entry '{key}' is {size} bytes, larger than the {} byte cache",
                    self.config.max_size
                ),
            });
        }

        let ttl = ttl.unwrap_or(self.config.default_ttl);

        let mut state = self.state.write().await;
        state.remove(key);
        state.ensure_capacity(&self.config, size, 1);

        let seq = state.next_seq();
        state.insert(CacheEntry::new(key.to_string(), value, size, ttl, seq));

        debug!("Cached entry with key: {} ({} bytes, TTL: {:?})", key, size, ttl);
        Ok(())
    }

    /// Remove a key, returning whether it was present
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.state.write().await.remove(key).is_some();
        if removed {
            debug!("Removed cache entry: {}", key);
        }
        removed
    }

    /// Whether a live entry exists; expired entries that are not yet swept count as absent
    pub async fn has(&self, key: &str) -> bool {
        self.state
            .read()
            .await
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Drop every entry and reset the statistics
    pub async fn clear(&self) {
        *self.state.write().await = CacheState::default();
        info!("Cleared all cache entries");
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live keys in sorted order
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .state
            .read()
            .await
            .entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remove all expired entries, then evict until within budget
    pub async fn optimize(&self) -> OptimizeReport {
        optimize_shared(&self.state, &self.config).await
    }

    pub async fn get_stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let counters = &state.counters;

        let lookups = counters.hits + counters.misses;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            (
                counters.hits as f64 / lookups as f64 * 100.0,
                counters.misses as f64 / lookups as f64 * 100.0,
            )
        };

        let total_entries = state.entries.len();
        let (average_entry_size, average_access_count) = if total_entries == 0 {
            (0.0, 0.0)
        } else {
            let accesses: u64 = state.entries.values().map(|entry| entry.access_count).sum();
            (
                state.total_size as f64 / total_entries as f64,
                accesses as f64 / total_entries as f64,
            )
        };

        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            expirations: counters.expirations,
            hit_rate,
            miss_rate,
            total_entries,
            total_size_bytes: state.total_size,
            average_entry_size,
            average_access_count,
            max_size: self.config.max_size,
            max_entries: self.config.max_entries,
            memory_utilization: state.total_size as f64 / self.config.max_size as f64 * 100.0,
            eviction_policy: self.config.eviction_policy,
        }
    }

    /// Start the recurring optimize pass; returns `false` if it is already running
    pub async fn start_cleanup_task(&self) -> bool {
        let mut slot = self.cleanup.lock().await;
        if slot.is_some() {
            return false;
        }

        let mut group = TaskGroup::new(&self.shutdown);
        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let period = config.cleanup_interval;

        group.spawn(move |token| async move {
            run_periodic(token, period, false, || async {
                optimize_shared(&state, &config).await;
            })
            .await;
        });

        *slot = Some(group);
        info!("Cache cleanup task started (every {:?})", period);
        true
    }

    /// Stop the cleanup task and wait for it to exit
    pub async fn shutdown(&self) {
        let group = self.cleanup.lock().await.take();
        if let Some(group) = group {
            group.shutdown().await;
            info!("Cache cleanup task stopped");
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn optimize_shared(state: &RwLock<CacheState>, config: &CacheConfig) -> OptimizeReport {
    let report = state.write().await.optimize(config);

    if report.expired_removed > 0 || report.evicted > 0 {
        info!(
            "Cache optimized: {} expired entries removed, {} evicted",
            report.expired_removed, report.evicted
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(max_entries: usize, policy: EvictionPolicy) -> CacheConfig {
        CacheConfig {
            max_entries,
            eviction_policy: policy,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_basic_cache_operations() {
        let cache = CacheManager::new(CacheConfig::default());

        cache.set("key1", "value1", None).await.unwrap();
        let value: Option<String> = cache.get("key1").await;
        assert_eq!(value, Some("value1".to_string()));

        assert!(cache.has("key1").await);
        assert!(!cache.has("nonexistent").await);

        assert!(cache.delete("key1").await);
        assert!(!cache.delete("key1").await);
        let value: Option<String> = cache.get("key1").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_structured_values_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Forecast {
            city: String,
            temps: Vec<f32>,
        }

        let cache = CacheManager::new(CacheConfig::default());
        let forecast = Forecast {
            city: "Oslo".to_string(),
            temps: vec![1.5, 3.0],
        };
        cache.set("weather:oslo", &forecast, None).await.unwrap();

        assert_eq!(cache.get::<Forecast>("weather:oslo").await, Some(forecast));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.set("n", &json!({"not": "a number"}), None).await.unwrap();

        assert_eq!(cache.get::<u32>("n").await, None);
        assert!(!cache.has("n").await);
        assert_eq!(cache.get_stats().await.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let cache = CacheManager::new(CacheConfig::default());
        cache
            .set("short_lived", "value", Some(Duration::from_millis(100)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(cache.has("short_lived").await);
        assert_eq!(cache.get::<String>("short_lived").await.as_deref(), Some("value"));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!cache.has("short_lived").await);
        assert_eq!(cache.get::<String>("short_lived").await, None);

        let stats = cache.get_stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_miss_under_every_policy() {
        for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::TtlOldest] {
            let cache = CacheManager::new(config(10, policy));
            cache.set("k", &1, Some(Duration::from_secs(1))).await.unwrap();
            tokio::time::advance(Duration::from_secs(2)).await;

            assert_eq!(cache.get::<i32>("k").await, None, "policy {policy}");
            assert_eq!(cache.get_stats().await.misses, 1);
        }
    }

    #[tokio::test]
    async fn test_lru_eviction_example() {
        let cache = CacheManager::new(config(2, EvictionPolicy::Lru));

        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, None).await.unwrap();
        assert_eq!(cache.get::<i32>("a").await, Some(1));
        cache.set("c", &3, None).await.unwrap();

        assert_eq!(cache.keys().await, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(cache.get_stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_lfu_eviction() {
        let cache = CacheManager::new(config(2, EvictionPolicy::Lfu));

        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, None).await.unwrap();
        cache.get::<i32>("b").await;
        cache.get::<i32>("b").await;
        cache.get::<i32>("a").await;
        cache.set("c", &3, None).await.unwrap();

        assert_eq!(cache.keys().await, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_ttl_oldest_eviction() {
        let cache = CacheManager::new(config(2, EvictionPolicy::TtlOldest));

        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, None).await.unwrap();
        cache.get::<i32>("a").await;
        cache.set("c", &3, None).await.unwrap();

        assert_eq!(cache.keys().await, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = CacheManager::new(config(2, EvictionPolicy::Lru));

        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, None).await.unwrap();
        cache.set("a", &10, None).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get::<i32>("a").await, Some(10));
        assert_eq!(cache.get_stats().await.evictions, 0);
    }

    #[tokio::test]
    async fn test_byte_budget_evicts_until_fit() {
        // Each entry is key (1 byte) + "\"xxxxxxxx\"" (10 bytes)
        let cache = CacheManager::new(CacheConfig {
            max_size: 25,
            ..CacheConfig::default()
        });

        cache.set("a", "xxxxxxxx", None).await.unwrap();
        cache.set("b", "xxxxxxxx", None).await.unwrap();
        assert_eq!(cache.get_stats().await.total_size_bytes, 22);

        cache.set("c", "xxxxxxxx", None).await.unwrap();
        let stats = cache.get_stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_size_bytes, 22);
        assert!(!cache.has("a").await);
    }

    #[tokio::test]
    async fn test_oversized_entry_is_rejected() {
        let cache = CacheManager::new(CacheConfig {
            max_size: 8,
            ..CacheConfig::default()
        });
        cache.set("a", &1, None).await.unwrap();

        let result = cache.set("big", "this will never fit", None).await;
        assert!(matches!(result, Err(Error::Cache { .. })));
        assert!(cache.has("a").await);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let cache = CacheManager::new(CacheConfig::default());
        let result = cache.set("  ", &1, None).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.set("key1", "value1", None).await.unwrap();

        let _: Option<String> = cache.get("key1").await;
        let _: Option<String> = cache.get("key1").await;
        let _: Option<String> = cache.get("nonexistent").await;
        let _: Option<String> = cache.get("nonexistent").await;

        let stats = cache.get_stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
        assert!((stats.miss_rate - 50.0).abs() < f64::EPSILON);
        assert!((stats.average_access_count - 2.0).abs() < f64::EPSILON);
        assert_eq!(stats.total_size_bytes, "key1".len() as u64 + "\"value1\"".len() as u64);

        cache.clear().await;
        let stats = cache.get_stats().await;
        assert_eq!(stats, CacheStats {
            max_size: stats.max_size,
            max_entries: stats.max_entries,
            ..CacheStats::default()
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimize_removes_expired() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.set("expire1", "v", Some(Duration::from_millis(50))).await.unwrap();
        cache.set("expire2", "v", Some(Duration::from_millis(50))).await.unwrap();
        cache.set("keep", "v", None).await.unwrap();

        tokio::time::advance(Duration::from_millis(100)).await;

        let report = cache.optimize().await;
        assert_eq!(report, OptimizeReport { expired_removed: 2, evicted: 0 });
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get_stats().await.expirations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_sweeps_on_schedule() {
        let cache = CacheManager::new(CacheConfig {
            cleanup_interval: Duration::from_secs(60),
            ..CacheConfig::default()
        });
        cache.set("stale", "v", Some(Duration::from_secs(1))).await.unwrap();

        assert!(cache.start_cleanup_task().await);
        assert!(!cache.start_cleanup_task().await);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.get_stats().await.total_entries, 0);
        assert_eq!(cache.get_stats().await.expirations, 1);

        cache.shutdown().await;
        assert!(cache.start_cleanup_task().await);
        cache.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_settings_do_not_break_the_cache() {
        let cache = CacheManager::new(CacheConfig {
            max_entries: 0,
            cleanup_interval: Duration::ZERO,
            ..CacheConfig::default()
        });
        assert_eq!(cache.config().max_entries, 10_000);
        assert_eq!(cache.config().cleanup_interval, Duration::from_secs(300));

        cache.set("a", "v", Some(Duration::from_secs(1))).await.unwrap();
        let stats = cache.get_stats().await;
        assert!(stats.total_entries <= cache.config().max_entries);

        assert!(cache.start_cleanup_task().await);
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(cache.get_stats().await.expirations, 1);
        cache.shutdown().await;
    }
}
