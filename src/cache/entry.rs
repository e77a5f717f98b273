use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// A cache entry with expiration support
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    /// The cached value in serialized form
    pub value: Value,
    /// When this entry was created
    pub created_at: Instant,
    pub ttl: Duration,
    /// Number of times this entry has been read
    pub access_count: u64,
    /// Last access time (creation counts as an access)
    pub last_accessed: Instant,
    /// Serialized size of key and value, computed once at insertion
    pub size_bytes: u64,
    /// Ordering stamps for exact tie-breaking when timestamps collide
    pub(crate) inserted_seq: u64,
    pub(crate) accessed_seq: u64,
}

impl CacheEntry {
    pub(crate) fn new(key: String, value: Value, size_bytes: u64, ttl: Duration, seq: u64) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            created_at: now,
            ttl,
            access_count: 0,
            last_accessed: now,
            size_bytes,
            inserted_seq: seq,
            accessed_seq: seq,
        }
    }

    /// Expired once strictly more than `ttl` has elapsed since creation
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Record a read
    pub(crate) fn touch(&mut self, now: Instant, seq: u64) {
        self.access_count += 1;
        self.last_accessed = now;
        self.accessed_seq = seq;
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Get remaining TTL
    #[must_use]
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.age())
    }
}
