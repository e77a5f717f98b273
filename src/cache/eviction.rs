//! Victim selection for the cache eviction policies.
//!
//! Every policy is a single linear pass over the live entries, which is fine
//! at the ten-thousand-entry scale the cache is sized for.

use super::entry::CacheEntry;
use crate::config::EvictionPolicy;

/// Pick the key of the entry that `policy` would evict next
pub(crate) fn select_victim<'a, I>(policy: EvictionPolicy, entries: I) -> Option<String>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    let entries = entries.into_iter();

    let victim = match policy {
        EvictionPolicy::Lru => entries.min_by_key(|entry| (entry.last_accessed, entry.accessed_seq)),
        EvictionPolicy::Lfu => entries.min_by_key(|entry| (entry.access_count, entry.accessed_seq)),
        EvictionPolicy::TtlOldest => entries.min_by_key(|entry| (entry.created_at, entry.inserted_seq)),
    };

    victim.map(|entry| entry.key.clone())
}
