//! Per-process local tier.
//!
//! A concurrent map from key to value with a per-entry deadline. Lookups evict
//! lazily; nothing runs in the background. Deadlines use tokio's clock so
//! paused-time tests can step through expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use larder_core::CachedValue;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct LocalEntry {
    value: CachedValue,
    expires_at: Instant,
}

/// Statistics about local cache usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of lookups answered from the local tier.
    pub hits: u64,
    /// Number of lookups that fell through (absent or expired).
    pub misses: u64,
    /// Number of entries currently held, including not-yet-evicted expired ones.
    pub entry_count: u64,
    /// Number of entries dropped because their deadline passed.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// In-process cache of decoded values with a per-entry deadline.
///
/// Cloning is cheap and clones share entries.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: Arc<DashMap<String, LocalEntry>>,
    counters: Arc<Counters>,
}

impl Clone for LocalCache {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry. An expired entry is removed and reported absent.
    pub fn get(&self, key: &str) -> Option<CachedValue> {
        let now = Instant::now();

        let live = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match live {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                // The read guard is gone; re-check so a fresh put racing with
                // us is not evicted.
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.expires_at <= now)
                    .is_some()
                {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub fn put(&self, key: impl Into<String>, value: CachedValue, ttl: Duration) {
        self.entries.insert(
            key.into(),
            LocalEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop the entry for `key`, if any.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
