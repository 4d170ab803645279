//! In-process store with expiry and command counters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use larder_core::{LarderResult, StorageError};
use tokio::time::Instant;

use super::traits::{DistributedStore, StoreStats, StoreStatsSnapshot, WriteOptions};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A [`DistributedStore`] held in this process's memory.
///
/// Clones share the same map, so handing a clone to several coordinators
/// simulates several processes sharing one store. Expiry uses tokio's clock,
/// which makes it controllable from paused-time tests. Reads skip expired
/// entries and every write sweeps them out of the map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
    stats: Arc<StoreStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command counters since creation or the last [`MemoryStore::reset_stats`].
    pub fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_live(&self, key: &str, now: Instant) -> LarderResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }
}

#[async_trait]
impl DistributedStore for MemoryStore {
    async fn get(&self, key: &str) -> LarderResult<Option<String>> {
        self.stats.record_get();
        self.read_live(key, Instant::now())
    }

    async fn mget(&self, keys: &[String]) -> LarderResult<Vec<Option<String>>> {
        self.stats.record_mget();
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(keys
            .iter()
            .map(|key| {
                entries
                    .get(key)
                    .filter(|e| e.is_live(now))
                    .map(|e| e.value.clone())
            })
            .collect())
    }

    async fn set(&self, key: &str, value: &str, options: WriteOptions) -> LarderResult<bool> {
        self.stats.record_set();
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;

        entries.retain(|_, e| e.is_live(now));
        if options.only_if_absent && entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: options.ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> LarderResult<()> {
        self.stats.record_del();
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }
}
