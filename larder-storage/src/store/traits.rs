//! Store backend trait and write options.
//!
//! This module defines the trait that must be implemented by distributed
//! store backends, plus the command counters backends may expose.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use larder_core::LarderResult;

/// Options for a single SET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Expiry of the entry; `None` keeps it until deleted.
    pub ttl: Option<Duration>,
    /// Only write when the key is absent (or expired).
    pub only_if_absent: bool,
}

impl WriteOptions {
    /// Overwrite unconditionally, expiring after `ttl`.
    pub fn expiring(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            only_if_absent: false,
        }
    }

    /// Overwrite unconditionally, never expiring.
    pub fn persistent() -> Self {
        Self::default()
    }

    /// Turn this write into a set-if-absent.
    pub fn if_absent(mut self) -> Self {
        self.only_if_absent = true;
        self
    }
}

/// Backend trait for the shared key-value store.
///
/// Implementations must be safe to share across tasks. Keys and values are
/// plain strings; encoding is the caller's business.
///
/// # Expiry
///
/// An entry past its expiry must be indistinguishable from an absent one for
/// every operation, including set-if-absent.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Read one key. `None` means absent or expired.
    async fn get(&self, key: &str) -> LarderResult<Option<String>>;

    /// Read many keys in one round trip. The result has one slot per key, in order.
    async fn mget(&self, keys: &[String]) -> LarderResult<Vec<Option<String>>>;

    /// Write a key. Returns `false` only when `only_if_absent` was requested and
    /// a live entry already existed.
    async fn set(&self, key: &str, value: &str, options: WriteOptions) -> LarderResult<bool>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> LarderResult<()>;
}

/// Per-command counters.
#[derive(Debug, Default)]
pub struct StoreStats {
    gets: AtomicU64,
    mgets: AtomicU64,
    sets: AtomicU64,
    dels: AtomicU64,
}

/// Point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    pub gets: u64,
    pub mgets: u64,
    pub sets: u64,
    pub dels: u64,
}

impl StoreStats {
    pub fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mget(&self) {
        self.mgets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_del(&self) {
        self.dels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            mgets: self.mgets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            dels: self.dels.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.gets.store(0, Ordering::Relaxed);
        self.mgets.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.dels.store(0, Ordering::Relaxed);
    }
}
