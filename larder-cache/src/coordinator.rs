//! The two-tier cache coordinator.
//!
//! Reads go local tier first, then the shared store; writes go to both. The
//! local tier holds each entry for a short window (never longer than the
//! entry's distributed TTL), so processes converge on the store's value within
//! that window after a write elsewhere.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use larder_core::{
    codec, CacheError, CachedValue, LarderConfig, LarderResult, Ttl,
};
use larder_coordination::{Mutex, Semaphore};
use larder_storage::{DistributedStore, LocalCache, WriteOptions};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::flight::FlightRegistry;

/// Per-call options for writes and fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Distributed TTL; the configured default when `None`.
    pub ttl: Option<Ttl>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }
}

impl From<Ttl> for CacheOptions {
    fn from(ttl: Ttl) -> Self {
        Self { ttl: Some(ttl) }
    }
}

impl From<Duration> for CacheOptions {
    fn from(ttl: Duration) -> Self {
        Self::from(Ttl::Fixed(ttl))
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

pub(crate) struct Inner<S: DistributedStore + ?Sized + 'static> {
    pub(crate) store: Arc<S>,
    pub(crate) local: LocalCache,
    pub(crate) config: LarderConfig,
    pub(crate) mutex: Mutex<S>,
    pub(crate) semaphore: Semaphore<S>,
    pub(crate) flights: Arc<FlightRegistry>,
    pub(crate) refreshers: DashMap<String, JoinHandle<()>>,
}

impl<S: DistributedStore + ?Sized + 'static> Drop for Inner<S> {
    fn drop(&mut self) {
        for refresher in self.refreshers.iter() {
            refresher.value().abort();
        }
    }
}

impl<S: DistributedStore + ?Sized + 'static> Inner<S> {
    /// One concrete distributed TTL for a single write.
    pub(crate) fn resolve_ttl(&self, ttl: Option<Ttl>) -> Duration {
        let default = &self.config.default_ttl;
        ttl.unwrap_or(*default).resolve(default)
    }

    /// Local window for an entry living `distributed` in the store.
    pub(crate) fn local_window(&self, distributed: Duration) -> Duration {
        self.config
            .local_ttl
            .resolve(&self.config.default_ttl)
            .min(distributed)
    }

    /// Read and decode one key from the store.
    pub(crate) async fn read_distributed(&self, key: &str) -> LarderResult<Option<CachedValue>> {
        let wire = self.store.get(key).await?;
        codec::decode_entry(key, wire.as_deref())
    }

    /// Write `value` to both tiers with an already-resolved TTL.
    pub(crate) async fn write_through(
        &self,
        key: &str,
        value: &CachedValue,
        ttl: Duration,
    ) -> LarderResult<()> {
        self.store
            .set(key, &codec::encode(value), WriteOptions::expiring(ttl))
            .await?;
        self.local.put(key, value.clone(), self.local_window(ttl));
        debug!(key, kind = value.kind(), ttl_ms = ttl.as_millis() as u64, "cached");
        Ok(())
    }

    /// Remember a value read from the store in the local tier.
    pub(crate) fn remember(&self, key: &str, value: &CachedValue, ttl: Option<Ttl>) {
        let window = self.local_window(self.resolve_ttl(ttl));
        self.local.put(key, value.clone(), window);
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Two-tier cache over a [`DistributedStore`].
///
/// Cheap to clone; clones share the local tier, the single-flight registry and
/// any armed refreshers. Refreshers stop once the last clone is dropped.
///
/// # Example
///
/// ```ignore
/// use larder_cache::{producer, CacheCoordinator, CacheOptions};
/// use larder_storage::MemoryStore;
///
/// let cache = CacheCoordinator::with_defaults(Arc::new(MemoryStore::new()));
/// cache.set("greeting", "hello".into(), CacheOptions::default()).await?;
///
/// let profile = cache
///     .fetch("user:7", producer::from_fn(load_profile), CacheOptions::new().with_ttl(Ttl::range_ms(6000, 7000)))
///     .await?;
/// ```
pub struct CacheCoordinator<S: DistributedStore + ?Sized + 'static> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S: DistributedStore + ?Sized + 'static> Clone for CacheCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DistributedStore + ?Sized + 'static> CacheCoordinator<S> {
    /// Create a coordinator, rejecting an invalid configuration.
    pub fn new(store: Arc<S>, config: LarderConfig) -> LarderResult<Self> {
        config.validate()?;
        Ok(Self::build(store, config))
    }

    /// Create a coordinator with [`LarderConfig::default`].
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::build(store, LarderConfig::default())
    }

    fn build(store: Arc<S>, config: LarderConfig) -> Self {
        let mutex = Mutex::new(Arc::clone(&store), config.lock_ttl);
        let semaphore = Semaphore::new(Arc::clone(&store), config.lock_ttl);
        Self {
            inner: Arc::new(Inner {
                store,
                local: LocalCache::new(),
                config,
                mutex,
                semaphore,
                flights: Arc::new(FlightRegistry::default()),
                refreshers: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &LarderConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// The process-local tier.
    pub fn local(&self) -> &LocalCache {
        &self.inner.local
    }

    /// Mutex handle on the same store, defaulting to the configured lock TTL.
    pub fn mutex(&self) -> &Mutex<S> {
        &self.inner.mutex
    }

    /// Semaphore handle on the same store, defaulting to the configured lock TTL.
    pub fn semaphore(&self) -> &Semaphore<S> {
        &self.inner.semaphore
    }

    /// Keys with a fetch in flight in this process.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    /// Keys with an armed refresher on this coordinator.
    pub fn active_refreshers(&self) -> usize {
        self.inner.refreshers.len()
    }

    /// Read `key`, local tier first. `None` means nothing is cached.
    pub async fn get(&self, key: &str) -> LarderResult<Option<CachedValue>> {
        if let Some(value) = self.inner.local.get(key) {
            trace!(key, "local hit");
            return Ok(Some(value));
        }

        let value = self.inner.read_distributed(key).await?;
        match &value {
            Some(v) => {
                debug!(key, kind = v.kind(), "distributed hit");
                self.inner.remember(key, v, None);
            }
            None => debug!(key, "miss"),
        }
        Ok(value)
    }

    /// Read `key` and deserialize it into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> LarderResult<Option<T>> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        value.deserialize().map(Some).map_err(|e| {
            CacheError::TypeMismatch {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Write `value` to both tiers.
    ///
    /// A range TTL is resolved once here, so the local window is clamped to
    /// the same expiry the store got.
    pub async fn set(&self, key: &str, value: CachedValue, options: CacheOptions) -> LarderResult<()> {
        let ttl = self.inner.resolve_ttl(options.ttl);
        self.inner.write_through(key, &value, ttl).await
    }

    /// Serialize `value` and write it to both tiers.
    pub async fn set_serialize<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: CacheOptions,
    ) -> LarderResult<()> {
        let value = CachedValue::from_serialize(value).map_err(|e| CacheError::TypeMismatch {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.set(key, value, options).await
    }

    /// Remove `key` from both tiers.
    pub async fn del(&self, key: &str) -> LarderResult<()> {
        self.inner.local.invalidate(key);
        self.inner.store.del(key).await?;
        debug!(key, "deleted");
        Ok(())
    }

    /// Shallow-merge the top-level fields of `partial` into the object cached
    /// under `key`, then write the result back.
    ///
    /// Nested values in `partial` replace their counterparts wholesale.
    pub async fn patch(&self, key: &str, partial: Value, options: CacheOptions) -> LarderResult<()> {
        let existing = self.get(key).await?.ok_or_else(|| CacheError::NotFound {
            key: key.to_string(),
        })?;

        let not_an_object = || CacheError::NotAnObject {
            key: key.to_string(),
        };
        let CachedValue::Json(Value::Object(mut merged)) = existing else {
            return Err(not_an_object().into());
        };
        let Value::Object(fields) = partial else {
            return Err(not_an_object().into());
        };

        merged.extend(fields);
        self.set(key, CachedValue::Json(Value::Object(merged)), options)
            .await
    }
}
