//! Single-flight fetch with a double-checked distributed lock.
//!
//! Within a process, concurrent fetches of one key share a single load (see
//! [`crate::flight`]). Across processes, the load takes the per-key fetch lock
//! before running the producer and re-reads the store once it holds it, so a
//! value another process produced while we waited is used as-is.

use std::sync::Arc;

use larder_core::{CachedValue, LarderResult, Ttl};
use larder_coordination::LockOptions;
use larder_storage::DistributedStore;
use tracing::{debug, trace};

use crate::coordinator::{CacheCoordinator, CacheOptions, Inner};
use crate::producer::Producer;

impl<S: DistributedStore + ?Sized + 'static> CacheCoordinator<S> {
    /// Return the cached value for `key`, running `producer` on a miss.
    ///
    /// However many callers in however many processes ask at once, the
    /// producer runs once per miss. A producer failure reaches every caller
    /// that joined the load and caches nothing.
    pub async fn fetch<P: Producer>(
        &self,
        key: &str,
        producer: P,
        options: CacheOptions,
    ) -> LarderResult<CachedValue> {
        self.fetch_shared(key, Arc::new(producer), options).await
    }

    pub(crate) async fn fetch_shared(
        &self,
        key: &str,
        producer: Arc<dyn Producer>,
        options: CacheOptions,
    ) -> LarderResult<CachedValue> {
        if let Some(value) = self.inner.local.get(key) {
            trace!(key, "local hit");
            return Ok(value);
        }

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let (load, led) = self.inner.flights.join_or_start(key, async move {
            inner
                .load_through(&owned_key, producer.as_ref(), options.ttl)
                .await
        });
        if !led {
            trace!(key, "joined in-flight fetch");
        }
        load.await
    }
}

impl<S: DistributedStore + ?Sized + 'static> Inner<S> {
    /// Store read, then lock, re-read and produce if still missing.
    async fn load_through(
        &self,
        key: &str,
        producer: &dyn Producer,
        ttl: Option<Ttl>,
    ) -> LarderResult<CachedValue> {
        if let Some(value) = self.read_distributed(key).await? {
            debug!(key, kind = value.kind(), "distributed hit");
            self.remember(key, &value, ttl);
            return Ok(value);
        }

        let lock = LockOptions::new()
            .with_ttl(self.config.fetch_lock_ttl)
            .with_retry(self.config.fetch_lock_retry);
        self.mutex
            .with_lock(
                &self.config.lock_key(key),
                lock,
                self.fill_locked(key, producer, ttl),
            )
            .await
    }

    async fn fill_locked(
        &self,
        key: &str,
        producer: &dyn Producer,
        ttl: Option<Ttl>,
    ) -> LarderResult<CachedValue> {
        if let Some(value) = self.read_distributed(key).await? {
            debug!(key, kind = value.kind(), "filled by another process");
            self.remember(key, &value, ttl);
            return Ok(value);
        }
        self.produce_and_store(key, producer, ttl).await
    }

    /// Run the producer and write its value to both tiers.
    pub(crate) async fn produce_and_store(
        &self,
        key: &str,
        producer: &dyn Producer,
        ttl: Option<Ttl>,
    ) -> LarderResult<CachedValue> {
        let value = producer.produce().await.map_err(|e| {
            debug!(key, error = %e, "producer failed");
            e
        })?;
        self.write_through(key, &value, self.resolve_ttl(ttl)).await?;
        Ok(value)
    }
}
