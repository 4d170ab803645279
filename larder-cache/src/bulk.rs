//! Batched reads, writes and fetches.

use std::collections::{HashMap, HashSet};

use futures_util::future::try_join_all;
use larder_core::{codec, CachedValue, LarderResult};
use larder_storage::DistributedStore;
use tracing::debug;

use crate::coordinator::{CacheCoordinator, CacheOptions};
use crate::producer::BulkProducer;

impl<S: DistributedStore + ?Sized + 'static> CacheCoordinator<S> {
    /// Read many keys with at most one store round trip.
    ///
    /// The result has exactly one entry per distinct requested key; `None`
    /// marks a key neither tier holds.
    pub async fn bulk_get<I, K>(&self, keys: I) -> LarderResult<HashMap<String, Option<CachedValue>>>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Ok(self.lookup(keys).await?.into_iter().collect())
    }

    /// Write every entry to both tiers, resolving the TTL separately per key.
    pub async fn bulk_set<I, K>(&self, entries: I, options: CacheOptions) -> LarderResult<()>
    where
        I: IntoIterator<Item = (K, CachedValue)>,
        K: Into<String>,
    {
        let writes = entries.into_iter().map(|(key, value)| {
            let key: String = key.into();
            let ttl = self.inner.resolve_ttl(options.ttl);
            async move { self.inner.write_through(&key, &value, ttl).await }
        });
        try_join_all(writes).await?;
        Ok(())
    }

    /// Read many keys, producing every missing one with a single producer call.
    ///
    /// Keys the producer leaves out of its map are cached as
    /// [`CachedValue::Undefined`]. With nothing missing (or nothing asked
    /// for) the producer is not called.
    pub async fn bulk_fetch<I, K, P>(
        &self,
        keys: I,
        producer: P,
        options: CacheOptions,
    ) -> LarderResult<HashMap<String, CachedValue>>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        P: BulkProducer,
    {
        let mut result = HashMap::new();
        let mut missing = Vec::new();
        for (key, value) in self.lookup(keys).await? {
            match value {
                Some(value) => {
                    result.insert(key, value);
                }
                None => missing.push(key),
            }
        }
        if missing.is_empty() {
            return Ok(result);
        }

        debug!(missing = missing.len(), "bulk fetch producing");
        let mut produced = producer.produce(missing.clone()).await?;
        let filled: Vec<(String, CachedValue)> = missing
            .into_iter()
            .map(|key| {
                let value = produced.remove(&key).unwrap_or(CachedValue::Undefined);
                (key, value)
            })
            .collect();

        self.bulk_set(filled.iter().cloned(), options).await?;
        result.extend(filled);
        Ok(result)
    }

    /// Distinct keys in request order, each with its cached value if any.
    async fn lookup<I, K>(&self, keys: I) -> LarderResult<Vec<(String, Option<CachedValue>)>>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut remote = Vec::new();

        for key in keys {
            let key: String = key.into();
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.inner.local.get(&key) {
                Some(value) => found.push((key, Some(value))),
                None => remote.push(key),
            }
        }
        if remote.is_empty() {
            return Ok(found);
        }

        let wires = self.inner.store.mget(&remote).await?;
        debug!(local = found.len(), remote = remote.len(), "bulk read");
        for (key, wire) in remote.into_iter().zip(wires) {
            let value = codec::decode_entry(&key, wire.as_deref())?;
            if let Some(value) = &value {
                self.inner.remember(&key, value, None);
            }
            found.push((key, value));
        }
        Ok(found)
    }
}
