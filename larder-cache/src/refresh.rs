//! Self-refreshing entries.
//!
//! `fetch_and_refresh` arms one background task per (coordinator, key). Every
//! half of the shortest possible TTL it tries the key's fetch lock without waiting; whoever gets it
//! re-runs the producer and rewrites both tiers, everyone else skips the tick.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use larder_core::{CachedValue, LarderResult, Ttl};
use larder_storage::DistributedStore;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::coordinator::{CacheCoordinator, CacheOptions, Inner};
use crate::producer::Producer;

const MIN_PERIOD: Duration = Duration::from_millis(1);

impl<S: DistributedStore + ?Sized + 'static> CacheCoordinator<S> {
    /// [`fetch`](Self::fetch), then keep the entry warm in the background.
    ///
    /// The refresher is armed after the first successful fetch and runs until
    /// every clone of this coordinator is dropped. Later calls for the same
    /// key reuse it; their producer is only used to serve the fetch itself.
    pub async fn fetch_and_refresh<P: Producer>(
        &self,
        key: &str,
        producer: P,
        options: CacheOptions,
    ) -> LarderResult<CachedValue> {
        let producer: Arc<dyn Producer> = Arc::new(producer);
        let value = self
            .fetch_shared(key, Arc::clone(&producer), options)
            .await?;
        self.arm_refresher(key, producer, options.ttl);
        Ok(value)
    }

    fn arm_refresher(&self, key: &str, producer: Arc<dyn Producer>, ttl: Option<Ttl>) {
        let Entry::Vacant(slot) = self.inner.refreshers.entry(key.to_string()) else {
            return;
        };

        let default = &self.inner.config.default_ttl;
        let period = (ttl.unwrap_or(*default).shortest(default) / 2).max(MIN_PERIOD);

        let handle = tokio::spawn(refresh_loop(
            Arc::downgrade(&self.inner),
            key.to_string(),
            producer,
            ttl,
            period,
        ));
        slot.insert(handle);
        info!(key, period_ms = period.as_millis() as u64, "refresher armed");
    }
}

async fn refresh_loop<S: DistributedStore + ?Sized + 'static>(
    inner: Weak<Inner<S>>,
    key: String,
    producer: Arc<dyn Producer>,
    ttl: Option<Ttl>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = inner.refresh_once(&key, producer.as_ref(), ttl, period).await {
            warn!(key = %key, error = %e, "refresh failed, keeping previous value");
        }
    }
}

impl<S: DistributedStore + ?Sized + 'static> Inner<S> {
    /// One refresh tick. `Ok(false)` means another refresher holds the lock.
    async fn refresh_once(
        &self,
        key: &str,
        producer: &dyn Producer,
        ttl: Option<Ttl>,
        hold: Duration,
    ) -> LarderResult<bool> {
        let lock_key = self.config.lock_key(key);
        if !self.mutex.try_lock(&lock_key, hold).await? {
            debug!(key, "refresh skipped, lock held elsewhere");
            return Ok(false);
        }

        let refreshed = self.produce_and_store(key, producer, ttl).await;
        let released = self.mutex.unlock(&lock_key).await;
        refreshed?;
        released?;
        debug!(key, "refreshed");
        Ok(true)
    }
}
