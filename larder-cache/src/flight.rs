//! Per-key single-flight registry.
//!
//! While a key is being loaded, every caller in this process awaits the same
//! shared future instead of starting its own load. The load itself runs in a
//! spawned task, so it completes (and releases its distributed lock) even if
//! every caller gives up on it. The task removes its own entry when it ends,
//! whether it returns, fails or panics.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use larder_core::{CacheError, CachedValue, LarderResult};

pub(crate) type SharedLoad = Shared<BoxFuture<'static, LarderResult<CachedValue>>>;

#[derive(Default)]
pub(crate) struct FlightRegistry {
    next_id: AtomicU64,
    flights: DashMap<String, (u64, SharedLoad)>,
}

impl FlightRegistry {
    /// Join the load in flight for `key`, or start `load` as a new one.
    ///
    /// Returns the shared result and whether this caller started it.
    pub(crate) fn join_or_start<Fut>(
        self: &Arc<Self>,
        key: &str,
        load: Fut,
    ) -> (SharedLoad, bool)
    where
        Fut: Future<Output = LarderResult<CachedValue>> + Send + 'static,
    {
        match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => (entry.get().1.clone(), false),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let guard = FlightGuard {
                    registry: Arc::clone(self),
                    key: key.to_string(),
                    id,
                };

                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    load.await
                });

                let shared = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::warn!(error = %e, "single-flight load task did not finish");
                            Err(CacheError::TaskFailed {
                                reason: e.to_string(),
                            }
                            .into())
                        }
                    }
                }
                .boxed()
                .shared();

                entry.insert((id, shared.clone()));
                (shared, true)
            }
        }
    }

    /// Number of keys currently loading.
    pub(crate) fn len(&self) -> usize {
        self.flights.len()
    }

    fn finish(&self, key: &str, id: u64) {
        self.flights.remove_if(key, |_, (flight_id, _)| *flight_id == id);
    }
}

/// Removes a flight's entry when its task ends, panics included.
struct FlightGuard {
    registry: Arc<FlightRegistry>,
    key: String,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry.finish(&self.key, self.id);
    }
}
