//! Distributed counting semaphore for limiting concurrent access.
//!
//! A semaphore is a fixed pool of slots stored as one JSON array under the
//! semaphore's name:
//!
//! ```json
//! [{"status":"locked","expiresAt":1735689600000},{"status":"available","expiresAt":null}]
//! ```
//!
//! Slot lifecycle: `available -> locked -> available` through acquire and
//! release, or `-> consumed` for good. A locked slot whose `expiresAt` has
//! passed counts as available the next time anyone reads the pool; nothing
//! sweeps expired slots proactively.
//!
//! Every mutation reads the whole pool, changes it and writes it back, with no
//! compare-and-swap. Two processes racing on the same pool can overwrite each
//! other's claim; the last writer wins.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use larder_core::{
    codec, duration_to_ms, now_epoch_ms, CachedValue, CoordinationError, EpochMillis,
    LarderResult, StorageError,
};
use larder_storage::{DistributedStore, WriteOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mutex::LockOptions;
use crate::retry::{poll, Polled};

// ============================================================================
// POOL STATE
// ============================================================================

/// State of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Locked,
    /// Terminal: never handed out again.
    Consumed,
}

/// One reservable unit of a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub status: SlotStatus,
    pub expires_at: Option<EpochMillis>,
}

impl Slot {
    pub fn available() -> Self {
        Self {
            status: SlotStatus::Available,
            expires_at: None,
        }
    }

    /// Whether acquire may hand this slot out at `now`.
    pub fn is_free(&self, now: EpochMillis) -> bool {
        match self.status {
            SlotStatus::Available => true,
            SlotStatus::Locked => self.expires_at.is_some_and(|at| at <= now),
            SlotStatus::Consumed => false,
        }
    }
}

/// The ordered slots of one semaphore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SemaphorePool {
    slots: Vec<Slot>,
}

impl SemaphorePool {
    /// A pool of `size` available slots; never fewer than one.
    pub fn with_size(size: usize) -> Self {
        Self {
            slots: vec![Slot::available(); size.max(1)],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Index of the first slot acquire may hand out at `now`.
    pub fn first_free(&self, now: EpochMillis) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_free(now))
    }

    /// Slots acquire could hand out at `now`.
    pub fn free_count(&self, now: EpochMillis) -> usize {
        self.slots.iter().filter(|slot| slot.is_free(now)).count()
    }

    fn slot_mut(&mut self, name: &str, index: usize) -> Result<&mut Slot, CoordinationError> {
        self.slots
            .get_mut(index)
            .ok_or_else(|| CoordinationError::InvalidIndex {
                name: name.to_string(),
                index,
            })
    }
}

/// Decode a stored pool.
///
/// The pool goes through the value codec like any other stored value, so a
/// sentinel or non-array document under a semaphore name is corruption.
pub fn decode_pool(name: &str, wire: &str) -> LarderResult<SemaphorePool> {
    let corrupted = |reason: String| StorageError::Corrupted {
        key: name.to_string(),
        reason,
    };

    match codec::decode_entry(name, Some(wire))? {
        Some(CachedValue::Json(value)) => {
            serde_json::from_value(value).map_err(|e| corrupted(e.to_string()).into())
        }
        Some(other) => Err(corrupted(format!(
            "expected a slot array, found {}",
            other.kind()
        ))
        .into()),
        None => Err(corrupted("empty pool record".to_string()).into()),
    }
}

fn encode_pool(pool: &SemaphorePool) -> LarderResult<String> {
    let value = serde_json::to_value(pool).map_err(|e| StorageError::backend("encode", e))?;
    Ok(codec::encode(&CachedValue::json(value)))
}

// ============================================================================
// SEMAPHORE HANDLE
// ============================================================================

/// Handle for semaphore pools in a shared store.
pub struct Semaphore<S: DistributedStore + ?Sized> {
    store: Arc<S>,
    default_ttl: Duration,
}

impl<S: DistributedStore + ?Sized> Clone for Semaphore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            default_ttl: self.default_ttl,
        }
    }
}

impl<S: DistributedStore + ?Sized> Semaphore<S> {
    /// Create a handle whose slot holds default to `default_ttl`.
    pub fn new(store: Arc<S>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Read the pool `name`, if it exists.
    pub async fn retrieve(&self, name: &str) -> LarderResult<Option<SemaphorePool>> {
        match self.store.get(name).await? {
            Some(wire) => decode_pool(name, &wire).map(Some),
            None => Ok(None),
        }
    }

    /// Return the pool `name`, creating it with `size` slots (default 1) if it
    /// does not exist. An existing pool is returned unchanged, whatever its size.
    pub async fn retrieve_or_create(
        &self,
        name: &str,
        size: Option<usize>,
    ) -> LarderResult<SemaphorePool> {
        let size = size.unwrap_or(1);
        self.retrieve_or_create_with(name, || async move { LarderResult::Ok(size) })
            .await
    }

    /// Like [`Semaphore::retrieve_or_create`], asking `size` for the pool size
    /// only when the pool has to be created.
    pub async fn retrieve_or_create_with<F, Fut>(
        &self,
        name: &str,
        size: F,
    ) -> LarderResult<SemaphorePool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LarderResult<usize>>,
    {
        if let Some(pool) = self.retrieve(name).await? {
            return Ok(pool);
        }

        let pool = SemaphorePool::with_size(size().await?);
        let created = self
            .store
            .set(name, &encode_pool(&pool)?, WriteOptions::persistent().if_absent())
            .await?;
        debug!(name, size = pool.len(), created, "semaphore create attempt");

        // Whoever won the race, the stored pool is the answer.
        self.require(name).await
    }

    /// Claim the first free slot and return its index.
    ///
    /// Fails with [`CoordinationError::NotExist`] when the pool is missing and
    /// with [`CoordinationError::NoSlotAvailable`] once the retry policy (or
    /// the single attempt made without one) is exhausted.
    pub async fn acquire_lock(&self, name: &str, options: LockOptions) -> LarderResult<usize> {
        let ttl = duration_to_ms(options.ttl.unwrap_or(self.default_ttl));

        let outcome = poll(options.retry, || async move {
            let mut pool = self.require(name).await?;
            let now = now_epoch_ms();
            let Some(index) = pool.first_free(now) else {
                return LarderResult::Ok(None);
            };

            pool.slots[index] = Slot {
                status: SlotStatus::Locked,
                expires_at: Some(now.saturating_add(ttl)),
            };
            self.write(name, &pool).await?;
            Ok(Some(index))
        })
        .await?;

        match outcome {
            Polled::Acquired(index) => {
                debug!(name, index, ttl_ms = ttl, "semaphore slot acquired");
                Ok(index)
            }
            Polled::Exhausted { attempts } => {
                debug!(name, attempts, "semaphore full, giving up");
                Err(CoordinationError::NoSlotAvailable {
                    name: name.to_string(),
                    attempts,
                }
                .into())
            }
        }
    }

    /// Retire slot `index` permanently.
    ///
    /// A pool always keeps one slot that is not consumed: retiring the last
    /// one releases it instead.
    pub async fn consume_lock(&self, name: &str, index: usize) -> LarderResult<()> {
        let mut pool = self.require(name).await?;

        let others_live = pool
            .slots
            .iter()
            .enumerate()
            .any(|(i, slot)| i != index && slot.status != SlotStatus::Consumed);

        let slot = pool.slot_mut(name, index)?;
        if others_live {
            *slot = Slot {
                status: SlotStatus::Consumed,
                expires_at: None,
            };
            debug!(name, index, "semaphore slot consumed");
        } else {
            *slot = Slot::available();
            debug!(name, index, "last live slot kept, released instead of consumed");
        }

        self.write(name, &pool).await
    }

    /// Return slot `index` to the pool.
    pub async fn release_lock(&self, name: &str, index: usize) -> LarderResult<()> {
        let mut pool = self.require(name).await?;
        *pool.slot_mut(name, index)? = Slot::available();
        self.write(name, &pool).await?;
        debug!(name, index, "semaphore slot released");
        Ok(())
    }

    /// Grow the pool to `size` slots. Pools never shrink.
    pub async fn expand(&self, name: &str, size: usize) -> LarderResult<()> {
        let mut pool = self.require(name).await?;
        let current = pool.len();

        if size < current {
            return Err(CoordinationError::ShrinkRejected {
                current,
                requested: size,
            }
            .into());
        }
        if size == current {
            return Ok(());
        }

        pool.slots.resize(size, Slot::available());
        self.write(name, &pool).await?;
        debug!(name, from = current, to = size, "semaphore expanded");
        Ok(())
    }

    /// Mark every slot available again, consumed ones included.
    pub async fn reset(&self, name: &str) -> LarderResult<()> {
        let pool = self.require(name).await?;
        let fresh = SemaphorePool::with_size(pool.len());
        self.write(name, &fresh).await?;
        debug!(name, size = fresh.len(), "semaphore reset");
        Ok(())
    }

    async fn require(&self, name: &str) -> LarderResult<SemaphorePool> {
        self.retrieve(name).await?.ok_or_else(|| {
            CoordinationError::NotExist {
                name: name.to_string(),
            }
            .into()
        })
    }

    async fn write(&self, name: &str, pool: &SemaphorePool) -> LarderResult<()> {
        self.store
            .set(name, &encode_pool(pool)?, WriteOptions::persistent())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{LarderError, RetryPolicy};
    use larder_storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn semaphore() -> Semaphore<MemoryStore> {
        Semaphore::new(Arc::new(MemoryStore::new()), Duration::from_millis(1000))
    }

    fn coordination(err: LarderError) -> CoordinationError {
        match err {
            LarderError::Coordination(e) => e,
            other => panic!("expected a coordination error, got {other:?}"),
        }
    }

    #[test]
    fn test_pool_json_shape() {
        let mut pool = SemaphorePool::with_size(2);
        pool.slots[0] = Slot {
            status: SlotStatus::Locked,
            expires_at: Some(1_700_000_000_000),
        };
        let wire = encode_pool(&pool).unwrap();
        assert_eq!(
            wire,
            r#"[{"status":"locked","expiresAt":1700000000000},{"status":"available","expiresAt":null}]"#
        );
        assert_eq!(decode_pool("s", &wire).unwrap(), pool);
    }

    #[test]
    fn test_decode_pool_rejects_sentinels_and_objects() {
        assert!(decode_pool("s", "\"__null\"").is_err());
        assert!(decode_pool("s", "{\"status\":\"available\"}").is_err());
        assert!(decode_pool("s", "not json").is_err());
    }

    #[test]
    fn test_expired_locked_slot_is_free() {
        let slot = Slot {
            status: SlotStatus::Locked,
            expires_at: Some(100),
        };
        assert!(!slot.is_free(99));
        assert!(slot.is_free(100));

        let consumed = Slot {
            status: SlotStatus::Consumed,
            expires_at: None,
        };
        assert!(!consumed.is_free(u64::MAX));
    }

    #[tokio::test]
    async fn test_retrieve_or_create_defaults_to_one_slot() {
        let sem = semaphore();
        let pool = sem.retrieve_or_create("s", None).await.unwrap();
        assert_eq!(pool.len(), 1);

        let pool = sem.retrieve_or_create("zero", Some(0)).await.unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_or_create_keeps_existing_pool() {
        let sem = semaphore();
        sem.retrieve_or_create("s", Some(3)).await.unwrap();
        let pool = sem.retrieve_or_create("s", Some(10)).await.unwrap();
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_creators_agree_on_winner() {
        let store = Arc::new(MemoryStore::new());
        let a = Semaphore::new(Arc::clone(&store), Duration::from_millis(1000));
        let b = Semaphore::new(store, Duration::from_millis(1000));

        let (first, second) = tokio::join!(
            a.retrieve_or_create("s", Some(2)),
            b.retrieve_or_create("s", Some(7)),
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.len(), second.len());
        assert_eq!(first.slots, second.slots);
        assert_eq!(a.retrieve("s").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_retrieve_missing_pool_is_none() {
        assert_eq!(semaphore().retrieve("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_size_provider_only_runs_on_create() {
        let sem = semaphore();
        let pool = sem
            .retrieve_or_create_with("s", || async { LarderResult::Ok(4) })
            .await
            .unwrap();
        assert_eq!(pool.len(), 4);

        let calls = AtomicUsize::new(0);
        let pool = sem
            .retrieve_or_create_with("s", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                LarderResult::Ok(9)
            })
            .await
            .unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_capacity_and_release() {
        let sem = semaphore();
        sem.retrieve_or_create("s", Some(3)).await.unwrap();

        for expected in 0..3 {
            let index = sem.acquire_lock("s", LockOptions::new()).await.unwrap();
            assert_eq!(index, expected);
        }

        let err = sem.acquire_lock("s", LockOptions::new()).await.unwrap_err();
        assert!(matches!(
            coordination(err),
            CoordinationError::NoSlotAvailable { attempts: 1, .. }
        ));

        sem.release_lock("s", 1).await.unwrap();
        assert_eq!(sem.acquire_lock("s", LockOptions::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_slot_lapses_after_ttl() {
        let sem = semaphore();
        sem.retrieve_or_create("s", None).await.unwrap();

        let short = LockOptions::new().with_ttl(Duration::from_millis(30));
        assert_eq!(sem.acquire_lock("s", short).await.unwrap(), 0);
        assert!(sem.acquire_lock("s", short).await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sem.acquire_lock("s", short).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_acquire_with_retry_waits_for_lapse() {
        let sem = semaphore();
        sem.retrieve_or_create("s", None).await.unwrap();
        sem.acquire_lock("s", LockOptions::new().with_ttl(Duration::from_millis(40)))
            .await
            .unwrap();

        let options = LockOptions::new()
            .with_ttl(Duration::from_millis(40))
            .with_retry(RetryPolicy::new(Duration::from_millis(20), 10));
        assert_eq!(sem.acquire_lock("s", options).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_operations_on_missing_pool() {
        let sem = semaphore();
        let expected = CoordinationError::NotExist {
            name: "ghost".to_string(),
        };

        let err = sem.acquire_lock("ghost", LockOptions::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Semaphore ghost doesn't exist.");
        assert_eq!(coordination(err), expected);

        for err in [
            sem.consume_lock("ghost", 0).await.unwrap_err(),
            sem.release_lock("ghost", 0).await.unwrap_err(),
            sem.expand("ghost", 10).await.unwrap_err(),
            sem.reset("ghost").await.unwrap_err(),
        ] {
            assert_eq!(coordination(err), expected);
        }
        assert!(sem.retrieve("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_index() {
        let sem = semaphore();
        sem.retrieve_or_create("s", Some(2)).await.unwrap();

        let err = sem.consume_lock("s", 10).await.unwrap_err();
        assert_eq!(err.to_string(), "Index 10 for semaphore s is invalid.");

        let err = sem.release_lock("s", 2).await.unwrap_err();
        assert_eq!(err.to_string(), "Index 2 for semaphore s is invalid.");
    }

    #[tokio::test]
    async fn test_consume_reduces_capacity() {
        let sem = semaphore();
        sem.retrieve_or_create("s", Some(2)).await.unwrap();
        sem.acquire_lock("s", LockOptions::new()).await.unwrap();
        sem.acquire_lock("s", LockOptions::new()).await.unwrap();

        sem.consume_lock("s", 0).await.unwrap();
        assert!(sem.acquire_lock("s", LockOptions::new()).await.is_err());

        let pool = sem.retrieve("s").await.unwrap().unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.slots()[0].status, SlotStatus::Consumed);
    }

    #[tokio::test]
    async fn test_last_live_slot_is_never_consumed() {
        let sem = semaphore();
        sem.retrieve_or_create("s", Some(2)).await.unwrap();
        sem.acquire_lock("s", LockOptions::new()).await.unwrap();
        sem.acquire_lock("s", LockOptions::new()).await.unwrap();

        sem.consume_lock("s", 0).await.unwrap();
        sem.consume_lock("s", 1).await.unwrap();

        assert_eq!(sem.acquire_lock("s", LockOptions::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expand() {
        let sem = semaphore();
        sem.retrieve_or_create("s", Some(2)).await.unwrap();

        let err = sem.expand("s", 1).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot shrink pool, size is 2 and you requested a size of 1."
        );

        sem.expand("s", 2).await.unwrap();
        assert_eq!(sem.retrieve_or_create("s", Some(2)).await.unwrap().len(), 2);

        sem.expand("s", 3).await.unwrap();
        let pool = sem.retrieve_or_create("s", Some(2)).await.unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.slots()[2], Slot::available());
    }

    #[tokio::test]
    async fn test_reset_frees_everything() {
        let sem = semaphore();
        sem.retrieve_or_create("s", Some(3)).await.unwrap();
        for _ in 0..3 {
            sem.acquire_lock("s", LockOptions::new()).await.unwrap();
        }
        sem.consume_lock("s", 2).await.unwrap();

        sem.reset("s").await.unwrap();
        let pool = sem.retrieve("s").await.unwrap().unwrap();
        assert_eq!(pool.free_count(now_epoch_ms()), 3);
    }
}
