//! Larder Cache - Two-Tier Cache Coordinator
//!
//! [`CacheCoordinator`] puts a short-lived per-process [`LocalCache`] in front
//! of a [`DistributedStore`] shared by many processes, and builds on the two
//! to provide:
//!
//! - `get` / `set` / `del` / `patch` across both tiers
//! - `fetch`: compute-on-miss where the producer runs once per miss, no matter
//!   how many callers in how many processes ask at the same time
//! - `fetch_and_refresh`: `fetch` plus a background refresher per key
//! - `bulk_get` / `bulk_set` / `bulk_fetch`
//!
//! The distributed [`Mutex`] and [`Semaphore`] the coordinator uses internally
//! are available from it, or can be built directly on any store.
//!
//! ```ignore
//! use larder_cache::{producer, CacheCoordinator, CacheOptions, MemoryStore};
//!
//! let cache = CacheCoordinator::with_defaults(Arc::new(MemoryStore::new()));
//! let report = cache
//!     .fetch("report:daily", producer::from_fn(build_report), CacheOptions::default())
//!     .await?;
//! ```

mod bulk;
pub mod coordinator;
mod fetch;
mod flight;
pub mod producer;
mod refresh;

pub use coordinator::{CacheCoordinator, CacheOptions};
pub use producer::{BulkProducer, Completion, Producer};

pub use larder_coordination::{LockOptions, Mutex, Semaphore, SemaphorePool, Slot, SlotStatus};
pub use larder_core::{
    CacheError, CachedValue, ConfigError, CoordinationError, LarderConfig, LarderError,
    LarderResult, ProducerError, RetryPolicy, StorageError, Ttl,
};
pub use larder_storage::{
    CacheStats, DistributedStore, LmdbStore, LocalCache, MemoryStore, WriteOptions,
};
