//! Larder Storage - Store Abstraction and Local Tier
//!
//! Defines the [`DistributedStore`] contract every backend fulfils (GET, MGET,
//! SET with expiry and optional set-if-absent, DEL), two implementations of
//! it, and the per-process [`LocalCache`] that sits in front of whichever one
//! is in use.
//!
//! # Two tiers
//!
//! The local tier is synchronous and private to one process; it holds entries
//! for a short window. The distributed tier is shared by every process
//! pointing at the same store and holds entries for their full TTL. Nothing
//! in this crate coordinates the two; that is the coordinator's job.

pub mod local;
pub mod store;

pub use local::{CacheStats, LocalCache};
pub use store::{
    DistributedStore, LmdbStore, LmdbStoreError, MemoryStore, StoreStats, StoreStatsSnapshot,
    WriteOptions,
};
