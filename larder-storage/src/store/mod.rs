//! Distributed store backends.
//!
//! The store itself is an external collaborator: anything offering string
//! GET/MGET/SET/DEL with per-key expiry can back larder. Two implementations
//! ship with the crate:
//!
//! - [`MemoryStore`]: in-process, with per-command counters. Suited to tests
//!   and single-process deployments.
//! - [`LmdbStore`]: a memory-mapped LMDB environment that several processes on
//!   one host can open at once.

pub mod lmdb;
pub mod memory;
pub mod traits;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;
pub use traits::{DistributedStore, StoreStats, StoreStatsSnapshot, WriteOptions};
