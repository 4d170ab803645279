//! Larder Coordination - Distributed Mutex and Semaphore
//!
//! Both primitives live entirely in the shared store: a mutex is a key whose
//! presence means "held", a semaphore is a JSON array of slots under one key.
//! Neither keeps any state in the process, so any number of handles (in any
//! number of processes) pointed at the same store see the same locks.
//!
//! Both are advisory. A mutex has no owner token and expires on its own; a
//! semaphore pool is read-modify-written without compare-and-swap, so two
//! processes racing for the last free slot can both believe they won.

pub mod mutex;
mod retry;
pub mod semaphore;

pub use mutex::{LockOptions, Mutex};
pub use retry::Polled;
pub use semaphore::{decode_pool, Semaphore, SemaphorePool, Slot, SlotStatus};
