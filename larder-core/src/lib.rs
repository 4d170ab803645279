//! Larder Core - Value Model and Shared Types
//!
//! Pure data types shared by every larder crate: the cached value model, the
//! wire codec that lets a plain string store carry it, TTL specifications, the
//! error taxonomy and runtime configuration. Nothing in here talks to a store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod codec;
pub mod config;
pub mod error;
pub mod ttl;
pub mod value;

pub use codec::{decode, decode_entry, encode, NAN_SENTINEL, NULL_SENTINEL, UNDEFINED_SENTINEL};
pub use config::LarderConfig;
pub use error::{
    CacheError, ConfigError, CoordinationError, LarderError, LarderResult, ProducerError,
    StorageError,
};
pub use ttl::Ttl;
pub use value::CachedValue;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Opaque key naming a logical cached value, mutex or semaphore.
pub type CacheKey = String;

/// Wall-clock milliseconds since the Unix epoch.
///
/// Used wherever an expiry has to be comparable across processes.
pub type EpochMillis = u64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> EpochMillis {
    Utc::now().timestamp_millis().max(0) as EpochMillis
}

/// Clamp a duration to whole milliseconds, never below 1ms.
///
/// Stores express expiry in milliseconds and treat 0 as "no expiry", so a
/// sub-millisecond TTL must round up rather than vanish.
pub fn duration_to_ms(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Bounded polling policy for lock and slot acquisition.
///
/// `times` is the total number of attempts, including the first one; the
/// caller sleeps `interval` between attempts. A policy of 0 attempts behaves
/// like a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub times: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, times: u32) -> Self {
        Self { interval, times }
    }

    /// Total number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.times.max(1)
    }
}
