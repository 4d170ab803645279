//! Advisory distributed mutex.
//!
//! A lock is a store key written with set-if-absent and an expiry. Holding it
//! means nothing more than "the key exists": there is no owner token, so any
//! caller may unlock, and a crashed holder is recovered only by expiry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use larder_core::{CoordinationError, LarderResult, RetryPolicy};
use larder_storage::{DistributedStore, WriteOptions};
use tracing::debug;

use crate::retry::{poll, Polled};

/// Value written under a held lock key.
const HELD: &str = "1";

/// Options for acquiring a mutex or a semaphore slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockOptions {
    /// Hold time; the handle's default when `None`.
    pub ttl: Option<Duration>,
    /// Poll policy when the lock is taken; fail immediately when `None`.
    pub retry: Option<RetryPolicy>,
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Handle for taking and releasing named locks in a shared store.
pub struct Mutex<S: DistributedStore + ?Sized> {
    store: Arc<S>,
    default_ttl: Duration,
}

impl<S: DistributedStore + ?Sized> Clone for Mutex<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            default_ttl: self.default_ttl,
        }
    }
}

impl<S: DistributedStore + ?Sized> Mutex<S> {
    /// Create a handle whose locks default to `default_ttl`.
    pub fn new(store: Arc<S>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Take the lock `name`.
    ///
    /// Fails with [`CoordinationError::LockHeld`] once the retry policy (or the
    /// single attempt made without one) is exhausted.
    pub async fn lock(&self, name: &str, options: LockOptions) -> LarderResult<()> {
        let ttl = options.ttl.unwrap_or(self.default_ttl);

        let outcome = poll(options.retry, || async move {
            let acquired = self.try_lock(name, ttl).await?;
            LarderResult::Ok(acquired.then_some(()))
        })
        .await?;

        match outcome {
            Polled::Acquired(()) => Ok(()),
            Polled::Exhausted { attempts } => {
                debug!(name, attempts, "mutex still held, giving up");
                Err(CoordinationError::LockHeld {
                    name: name.to_string(),
                    attempts,
                }
                .into())
            }
        }
    }

    /// One set-if-absent attempt. `Ok(false)` means someone else holds it.
    pub async fn try_lock(&self, name: &str, ttl: Duration) -> LarderResult<bool> {
        let acquired = self
            .store
            .set(name, HELD, WriteOptions::expiring(ttl).if_absent())
            .await?;
        debug!(name, acquired, ttl_ms = ttl.as_millis() as u64, "mutex attempt");
        Ok(acquired)
    }

    /// Release `name` unconditionally, whoever holds it.
    pub async fn unlock(&self, name: &str) -> LarderResult<()> {
        self.store.del(name).await?;
        debug!(name, "mutex released");
        Ok(())
    }

    /// Run `work` while holding `name`, releasing it afterwards whatever the
    /// outcome.
    ///
    /// An unlock failure is returned only when `work` itself succeeded.
    pub async fn with_lock<T, F>(
        &self,
        name: &str,
        options: LockOptions,
        work: F,
    ) -> LarderResult<T>
    where
        F: Future<Output = LarderResult<T>>,
    {
        self.lock(name, options).await?;
        let outcome = work.await;
        let released = self.unlock(name).await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unlock_err)) => {
                tracing::warn!(name, error = %unlock_err, "unlock after failed work also failed");
                Err(e)
            }
        }
    }
}
