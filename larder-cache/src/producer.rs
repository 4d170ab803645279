//! Producers compute a value on a cache miss.
//!
//! The coordinator only ever sees [`Producer`] (one key) or [`BulkProducer`]
//! (a batch of missing keys), both returning a boxed `'static` future. The
//! adapters below turn the three usual calling conventions into one of those:
//!
//! - [`from_fn`] / [`bulk_from_fn`]: an async closure
//! - [`from_sync`] / [`bulk_from_sync`]: a blocking-free closure returning a `Result`
//! - [`from_callback`] / [`bulk_from_callback`]: a closure handed a [`Completion`]
//!   that it resolves later, possibly from another task
//!
//! ```ignore
//! let producer = producer::from_fn(|| async { Ok::<_, ProducerError>(json!({"id": 7})) });
//! let value = cache.fetch("user:7", producer, CacheOptions::default()).await?;
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use larder_core::{CachedValue, ProducerError};
use tokio::sync::oneshot;

/// Result of a single-key producer.
pub type Produced = Result<CachedValue, ProducerError>;

/// Result of a bulk producer: one entry per key it could produce.
pub type BulkProduced = Result<HashMap<String, CachedValue>, ProducerError>;

/// Computes the value for one key.
pub trait Producer: Send + Sync + 'static {
    fn produce(&self) -> BoxFuture<'static, Produced>;
}

/// Computes values for a batch of missing keys.
///
/// Keys left out of the returned map are cached as explicit undefined.
pub trait BulkProducer: Send + Sync + 'static {
    fn produce(&self, missing: Vec<String>) -> BoxFuture<'static, BulkProduced>;
}

impl<P: Producer + ?Sized> Producer for Arc<P> {
    fn produce(&self) -> BoxFuture<'static, Produced> {
        (**self).produce()
    }
}

impl<P: BulkProducer + ?Sized> BulkProducer for Arc<P> {
    fn produce(&self, missing: Vec<String>) -> BoxFuture<'static, BulkProduced> {
        (**self).produce(missing)
    }
}

// ============================================================================
// ASYNC CLOSURES
// ============================================================================

/// Adapter returned by [`from_fn`].
pub struct FnProducer<F>(F);

/// Wrap an async closure.
pub fn from_fn<F, Fut, V, E>(f: F) -> FnProducer<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: Into<CachedValue>,
    E: Display,
{
    FnProducer(f)
}

impl<F, Fut, V, E> Producer for FnProducer<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: Into<CachedValue>,
    E: Display,
{
    fn produce(&self) -> BoxFuture<'static, Produced> {
        (self.0)()
            .map(|result| result.map(Into::into).map_err(ProducerError::new))
            .boxed()
    }
}

/// Adapter returned by [`bulk_from_fn`].
pub struct BulkFnProducer<F>(F);

/// Wrap an async closure taking the missing keys.
pub fn bulk_from_fn<F, Fut, E>(f: F) -> BulkFnProducer<F>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<String, CachedValue>, E>> + Send + 'static,
    E: Display,
{
    BulkFnProducer(f)
}

impl<F, Fut, E> BulkProducer for BulkFnProducer<F>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<String, CachedValue>, E>> + Send + 'static,
    E: Display,
{
    fn produce(&self, missing: Vec<String>) -> BoxFuture<'static, BulkProduced> {
        (self.0)(missing)
            .map(|result| result.map_err(ProducerError::new))
            .boxed()
    }
}

// ============================================================================
// SYNCHRONOUS CLOSURES
// ============================================================================

/// Adapter returned by [`from_sync`].
pub struct SyncProducer<F>(F);

/// Wrap a closure that returns its value directly.
///
/// The closure runs on the fetching task, so it must not block.
pub fn from_sync<F, V, E>(f: F) -> SyncProducer<F>
where
    F: Fn() -> Result<V, E> + Send + Sync + 'static,
    V: Into<CachedValue>,
    E: Display,
{
    SyncProducer(f)
}

impl<F, V, E> Producer for SyncProducer<F>
where
    F: Fn() -> Result<V, E> + Send + Sync + 'static,
    V: Into<CachedValue>,
    E: Display,
{
    fn produce(&self) -> BoxFuture<'static, Produced> {
        let result = (self.0)().map(Into::into).map_err(ProducerError::new);
        futures_util::future::ready(result).boxed()
    }
}

/// Adapter returned by [`bulk_from_sync`].
pub struct BulkSyncProducer<F>(F);

pub fn bulk_from_sync<F, E>(f: F) -> BulkSyncProducer<F>
where
    F: Fn(Vec<String>) -> Result<HashMap<String, CachedValue>, E> + Send + Sync + 'static,
    E: Display,
{
    BulkSyncProducer(f)
}

impl<F, E> BulkProducer for BulkSyncProducer<F>
where
    F: Fn(Vec<String>) -> Result<HashMap<String, CachedValue>, E> + Send + Sync + 'static,
    E: Display,
{
    fn produce(&self, missing: Vec<String>) -> BoxFuture<'static, BulkProduced> {
        let result = (self.0)(missing).map_err(ProducerError::new);
        futures_util::future::ready(result).boxed()
    }
}

// ============================================================================
// CALLBACKS
// ============================================================================

/// One-shot handle a callback-style producer resolves when it is done.
///
/// Dropping it unresolved fails the fetch.
pub struct Completion<T> {
    tx: oneshot::Sender<Result<T, ProducerError>>,
}

impl<T> Completion<T> {
    fn channel() -> (Self, oneshot::Receiver<Result<T, ProducerError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Resolve with `result`.
    pub fn complete<V, E>(self, result: Result<V, E>)
    where
        V: Into<T>,
        E: Display,
    {
        // The fetch may have been abandoned; nobody is left to tell.
        let _ = self
            .tx
            .send(result.map(Into::into).map_err(ProducerError::new));
    }

    pub fn ok(self, value: impl Into<T>) {
        let _ = self.tx.send(Ok(value.into()));
    }

    pub fn fail(self, err: impl Display) {
        let _ = self.tx.send(Err(ProducerError::new(err)));
    }
}

fn await_completion<T: Send + 'static>(
    rx: oneshot::Receiver<Result<T, ProducerError>>,
) -> BoxFuture<'static, Result<T, ProducerError>> {
    rx.map(|received| {
        received.unwrap_or_else(|_| {
            Err(ProducerError::from(
                "producer dropped its completion without a result",
            ))
        })
    })
    .boxed()
}

/// Adapter returned by [`from_callback`].
pub struct CallbackProducer<F>(F);

/// Wrap a closure that reports its value through a [`Completion`].
pub fn from_callback<F>(f: F) -> CallbackProducer<F>
where
    F: Fn(Completion<CachedValue>) + Send + Sync + 'static,
{
    CallbackProducer(f)
}

impl<F> Producer for CallbackProducer<F>
where
    F: Fn(Completion<CachedValue>) + Send + Sync + 'static,
{
    fn produce(&self) -> BoxFuture<'static, Produced> {
        let (completion, rx) = Completion::channel();
        (self.0)(completion);
        await_completion(rx)
    }
}

/// Adapter returned by [`bulk_from_callback`].
pub struct BulkCallbackProducer<F>(F);

pub fn bulk_from_callback<F>(f: F) -> BulkCallbackProducer<F>
where
    F: Fn(Vec<String>, Completion<HashMap<String, CachedValue>>) + Send + Sync + 'static,
{
    BulkCallbackProducer(f)
}

impl<F> BulkProducer for BulkCallbackProducer<F>
where
    F: Fn(Vec<String>, Completion<HashMap<String, CachedValue>>) + Send + Sync + 'static,
{
    fn produce(&self, missing: Vec<String>) -> BoxFuture<'static, BulkProduced> {
        let (completion, rx) = Completion::channel();
        (self.0)(missing, completion);
        await_completion(rx)
    }
}
