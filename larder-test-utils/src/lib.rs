//! Larder Test Utilities
//!
//! Shared test infrastructure for the larder workspace:
//! - Proptest generators for cached values and TTLs
//! - A store that fails every command, for error propagation tests
//! - Fixtures: unique keys, fast configs, call counters
//! - Assertions on the larder error taxonomy
//! - Idempotent tracing setup

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use larder_core::{
    CacheError, CachedValue, CoordinationError, LarderConfig, LarderError, LarderResult,
    RetryPolicy, StorageError, Ttl,
};
pub use larder_storage::{DistributedStore, MemoryStore, WriteOptions};

use async_trait::async_trait;

// ============================================================================
// FAILING STORE
// ============================================================================

/// A store whose every command fails with a backend error.
#[derive(Debug, Clone)]
pub struct FailingStore {
    reason: String,
}

impl FailingStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self, operation: &str) -> LarderResult<T> {
        Err(StorageError::backend(operation, &self.reason).into())
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new("connection refused")
    }
}

#[async_trait]
impl DistributedStore for FailingStore {
    async fn get(&self, _key: &str) -> LarderResult<Option<String>> {
        self.fail("get")
    }

    async fn mget(&self, _keys: &[String]) -> LarderResult<Vec<Option<String>>> {
        self.fail("mget")
    }

    async fn set(&self, _key: &str, _value: &str, _options: WriteOptions) -> LarderResult<bool> {
        self.fail("set")
    }

    async fn del(&self, _key: &str) -> LarderResult<()> {
        self.fail("del")
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for larder value types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;
    use std::time::Duration;

    /// Arbitrary JSON, never a plain string spelling a sentinel's content.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,16}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 32, 5, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                prop::collection::hash_map("[a-zA-Z_]{1,8}", inner, 0..5)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Every class of [`CachedValue`], sentinels included.
    pub fn arb_cached_value() -> impl Strategy<Value = CachedValue> {
        prop_oneof![
            6 => arb_json().prop_map(CachedValue::json),
            1 => Just(CachedValue::Null),
            1 => Just(CachedValue::Undefined),
            1 => Just(CachedValue::NaN),
            1 => prop_oneof![
                Just(CachedValue::from("")),
                Just(CachedValue::from(0i64)),
                Just(CachedValue::from(false)),
            ],
        ]
    }

    /// A fixed TTL or a jittered range, in whole milliseconds.
    pub fn arb_ttl() -> impl Strategy<Value = Ttl> {
        prop_oneof![
            (1u64..10_000).prop_map(Ttl::millis),
            (1u64..10_000, 1u64..10_000).prop_map(|(a, b)| Ttl::range_ms(a, b)),
        ]
    }

    pub fn arb_duration_ms(max: u64) -> impl Strategy<Value = Duration> {
        (1..=max).prop_map(Duration::from_millis)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common test scenarios.

    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    /// A key no other test will use, so tests can share one store.
    pub fn unique_key(prefix: &str) -> String {
        format!("{}:{}", prefix, Uuid::now_v7().simple())
    }

    /// Config with short windows and a fetch lock that gives up quickly.
    pub fn fast_config() -> LarderConfig {
        LarderConfig::new()
            .with_default_ttl(Ttl::millis(1000))
            .with_local_ttl(Ttl::millis(200))
            .with_lock_ttl(Duration::from_millis(1000))
            .with_fetch_lock(
                Duration::from_millis(1000),
                RetryPolicy::new(Duration::from_millis(10), 20),
            )
    }

    /// Counts how often something ran; clones share the count.
    #[derive(Debug, Clone, Default)]
    pub struct CallCounter {
        calls: Arc<AtomicUsize>,
    }

    impl CallCounter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Record a call and return its 1-based number.
        pub fn hit(&self) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1
        }

        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on the larder error taxonomy.

    use super::*;

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &LarderResult<T>) {
        match result {
            Err(LarderError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_lock_held<T: std::fmt::Debug>(result: &LarderResult<T>, name: &str) {
        match result {
            Err(LarderError::Coordination(CoordinationError::LockHeld { name: held, .. })) => {
                assert_eq!(held, name, "Wrong lock name in LockHeld error");
            }
            other => panic!("Expected LockHeld for {}, got: {:?}", name, other),
        }
    }

    /// Assert a producer failure with exactly `message`.
    #[track_caller]
    pub fn assert_producer_error<T: std::fmt::Debug>(result: &LarderResult<T>, message: &str) {
        match result {
            Err(LarderError::Cache(CacheError::Producer(err))) => {
                assert_eq!(err.message, message, "Wrong producer error message");
            }
            other => panic!("Expected producer error {:?}, got: {:?}", message, other),
        }
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly fmt subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
