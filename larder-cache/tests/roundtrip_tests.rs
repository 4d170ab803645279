//! Round-trip and expiry behaviour of plain get/set/del.
//!
//! **Property: Lossless round trip**
//!
//! For any cached value, including explicit null, undefined, NaN and the
//! falsy JSON values, `set` followed by `get` returns the same value, both
//! from the local tier and after the local tier is bypassed.

use std::sync::Arc;
use std::time::Duration;

use larder_cache::{CacheCoordinator, CacheOptions, CachedValue, MemoryStore, Ttl};
use larder_test_utils::fixtures::unique_key;
use larder_test_utils::generators::arb_cached_value;
use proptest::prelude::*;
use serde_json::json;
use tokio::runtime::Runtime;

fn cache() -> CacheCoordinator<MemoryStore> {
    CacheCoordinator::with_defaults(Arc::new(MemoryStore::new()))
}

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_set_then_get_roundtrips(value in arb_cached_value()) {
        let rt = test_runtime()?;
        let (local, distributed) = rt.block_on(async {
            let cache = cache();
            let key = unique_key("roundtrip");
            cache.set(&key, value.clone(), CacheOptions::default()).await.unwrap();
            let local = cache.get(&key).await.unwrap();

            cache.local().clear();
            let distributed = cache.get(&key).await.unwrap();
            (local, distributed)
        });

        prop_assert_eq!(local, Some(value.clone()));
        prop_assert_eq!(distributed, Some(value));
    }
}

#[tokio::test(start_paused = true)]
async fn test_falsy_values_are_not_missing() {
    let cache = cache();

    cache.set("k", "".into(), CacheOptions::default()).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(CachedValue::from("")));

    cache.set("k", CachedValue::Undefined, CacheOptions::default()).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(CachedValue::Undefined));

    cache.del("k").await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_nan_and_null_survive_store_read() {
    let cache = cache();
    cache.set("nan", f64::NAN.into(), CacheOptions::default()).await.unwrap();
    cache.set("null", json!(null).into(), CacheOptions::default()).await.unwrap();
    cache.local().clear();

    assert!(cache.get("nan").await.unwrap().unwrap().is_nan());
    assert!(cache.get("null").await.unwrap().unwrap().is_null());
}

#[tokio::test(start_paused = true)]
async fn test_missing_key_stays_missing() {
    let cache = cache();
    for _ in 0..3 {
        assert_eq!(cache.get("never-set").await.unwrap(), None);
    }
}

#[tokio::test(start_paused = true)]
async fn test_value_expires_after_ttl() {
    let cache = cache();
    cache
        .set("k", json!({"a": 1}).into(), Duration::from_millis(300).into())
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(299)).await;
    assert!(cache.get("k").await.unwrap().is_some());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_jittered_ttl_lands_in_range() {
    let cache = cache();
    cache
        .set("k", "v".into(), Ttl::range_ms(500, 800).into())
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(499)).await;
    assert_eq!(cache.get("k").await.unwrap(), Some(CachedValue::from("v")));

    tokio::time::advance(Duration::from_millis(301)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_write_elsewhere_visible_after_local_window() {
    let store = Arc::new(MemoryStore::new());
    let config = larder_test_utils::fixtures::fast_config().with_default_ttl(Ttl::millis(5000));
    let ours = CacheCoordinator::new(Arc::clone(&store), config.clone()).unwrap();
    let theirs = CacheCoordinator::new(store, config).unwrap();

    ours.set("k", "old".into(), CacheOptions::default()).await.unwrap();
    theirs.set("k", "new".into(), CacheOptions::default()).await.unwrap();
    assert_eq!(ours.get("k").await.unwrap(), Some(CachedValue::from("old")));

    tokio::time::advance(Duration::from_millis(200)).await;
    assert_eq!(ours.get("k").await.unwrap(), Some(CachedValue::from("new")));
}
