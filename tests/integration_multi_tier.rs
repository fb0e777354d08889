//! Integration tests for the tiered cascade
//!
//! Tests cover:
//! - Conformance of cascades of every leaf backend
//! - Backfill of missed tiers with the remaining TTL
//! - Lazy tier construction, strict and lenient
//! - Construction-time validation
//! - Stampede protected read-through

mod common;

use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tiered_cache::{
    CacheBackend, CacheError, CacheResult, DirectoryCache, DirectoryCacheConfig, InMemoryCache,
    RemainingTtl, TierConfig, TierPolicy, TierSource, TieredCache, TieredCacheBuilder,
    TieredCacheConfig, Ttl, async_trait,
};

/// Accepts writes and never returns them
struct BlackHoleCache;

#[async_trait]
impl CacheBackend for BlackHoleCache {
    async fn get(&self, _key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &[u8], _value: &[u8], _ttl: Ttl) -> CacheResult<()> {
        Ok(())
    }

    async fn set_default_ttl(&self, _ttl: Ttl) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &[u8]) -> CacheResult<()> {
        Ok(())
    }

    async fn flush(&self) -> CacheResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "BlackHole"
    }
}

fn counting_memory_source(calls: &Arc<AtomicUsize>) -> TierSource {
    let calls = Arc::clone(calls);
    TierSource::factory(move || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(InMemoryCache::new())
        }
    })
}

fn failing_source(calls: &Arc<AtomicUsize>) -> TierSource {
    let calls = Arc::clone(calls);
    TierSource::factory(move || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<InMemoryCache, _>(anyhow::anyhow!("backend unavailable"))
        }
    })
}

#[tokio::test]
async fn test_cascade_of_memory_tiers_conforms() {
    let cache = TieredCache::builder()
        .with_tier(TierSource::instance(InMemoryCache::new()))
        .with_prefixed_tier(TierSource::instance(InMemoryCache::new()), "c2:")
        .build()
        .await
        .unwrap();
    run_all_tests(&cache, "TieredMemory").await;
}

#[tokio::test]
async fn test_cascade_of_mixed_tiers_conforms() {
    let dir = tempfile::tempdir().unwrap();
    let config = DirectoryCacheConfig::new(dir.path(), "tiered");
    let cache = TieredCache::builder()
        .with_tier(TierSource::instance(InMemoryCache::new()))
        .with_prefixed_tier(
            TierSource::factory(move || {
                let config = config.clone();
                async move { DirectoryCache::open(config).await.map_err(anyhow::Error::from) }
            }),
            "disk:",
        )
        .build()
        .await
        .unwrap();
    run_all_tests(&cache, "TieredMixed").await;
}

#[cfg(feature = "moka")]
#[tokio::test]
async fn test_cascade_with_moka_conforms() {
    let cache = TieredCache::builder()
        .with_tier(TierSource::instance(tiered_cache::MokaCache::default()))
        .with_tier(TierSource::instance(InMemoryCache::new()))
        .build()
        .await
        .unwrap();
    run_all_tests(&cache, "TieredMoka").await;
}

/// Deleting from the first tier and reading through the cascade restores it
#[tokio::test]
async fn test_backfill_restores_first_tier_with_remaining_ttl() {
    let first = Arc::new(InMemoryCache::new());
    let second = Arc::new(InMemoryCache::new());
    let cache = TieredCache::builder()
        .with_prefixed_tier(TierSource::from(Arc::clone(&first)), "a")
        .with_prefixed_tier(TierSource::from(Arc::clone(&second)), "b")
        .build()
        .await
        .unwrap();

    cache.set(b"k", b"value", Ttl::from_secs(100)).await.unwrap();
    assert_eq!(first.get(b"ak").await.unwrap(), Some(b"value".to_vec()));
    assert_eq!(second.get(b"bk").await.unwrap(), Some(b"value".to_vec()));

    first.delete(b"ak").await.unwrap();
    assert_eq!(first.get(b"ak").await.unwrap(), None);

    assert_eq!(cache.get(b"k").await.unwrap(), Some(b"value".to_vec()));
    assert_eq!(first.get(b"ak").await.unwrap(), Some(b"value".to_vec()));
    let remaining = first.remaining_ttl(b"ak").await.unwrap();
    assert!(remaining.as_secs() > 0 && remaining.as_secs() <= 100, "{remaining:?}");
}

#[tokio::test]
async fn test_all_miss_mutates_no_tier() {
    let first = Arc::new(InMemoryCache::new());
    let second = Arc::new(InMemoryCache::new());
    let cache = TieredCache::new(
        vec![TierSource::from(Arc::clone(&first)), TierSource::from(Arc::clone(&second))],
        TierPolicy::Strict,
    );

    assert_eq!(cache.get(b"missing").await.unwrap(), None);
    assert!(matches!(
        cache.fetch(b"missing").await,
        Err(CacheError::ItemNotInCache)
    ));
    assert!(first.is_empty());
    assert!(second.is_empty());
}

/// A backfilled item expires in the first tier along with the source item
#[tokio::test]
async fn test_backfill_keeps_expiry() {
    let first = Arc::new(InMemoryCache::new());
    let second = Arc::new(InMemoryCache::new());
    let cache = TieredCache::new(
        vec![TierSource::from(Arc::clone(&first)), TierSource::from(Arc::clone(&second))],
        TierPolicy::Strict,
    );

    second
        .set(b"k", b"v", Ttl::After(Duration::from_millis(300)))
        .await
        .unwrap();
    assert_eq!(cache.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    assert!(first.is_in_cache(b"k").await.unwrap());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(cache.get(b"k").await.unwrap(), None);
}

#[tokio::test]
async fn test_largest_ttl_fans_out_and_backfills() {
    let first = Arc::new(InMemoryCache::new());
    let second = Arc::new(InMemoryCache::new());
    let cache = TieredCache::new(
        vec![TierSource::from(Arc::clone(&first)), TierSource::from(Arc::clone(&second))],
        TierPolicy::Strict,
    );

    cache.set(b"k", b"v", Ttl::from_secs(u64::MAX)).await.unwrap();
    cache.set(b"j", b"w", Ttl::from(i64::MAX)).await.unwrap();
    first.delete(b"k").await.unwrap();

    assert_eq!(cache.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    assert_eq!(first.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    assert_eq!(cache.get(b"j").await.unwrap(), Some(b"w".to_vec()));
}

/// `contains` probes without backfilling, `is_in_cache` backfills
#[tokio::test]
async fn test_contains_does_not_backfill() {
    let first = Arc::new(InMemoryCache::new());
    let second = Arc::new(InMemoryCache::new());
    let cache = TieredCache::new(
        vec![TierSource::from(Arc::clone(&first)), TierSource::from(Arc::clone(&second))],
        TierPolicy::Strict,
    );
    second.set(b"k", b"v", Ttl::Never).await.unwrap();

    assert!(cache.contains(b"k").await.unwrap());
    assert!(!first.is_in_cache(b"k").await.unwrap());

    assert!(cache.is_in_cache(b"k").await.unwrap());
    assert!(first.is_in_cache(b"k").await.unwrap());
    assert!(!cache.contains(b"other").await.unwrap());
}

#[tokio::test]
async fn test_lazy_tier_is_constructed_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = TieredCache::builder()
        .with_tier(TierSource::instance(InMemoryCache::new()))
        .with_tier(counting_memory_source(&calls))
        .build()
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0, "tiers stay lazy until used");

    cache.set(b"a", b"1", Ttl::Never).await.unwrap();
    cache.get(b"a").await.unwrap();
    cache.get(b"b").await.unwrap();
    cache.delete(b"a").await.unwrap();
    cache.flush().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lazy_tier_concurrent_first_access() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(TieredCache::new(
        vec![counting_memory_source(&calls)],
        TierPolicy::Strict,
    ));

    let mut handles = Vec::new();
    for i in 0..10u8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.get(&[i]).await.is_ok() }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_strict_mode_propagates_construction_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let first = Arc::new(InMemoryCache::new());
    let cache = TieredCache::builder()
        .with_tier(TierSource::from(Arc::clone(&first)))
        .with_tier(failing_source(&calls))
        .strict(true)
        .build()
        .await
        .unwrap();

    let err = cache.set(b"k", b"v", Ttl::Never).await.unwrap_err();
    assert!(matches!(err, CacheError::TierConstruction { index: 1, .. }), "{err}");
    // No rollback of the tiers written before the failure
    assert!(first.is_in_cache(b"k").await.unwrap());

    // The binding stays unresolved, so the next operation fails again
    assert!(cache.get(b"other").await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// A first-tier hit never reaches the failing lazy tier
#[tokio::test]
async fn test_strict_failure_only_on_access() {
    let calls = Arc::new(AtomicUsize::new(0));
    let first = Arc::new(InMemoryCache::new());
    let cache = TieredCache::new(
        vec![TierSource::from(Arc::clone(&first)), failing_source(&calls)],
        TierPolicy::Strict,
    );
    first.set(b"k", b"v", Ttl::Never).await.unwrap();

    assert_eq!(cache.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lenient_mode_substitutes_in_memory_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = TieredCache::builder()
        .with_tier(failing_source(&calls))
        .strict(false)
        .build()
        .await
        .unwrap();

    cache.set(b"k", b"v", Ttl::Never).await.unwrap();
    assert_eq!(cache.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "constructor is not retried");

    let stats = cache.tier_stats();
    assert_eq!(stats[0].backend, Some("InMemory"));
}

#[tokio::test]
async fn test_non_conforming_backend_under_both_policies() {
    let strict = TieredCache::new(
        vec![TierSource::factory(|| async { Ok::<_, anyhow::Error>(BlackHoleCache) })],
        TierPolicy::Strict,
    );
    let err = strict.get(b"k").await.unwrap_err();
    assert!(
        matches!(&err, CacheError::TierConstruction { reason, .. } if reason.contains("health check")),
        "{err}"
    );

    let lenient = TieredCache::new(
        vec![TierSource::factory(|| async { Ok::<_, anyhow::Error>(BlackHoleCache) })],
        TierPolicy::Lenient,
    );
    lenient.set(b"k", b"v", Ttl::Never).await.unwrap();
    assert_eq!(lenient.get(b"k").await.unwrap(), Some(b"v".to_vec()));
}

/// Ready instances are used as given, without a health check
#[tokio::test]
async fn test_instances_are_not_health_checked() {
    let cache = TieredCache::new(
        vec![TierSource::instance(BlackHoleCache)],
        TierPolicy::Strict,
    );
    cache.set(b"k", b"v", Ttl::Never).await.unwrap();
    assert_eq!(cache.get(b"k").await.unwrap(), None);
}

#[tokio::test]
async fn test_invalid_tier_list_rejected_regardless_of_policy() {
    for strict in [true, false] {
        let err = TieredCacheBuilder::new()
            .strict(strict)
            .with_tier(TierSource::instance(InMemoryCache::new()))
            .with_named_tier("does-not-exist", "", serde_json::Value::Null)
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfiguration(_)), "{err}");
    }
}

#[tokio::test]
async fn test_empty_cascade_is_always_a_miss() {
    let cache = TieredCache::builder().build().await.unwrap();
    cache.set(b"k", b"v", Ttl::Never).await.unwrap();
    assert_eq!(cache.get(b"k").await.unwrap(), None);
    assert!(!cache.contains(b"k").await.unwrap());
}

#[tokio::test]
async fn test_default_ttl_is_fanned_out() {
    let first = Arc::new(InMemoryCache::new());
    let second = Arc::new(InMemoryCache::new());
    let cache = TieredCache::builder()
        .with_tier(TierSource::from(Arc::clone(&first)))
        .with_tier(TierSource::from(Arc::clone(&second)))
        .default_ttl(Ttl::from_secs(60))
        .build()
        .await
        .unwrap();

    cache.set_default(b"k", b"v").await.unwrap();
    for tier in [&first, &second] {
        assert!(matches!(
            tier.remaining_ttl(b"k").await.unwrap(),
            RemainingTtl::Expires(left) if left <= Duration::from_secs(60)
        ));
    }
}

#[tokio::test]
async fn test_cascade_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = TieredCacheConfig {
        strict: true,
        default_ttl_secs: Some(0),
        tiers: vec![
            TierConfig::new("memory"),
            TierConfig::new("directory")
                .with_prefix("v1:")
                .with_options(serde_json::json!({
                    "directory": dir.path(),
                    "cache_name": "configured",
                })),
        ],
    };
    let cache = TieredCacheBuilder::from_config(config).build().await.unwrap();

    cache.set_default(b"k", b"v").await.unwrap();
    assert_eq!(cache.get(b"k").await.unwrap(), Some(b"v".to_vec()));

    let disk = DirectoryCache::open(DirectoryCacheConfig::new(dir.path(), "configured"))
        .await
        .unwrap();
    assert_eq!(disk.get(b"v1:k").await.unwrap(), Some(b"v".to_vec()));
}

#[tokio::test]
async fn test_get_or_compute_coalesces_concurrent_misses() {
    let cache = Arc::new(TieredCache::new(
        vec![
            TierSource::instance(InMemoryCache::new()),
            TierSource::instance(InMemoryCache::new()),
        ],
        TierPolicy::Strict,
    ));
    let computations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = Arc::clone(&cache);
        let computations = Arc::clone(&computations);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute(b"expensive", Ttl::from_secs(60), || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, anyhow::Error>(b"computed".to_vec())
                })
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), b"computed".to_vec());
    }

    assert_eq!(computations.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().in_flight_requests, 0);
}

#[tokio::test]
async fn test_get_or_compute_failure_is_not_cached() {
    let cache = TieredCache::new(vec![TierSource::instance(InMemoryCache::new())], TierPolicy::Strict);

    let err = cache
        .get_or_compute(b"k", Ttl::Never, || async {
            Err::<Vec<u8>, _>(anyhow::anyhow!("upstream down"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Compute(_)));
    assert_eq!(cache.get(b"k").await.unwrap(), None);
}

#[tokio::test]
async fn test_typed_helpers() {
    let cache = TieredCache::new(vec![TierSource::instance(InMemoryCache::new())], TierPolicy::Strict);
    let user = test_data::User::new(7);

    cache.set_typed(b"user:7", &user, Ttl::Never).await.unwrap();
    let cached: Option<test_data::User> = cache.get_typed(b"user:7").await.unwrap();
    assert_eq!(cached, Some(user.clone()));

    cache.set(b"garbage", b"not json", Ttl::Never).await.unwrap();
    let err = cache.get_typed::<test_data::User>(b"garbage").await.unwrap_err();
    assert!(matches!(err, CacheError::Codec(_)));

    let computed: test_data::User = cache
        .get_or_compute_typed(b"user:8", Ttl::Never, || async {
            Ok::<_, anyhow::Error>(test_data::User::new(8))
        })
        .await
        .unwrap();
    assert_eq!(computed, test_data::User::new(8));
    assert_eq!(
        cache.get_typed::<test_data::User>(b"user:8").await.unwrap(),
        Some(test_data::User::new(8))
    );
}
