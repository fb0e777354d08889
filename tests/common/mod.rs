//! Common utilities for integration tests
//!
//! This module provides the shared conformance suite every backend (leaf or
//! cascade) must pass, plus test data generators.
#![allow(dead_code)]

use rand::Rng;
use std::time::Duration;
use tiered_cache::{CacheBackend, CacheError, RemainingTtl, Ttl};

const NUM_KEYS: usize = 50;
const NUM_READS: usize = 5;

/// A key/value pair used by the suite
pub struct TestCase {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Generate a unique key prefix to avoid conflicts between tests
pub fn test_key_prefix(name: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    format!("conformance:{name}:{timestamp}:{}:", rand::random::<u16>())
}

pub fn build_test_set(prefix: &str, label: &str, value_label: &str) -> Vec<TestCase> {
    let mut rng = rand::thread_rng();
    (0..NUM_KEYS)
        .map(|i| TestCase {
            key: format!("{prefix}{label}_{i}_{}", rng.gen_range(1..10_000)).into_bytes(),
            value: format!("{value_label}_{}", rng.gen_range(1..1_000_000)).into_bytes(),
        })
        .collect()
}

/// Keys of 10 to 1024 random bytes with 512 to 2048 random value bytes
pub fn build_binary_test_set() -> Vec<TestCase> {
    let mut rng = rand::thread_rng();
    (0..NUM_KEYS)
        .map(|_| {
            let mut key = vec![0u8; rng.gen_range(10..=1024)];
            let mut value = vec![0u8; rng.gen_range(512..=2048)];
            rng.fill(&mut key[..]);
            rng.fill(&mut value[..]);
            TestCase { key, value }
        })
        .collect()
}

fn sample(set: &[TestCase]) -> Vec<&TestCase> {
    let mut rng = rand::thread_rng();
    (0..NUM_READS)
        .map(|_| &set[rng.gen_range(0..set.len())])
        .collect()
}

pub async fn random_read(cache: &dyn CacheBackend, set: &[TestCase], expect_present: bool) {
    for case in sample(set) {
        let cached = cache.get(&case.key).await.unwrap();
        if expect_present {
            assert_eq!(cached.as_deref(), Some(case.value.as_slice()), "{}", cache.name());
        } else {
            assert_eq!(cached, None, "{}", cache.name());
            assert!(matches!(
                cache.fetch(&case.key).await,
                Err(CacheError::ItemNotInCache)
            ));
        }
    }
}

pub async fn random_in_cache(cache: &dyn CacheBackend, set: &[TestCase], expected: bool) {
    for case in sample(set) {
        assert_eq!(
            cache.is_in_cache(&case.key).await.unwrap(),
            expected,
            "{}",
            cache.name()
        );
    }
}

/// Run the full conformance suite against `cache`
pub async fn run_all_tests(cache: &dyn CacheBackend, name: &str) {
    let prefix = test_key_prefix(name);
    basic_test(cache, &prefix).await;
    delete_test(cache, &prefix).await;
    extreme_keys_test(cache).await;
    expiration_test(cache, &prefix).await;
}

pub async fn basic_test(cache: &dyn CacheBackend, prefix: &str) {
    cache.set_default_ttl(Ttl::Never).await.unwrap();

    let missing = format!("{prefix}someKey").into_bytes();
    assert!(matches!(
        cache.fetch(&missing).await,
        Err(CacheError::ItemNotInCache)
    ));
    // Deleting an absent key is not an error
    cache.delete(&missing).await.unwrap();

    let set1 = build_test_set(prefix, "set1", "value");
    let set2 = build_test_set(prefix, "set2", "newValue");

    for case in &set1 {
        cache.set_default(&case.key, &case.value).await.unwrap();
    }
    random_read(cache, &set1, true).await;
    random_read(cache, &set2, false).await;
    random_in_cache(cache, &set1, true).await;
    random_in_cache(cache, &set2, false).await;

    for case in &set2 {
        cache.set_default(&case.key, &case.value).await.unwrap();
    }
    let complete: Vec<TestCase> = set1.into_iter().chain(set2).collect();
    random_read(cache, &complete, true).await;
    random_in_cache(cache, &complete, true).await;

    // Nothing expires, so clean must not remove anything
    cache.clean().await.unwrap();
    random_read(cache, &complete, true).await;
    random_in_cache(cache, &complete, true).await;

    for case in &complete {
        let remaining = cache.remaining_ttl(&case.key).await.unwrap();
        assert!(
            matches!(remaining, RemainingTtl::Persistent | RemainingTtl::Unsupported),
            "{}: {remaining:?}",
            cache.name()
        );
    }

    cache.flush().await.unwrap();
    random_read(cache, &complete, false).await;
    random_in_cache(cache, &complete, false).await;
}

pub async fn delete_test(cache: &dyn CacheBackend, prefix: &str) {
    cache.flush().await.unwrap();
    cache.set_default_ttl(Ttl::Never).await.unwrap();

    let set = build_test_set(prefix, "delete", "valueToDelete");
    for case in &set {
        cache.set_default(&case.key, &case.value).await.unwrap();
    }
    for case in sample(&set) {
        cache.delete(&case.key).await.unwrap();
        assert!(!cache.is_in_cache(&case.key).await.unwrap());
        // Idempotent
        cache.delete(&case.key).await.unwrap();
    }
}

pub async fn extreme_keys_test(cache: &dyn CacheBackend) {
    let set = build_binary_test_set();
    for case in &set {
        cache.set_default(&case.key, &case.value).await.unwrap();
    }
    random_read(cache, &set, true).await;
}

pub async fn expiration_test(cache: &dyn CacheBackend, prefix: &str) {
    const SHORT_TTL: u64 = 1;
    const LONG_TTL: u64 = 200;

    cache.flush().await.unwrap();

    cache.set_default_ttl(Ttl::from_secs(LONG_TTL)).await.unwrap();
    let long = build_test_set(prefix, "longTtl", "value");
    for case in &long {
        cache.set_default(&case.key, &case.value).await.unwrap();
    }

    cache.set_default_ttl(Ttl::from_secs(SHORT_TTL)).await.unwrap();
    let short = build_test_set(prefix, "shortTtl", "value");
    for case in &short {
        cache.set_default(&case.key, &case.value).await.unwrap();
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    random_read(cache, &short, false).await;
    random_read(cache, &long, true).await;

    cache.clean().await.unwrap();
    random_read(cache, &short, false).await;
    random_read(cache, &long, true).await;

    for case in &long {
        match cache.remaining_ttl(&case.key).await.unwrap() {
            RemainingTtl::Expires(left) => {
                assert!(left > Duration::ZERO);
                assert!(left < Duration::from_secs(LONG_TTL));
            }
            RemainingTtl::Unsupported => {}
            RemainingTtl::Persistent => panic!("{}: long TTL item reported persistent", cache.name()),
        }
    }
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct User {
        pub id: u64,
        pub name: String,
        pub email: String,
    }

    impl User {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
            }
        }
    }
}
