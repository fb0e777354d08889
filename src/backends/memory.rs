//! In-Memory Cache - Unbounded Concurrent Map Backend
//!
//! A lightweight in-memory cache using `DashMap` for concurrent access.
//! This is the baseline leaf backend and the substitute used by lenient
//! tiered caches when a lazy tier cannot be constructed.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::traits::{DefaultTtl, RemainingTtl, Ttl};

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub(crate) value: Vec<u8>,
    pub(crate) expires_at: Option<Instant>,
}

impl CacheEntry {
    /// A lifetime too long to represent as an `Instant` never expires
    pub(crate) fn new(value: Vec<u8>, lifetime: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: lifetime.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    pub(crate) fn remaining(&self) -> RemainingTtl {
        match self.expires_at {
            None => RemainingTtl::Persistent,
            Some(expires_at) => {
                RemainingTtl::Expires(expires_at.saturating_duration_since(Instant::now()))
            }
        }
    }
}

/// Simple unbounded cache using `DashMap`
///
/// **Features**:
/// - Lock-free concurrent reads/writes
/// - Per-key TTL with lazy expiry on read
/// - Exact remaining-TTL reporting
///
/// **Limitations**:
/// - No eviction policy and no size limit
/// - Expired entries stay in memory until read or `clean()`
///
/// **Example**:
/// ```rust
/// use tiered_cache::{CacheBackend, InMemoryCache, Ttl};
///
/// # async fn example() -> tiered_cache::CacheResult<()> {
/// let cache = InMemoryCache::new();
/// cache.set(b"user:1", b"alice", Ttl::from_secs(60)).await?;
/// assert_eq!(cache.get(b"user:1").await?, Some(b"alice".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryCache {
    map: DashMap<Vec<u8>, CacheEntry>,
    default_ttl: DefaultTtl,
    /// Hit counter
    hits: AtomicU64,
    /// Miss counter
    misses: AtomicU64,
    /// Set counter
    sets: AtomicU64,
}

impl InMemoryCache {
    /// Create an empty cache whose default TTL is "never expire"
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            default_ttl: DefaultTtl::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }

    /// Remove expired entries, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(count = removed, "[InMemory] Cleaned up expired entries");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet removed
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// (hits, misses, sets) counters
    #[must_use]
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
        )
    }

    /// Apply `read` to the live entry for `key`, dropping it if expired
    fn with_live_entry<T>(&self, key: &[u8], read: impl FnOnce(&CacheEntry) -> T) -> Option<T> {
        let entry = self.map.get(key)?;
        if !entry.is_expired() {
            return Some(read(entry.value()));
        }
        // The shard read lock must be released before removing
        drop(entry);
        self.map.remove_if(key, |_, stored| stored.is_expired());
        None
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        if let Some(value) = self.with_live_entry(key, |entry| entry.value.clone()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(value))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    async fn remaining_ttl(&self, key: &[u8]) -> CacheResult<RemainingTtl> {
        self.with_live_entry(key, CacheEntry::remaining)
            .ok_or(CacheError::ItemNotInCache)
    }

    async fn is_in_cache(&self, key: &[u8]) -> CacheResult<bool> {
        Ok(self.with_live_entry(key, |_| ()).is_some())
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Ttl) -> CacheResult<()> {
        let lifetime = self.default_ttl.lifetime(ttl);
        self.map
            .insert(key.to_vec(), CacheEntry::new(value.to_vec(), lifetime));
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(
            key_len = key.len(),
            ttl_secs = lifetime.map_or(0, |ttl| ttl.as_secs()),
            "[InMemory] Cached key"
        );
        Ok(())
    }

    async fn set_default_ttl(&self, ttl: Ttl) -> CacheResult<()> {
        self.default_ttl.set(ttl);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn flush(&self) -> CacheResult<()> {
        self.map.clear();
        Ok(())
    }

    async fn clean(&self) -> CacheResult<()> {
        self.cleanup_expired();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "InMemory"
    }
}
