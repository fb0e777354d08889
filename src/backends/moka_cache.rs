//! Moka Cache - Bounded In-Memory Cache Backend
//!
//! High-performance in-memory cache using Moka for hot data storage.
//! Unlike `InMemoryCache` it is bounded: Moka evicts entries on its own once
//! `max_capacity` is reached, so a miss may also mean "evicted".

use moka::Expiry;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::memory::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::traits::{DefaultTtl, RemainingTtl, Ttl};

/// Configuration for `MokaCache`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MokaCacheConfig {
    /// Max capacity of the cache
    pub max_capacity: u64,
}

impl Default for MokaCacheConfig {
    fn default() -> Self {
        Self { max_capacity: 2000 }
    }
}

/// Per-entry expiry driven by the deadline stored in the entry
struct EntryExpiry;

impl Expiry<Vec<u8>, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &Vec<u8>,
        value: &CacheEntry,
        created_at: Instant,
    ) -> Option<Duration> {
        value
            .expires_at
            .map(|expires_at| expires_at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &Vec<u8>,
        value: &CacheEntry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value
            .expires_at
            .map(|expires_at| expires_at.saturating_duration_since(updated_at))
    }
}

/// Moka in-memory cache with per-key TTL support
///
/// - Fast in-memory access
/// - Automatic size-bounded eviction (Moka's TinyLFU)
/// - Per-key TTL, with exact remaining-TTL reporting
pub struct MokaCache {
    /// Moka cache instance
    cache: Cache<Vec<u8>, CacheEntry>,
    default_ttl: DefaultTtl,
}

impl MokaCache {
    /// Create new Moka cache
    #[must_use]
    pub fn new(config: MokaCacheConfig) -> Self {
        info!(capacity = config.max_capacity, "Initializing Moka Cache");

        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self {
            cache,
            default_ttl: DefaultTtl::default(),
        }
    }

    /// Approximate number of live entries
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    async fn live_entry(&self, key: &[u8]) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => {
                self.cache.invalidate(key).await;
                None
            }
            other => other,
        }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new(MokaCacheConfig::default())
    }
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

#[async_trait]
impl CacheBackend for MokaCache {
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.live_entry(key).await.map(|entry| entry.value))
    }

    async fn remaining_ttl(&self, key: &[u8]) -> CacheResult<RemainingTtl> {
        self.live_entry(key)
            .await
            .map(|entry| entry.remaining())
            .ok_or(CacheError::ItemNotInCache)
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Ttl) -> CacheResult<()> {
        let lifetime = self.default_ttl.lifetime(ttl);
        self.cache
            .insert(key.to_vec(), CacheEntry::new(value.to_vec(), lifetime))
            .await;
        debug!(
            key_len = key.len(),
            ttl_secs = lifetime.map_or(0, |ttl| ttl.as_secs()),
            "[Moka] Cached key"
        );
        Ok(())
    }

    async fn set_default_ttl(&self, ttl: Ttl) -> CacheResult<()> {
        self.default_ttl.set(ttl);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn flush(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn clean(&self) -> CacheResult<()> {
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Moka"
    }
}
