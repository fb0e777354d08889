//! Tiered Cache - Ordered Cascade Over Cache Backends
//!
//! Reads walk the tiers in order and stop at the first hit; tiers that
//! missed on the way are backfilled with the hit's remaining lifetime.
//! Writes, deletes and maintenance fan out to every tier.
//!
//! A `TieredCache` is itself a `CacheBackend`, so cascades nest.

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::builder::TieredCacheBuilder;
use crate::codecs::JsonCodec;
use crate::error::{CacheError, CacheResult};
use crate::tier::{TierBinding, TierCounters, TierPolicy, TierSource};
use crate::traits::{CacheBackend, CacheCodec, RemainingTtl, Ttl};

/// RAII cleanup guard for in-flight request tracking
/// Ensures that entries are removed from `DashMap` even on early return or panic
struct CleanupGuard<'a> {
    map: &'a DashMap<Vec<u8>, Arc<Mutex<()>>>,
    key: Vec<u8>,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Ordered cascade of cache tiers
///
/// # Example
///
/// ```rust
/// use tiered_cache::{CacheBackend, InMemoryCache, TierSource, TieredCache, Ttl};
///
/// # async fn example() -> tiered_cache::CacheResult<()> {
/// let cache = TieredCache::builder()
///     .with_tier(TierSource::instance(InMemoryCache::new()))
///     .with_prefixed_tier(TierSource::instance(InMemoryCache::new()), "shared:")
///     .build()
///     .await?;
///
/// cache.set(b"user:1", b"alice", Ttl::from_secs(300)).await?;
/// assert_eq!(cache.get(b"user:1").await?, Some(b"alice".to_vec()));
/// # Ok(())
/// # }
/// ```
///
/// `is_in_cache` is answered by a full cascade `get` and may therefore
/// backfill earlier tiers. Use [`TieredCache::contains`] for a probe that
/// never writes.
pub struct TieredCache {
    tiers: Vec<TierBinding>,
    policy: TierPolicy,
    codec: JsonCodec,
    /// Statistics
    total_requests: AtomicU64,
    misses: AtomicU64,
    /// In-flight computations, keyed by logical key, for stampede protection
    in_flight_requests: DashMap<Vec<u8>, Arc<Mutex<()>>>,
}

impl TieredCache {
    /// Start building a tiered cache (strict by default)
    #[must_use]
    pub fn builder() -> TieredCacheBuilder {
        TieredCacheBuilder::new()
    }

    /// Cascade over `tiers` in order, with empty prefixes
    #[must_use]
    pub fn new(tiers: Vec<TierSource>, policy: TierPolicy) -> Self {
        Self::from_parts(
            tiers.into_iter().map(|source| (source, Vec::new())).collect(),
            policy,
        )
    }

    pub(crate) fn from_parts(tiers: Vec<(TierSource, Vec<u8>)>, policy: TierPolicy) -> Self {
        let tiers = tiers
            .into_iter()
            .enumerate()
            .map(|(index, (source, prefix))| TierBinding::new(index, source, prefix, policy))
            .collect();

        Self {
            tiers,
            policy,
            codec: JsonCodec,
            total_requests: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            in_flight_requests: DashMap::new(),
        }
    }

    /// The tier bindings, in lookup order
    #[must_use]
    pub fn tiers(&self) -> &[TierBinding] {
        &self.tiers
    }

    #[must_use]
    pub fn policy(&self) -> TierPolicy {
        self.policy
    }

    /// Cascade lookup with backfill of the tiers that missed
    async fn cascade_get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut missed: Vec<(&TierBinding, &Arc<dyn CacheBackend>)> = Vec::new();
        for tier in &self.tiers {
            let backend = tier.resolve().await?;
            let physical_key = tier.key(key);

            if let Some(value) = backend.get(&physical_key).await? {
                TierCounters::record(&tier.counters.hits);
                if !missed.is_empty() {
                    Self::backfill(tier, backend, &physical_key, key, &value, &missed).await?;
                }
                return Ok(Some(value));
            }

            TierCounters::record(&tier.counters.misses);
            missed.push((tier, backend));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Copy a hit into the tiers that missed, keeping its remaining lifetime
    async fn backfill(
        source: &TierBinding,
        backend: &Arc<dyn CacheBackend>,
        physical_key: &[u8],
        key: &[u8],
        value: &[u8],
        missed: &[(&TierBinding, &Arc<dyn CacheBackend>)],
    ) -> CacheResult<()> {
        let ttl = match backend.remaining_ttl(physical_key).await {
            Ok(RemainingTtl::Persistent) => Ttl::Never,
            Ok(RemainingTtl::Expires(left)) if !left.is_zero() => Ttl::After(left),
            // Expired in between, or no way to know how long the item lives
            Ok(RemainingTtl::Expires(_) | RemainingTtl::Unsupported)
            | Err(CacheError::ItemNotInCache) => return Ok(()),
            Err(e) => return Err(e),
        };

        for (tier, lower) in missed {
            lower.set(&tier.key(key), value, ttl).await?;
            TierCounters::record(&tier.counters.backfills);
        }

        debug!(
            from_tier = source.index(),
            backfilled = missed.len(),
            ttl_secs = ttl.as_secs(),
            "Backfilled cache tiers"
        );
        Ok(())
    }

    /// Whether any tier holds `key`, without backfilling
    ///
    /// # Errors
    ///
    /// Propagates tier construction and backend errors.
    pub async fn contains(&self, key: &[u8]) -> CacheResult<bool> {
        for tier in &self.tiers {
            let backend = tier.resolve().await?;
            if backend.is_in_cache(&tier.key(key)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Get a value or compute it, with cache stampede protection
    ///
    /// Concurrent callers missing the same key wait on one computation; its
    /// result is written to every tier with `ttl` and returned to all of them.
    ///
    /// # Errors
    ///
    /// `CacheError::Compute` when `compute_fn` fails, otherwise the errors of
    /// the underlying cascade operations.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &[u8],
        ttl: Ttl,
        compute_fn: F,
    ) -> CacheResult<Vec<u8>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send,
    {
        // Fast path without locking
        if let Some(value) = self.cascade_get(key).await? {
            return Ok(value);
        }

        let lock_guard = self
            .in_flight_requests
            .entry(key.to_vec())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // Declared before the lock guard so the entry is removed after unlocking
        let _cleanup_guard = CleanupGuard {
            map: &self.in_flight_requests,
            key: key.to_vec(),
        };

        let _guard = lock_guard.lock().await;

        // Another caller may have filled it while we waited
        if let Some(value) = self.cascade_get(key).await? {
            return Ok(value);
        }

        debug!(key_len = key.len(), "Computing fresh value (stampede protected)");
        let fresh = compute_fn().await.map_err(CacheError::Compute)?;
        self.set(key, &fresh, ttl).await?;
        Ok(fresh)
    }

    /// Typed variant of [`TieredCache::get_or_compute`], encoded with `JsonCodec`
    ///
    /// # Errors
    ///
    /// As `get_or_compute`, plus `CacheError::Codec` on encode/decode failure.
    pub async fn get_or_compute_typed<T, F, Fut>(
        &self,
        key: &[u8],
        ttl: Ttl,
        compute_fn: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let codec = self.codec;
        let bytes = self
            .get_or_compute(key, ttl, || async move {
                let value = compute_fn().await?;
                codec.serialize(&value)
            })
            .await?;
        self.codec.deserialize(&bytes).map_err(CacheError::Codec)
    }

    /// Cascade get decoded with `JsonCodec`
    ///
    /// # Errors
    ///
    /// `CacheError::Codec` if a stored value does not decode as `T`.
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &[u8]) -> CacheResult<Option<T>> {
        match self.cascade_get(key).await? {
            Some(bytes) => self
                .codec
                .deserialize(&bytes)
                .map(Some)
                .map_err(CacheError::Codec),
            None => Ok(None),
        }
    }

    /// Cascade set encoded with `JsonCodec`
    ///
    /// # Errors
    ///
    /// `CacheError::Codec` if `value` cannot be encoded, then any tier error.
    pub async fn set_typed<T: Serialize + Sync + ?Sized>(
        &self,
        key: &[u8],
        value: &T,
        ttl: Ttl,
    ) -> CacheResult<()> {
        let bytes = self.codec.serialize(value).map_err(CacheError::Codec)?;
        self.set(key, &bytes, ttl).await
    }

    /// Snapshot of the per-tier counters
    #[must_use]
    pub fn tier_stats(&self) -> Vec<TierStats> {
        self.tiers
            .iter()
            .map(|tier| TierStats {
                index: tier.index(),
                backend: tier.resolved().map(|backend| backend.name()),
                hits: tier.counters.hits.load(Ordering::Relaxed),
                misses: tier.counters.misses.load(Ordering::Relaxed),
                backfills: tier.counters.backfills.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Get comprehensive cache statistics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> TieredCacheStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hits = total_requests.saturating_sub(misses);

        TieredCacheStats {
            total_requests,
            hits,
            misses,
            hit_rate: if total_requests > 0 {
                (hits as f64 / total_requests as f64) * 100.0
            } else {
                0.0
            },
            in_flight_requests: self.in_flight_requests.len(),
            tiers: self.tier_stats(),
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("tiers", &self.tiers)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Counters of a single tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierStats {
    pub index: usize,
    /// Backend name, `None` while a lazy tier is unresolved
    pub backend: Option<&'static str>,
    pub hits: u64,
    pub misses: u64,
    /// Writes made into this tier by backfill
    pub backfills: u64,
}

/// Tiered cache statistics
#[derive(Debug, Clone)]
pub struct TieredCacheStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub in_flight_requests: usize,
    pub tiers: Vec<TierStats>,
}

// ===== Trait Implementations =====

use async_trait::async_trait;

#[async_trait]
impl CacheBackend for TieredCache {
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        self.cascade_get(key).await
    }

    /// Cascades never report remaining lifetimes
    async fn remaining_ttl(&self, _key: &[u8]) -> CacheResult<RemainingTtl> {
        Ok(RemainingTtl::Unsupported)
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Ttl) -> CacheResult<()> {
        for tier in &self.tiers {
            let backend = tier.resolve().await?;
            backend.set(&tier.key(key), value, ttl).await?;
        }
        Ok(())
    }

    async fn set_default_ttl(&self, ttl: Ttl) -> CacheResult<()> {
        for tier in &self.tiers {
            tier.resolve().await?.set_default_ttl(ttl).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        for tier in &self.tiers {
            let backend = tier.resolve().await?;
            backend.delete(&tier.key(key)).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> CacheResult<()> {
        for tier in &self.tiers {
            tier.resolve().await?.flush().await?;
        }
        Ok(())
    }

    async fn clean(&self) -> CacheResult<()> {
        for tier in &self.tiers {
            tier.resolve().await?.clean().await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Tiered"
    }
}
