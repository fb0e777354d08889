//! Tiered Cache
//!
//! A composable key-value caching library for Rust featuring:
//! - **One Contract**: Every backend implements `CacheBackend` (byte keys, byte values, TTLs)
//! - **Leaf Backends**: In-memory (`DashMap`), on-disk directory, Moka and Redis
//! - **Tiered Cascade**: Ordered tiers with lookup fallthrough and TTL-preserving backfill
//! - **Lazy Tiers**: Tiers built on first use, with strict or lenient failure handling
//! - **Cache Stampede Protection**: `DashMap` + Mutex request coalescing in `get_or_compute`
//! - **Configuration**: Cascades described in JSON and built through a backend registry
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tiered_cache::{CacheBackend, InMemoryCache, TierSource, TieredCache, Ttl};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = TieredCache::builder()
//!         .with_tier(TierSource::instance(InMemoryCache::new()))
//!         .with_prefixed_tier(
//!             TierSource::factory(|| async { tiered_cache::RedisCache::new().await }),
//!             "app:",
//!         )
//!         .strict(false)
//!         .build()
//!         .await?;
//!
//!     cache.set(b"user:1", b"alice", Ttl::from_secs(300)).await?;
//!
//!     // First tier, then the next one, backfilling on the way back
//!     if let Some(cached) = cache.get(b"user:1").await? {
//!         tracing::info!("Cached data: {}", String::from_utf8_lossy(&cached));
//!     }
//!
//!     let stats = cache.stats();
//!     tracing::info!("Hit rate: {:.2}%", stats.hit_rate);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Request → Tier 0 → Tier 1 → ... → Tier n → Miss (None)
//!           ↓ Hit    ↓ Hit          ↓ Hit
//!           Return   Backfill 0     Backfill 0..n-1 with the remaining TTL
//! ```

pub mod backends;
pub mod builder;
pub mod cache_aware;
pub mod codecs;
pub mod config;
pub mod error;
pub mod tier;
pub mod tiered_cache;
pub mod traits;

pub use backends::{DirectoryCache, DirectoryCacheConfig, InMemoryCache};

// Optional backends (feature-gated)
#[cfg(feature = "moka")]
pub use backends::{MokaCache, MokaCacheConfig};

#[cfg(feature = "redis")]
pub use backends::{RedisCache, RedisCacheConfig};

pub use builder::{BackendConstructor, TieredCacheBuilder};
pub use cache_aware::CacheHandle;
pub use codecs::JsonCodec;
pub use config::{TierConfig, TieredCacheConfig};
pub use error::{CacheError, CacheResult};
pub use tier::{BackendFactory, TierBinding, TierPolicy, TierSource};
pub use tiered_cache::{TierStats, TieredCache, TieredCacheStats};
pub use traits::{CacheBackend, CacheCodec, DefaultTtl, RemainingTtl, Ttl};

// Re-export async_trait for custom backend implementations
pub use async_trait::async_trait;
