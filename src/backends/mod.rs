//! Cache Backend Implementations
//!
//! Leaf backends that can serve as tiers of a `TieredCache`.
//!
//! # Available Backends
//!
//! ## In-Memory
//! - **`InMemoryCache`** - Unbounded `DashMap` cache, also the lenient-mode substitute
//! - **Moka** - Bounded concurrent cache with automatic eviction (feature: `moka`)
//!
//! ## On-Disk
//! - **`DirectoryCache`** - One file per key inside a directory
//!
//! ## Remote
//! - **Redis** - Shared cache with native TTLs (feature: `redis`)
//!
//! # Usage
//!
//! ```rust,no_run
//! use tiered_cache::backends::{DirectoryCache, DirectoryCacheConfig, InMemoryCache};
//!
//! # async fn example() -> tiered_cache::CacheResult<()> {
//! let memory = InMemoryCache::new();
//! let disk = DirectoryCache::open(DirectoryCacheConfig::new("/var/cache/app", "app")).await?;
//! # Ok(())
//! # }
//! ```

// Core backends (always available)
pub mod directory;
pub mod memory;

// Optional backends (feature-gated)
#[cfg(feature = "moka")]
pub mod moka_cache;

#[cfg(feature = "redis")]
pub mod redis_cache;

// Re-export backend types
pub use directory::{DirectoryCache, DirectoryCacheConfig};
pub use memory::InMemoryCache;

#[cfg(feature = "moka")]
pub use moka_cache::{MokaCache, MokaCacheConfig};

#[cfg(feature = "redis")]
pub use redis_cache::{RedisCache, RedisCacheConfig};
