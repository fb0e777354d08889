//! Tiered Cache Builder
//!
//! Assembles a `TieredCache` from ready backends, lazy constructors or
//! named backends resolved through a registry.
//!
//! # Example: Direct Tiers
//!
//! ```rust,no_run
//! use tiered_cache::{DirectoryCache, DirectoryCacheConfig, InMemoryCache, TierSource, TieredCacheBuilder};
//!
//! #[tokio::main]
//! async fn main() -> tiered_cache::CacheResult<()> {
//!     let cache = TieredCacheBuilder::new()
//!         .with_tier(TierSource::instance(InMemoryCache::new()))
//!         .with_tier(TierSource::factory(|| async {
//!             DirectoryCache::open(DirectoryCacheConfig::new("/var/cache/app", "app"))
//!                 .await
//!                 .map_err(anyhow::Error::from)
//!         }))
//!         .strict(false)
//!         .build()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: From Configuration
//!
//! ```rust,no_run
//! use tiered_cache::{TieredCacheBuilder, TieredCacheConfig};
//!
//! # async fn example() -> tiered_cache::CacheResult<()> {
//! let config = TieredCacheConfig::from_json_file("cache.json").await?;
//! let cache = TieredCacheBuilder::from_config(config).build().await?;
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::backends::{DirectoryCache, DirectoryCacheConfig, InMemoryCache};
use crate::config::TieredCacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::tier::{TierPolicy, TierSource};
use crate::tiered_cache::TieredCache;
use crate::traits::{CacheBackend, Ttl};

#[cfg(feature = "moka")]
use crate::backends::{MokaCache, MokaCacheConfig};
#[cfg(feature = "redis")]
use crate::backends::{RedisCache, RedisCacheConfig};

/// Turns the options of a named tier into a tier source
///
/// Option errors must be reported as `CacheError::InvalidConfiguration`.
pub type BackendConstructor =
    Arc<dyn Fn(&serde_json::Value) -> CacheResult<TierSource> + Send + Sync>;

enum PendingTier {
    Source(TierSource),
    Named {
        backend: String,
        options: serde_json::Value,
    },
}

/// Builder for constructing `TieredCache`
///
/// # Default Behavior
///
/// - Strict policy
/// - No default TTL override (every tier keeps its own, "never" for the
///   built-in backends)
/// - Built-in named backends: `memory`, `directory`, and with their features
///   `moka` and `redis`
pub struct TieredCacheBuilder {
    tiers: Vec<(PendingTier, Vec<u8>)>,
    policy: TierPolicy,
    default_ttl: Option<Ttl>,
    registry: HashMap<String, BackendConstructor>,
}

impl TieredCacheBuilder {
    /// Create a builder with no tiers and the built-in backend registry
    #[must_use]
    pub fn new() -> Self {
        let mut builder = Self {
            tiers: Vec::new(),
            policy: TierPolicy::Strict,
            default_ttl: None,
            registry: HashMap::new(),
        };
        builder.register_builtin_backends();
        builder
    }

    /// Builder preloaded with a configuration's policy, default TTL and tiers
    #[must_use]
    pub fn from_config(config: TieredCacheConfig) -> Self {
        let mut builder = Self::new().strict(config.strict);
        if let Some(ttl) = config.default_ttl() {
            builder = builder.default_ttl(ttl);
        }
        for tier in config.tiers {
            builder = builder.with_named_tier(tier.backend, tier.prefix, tier.options);
        }
        builder
    }

    /// `true` (default) for strict, `false` for lenient tier construction
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.policy = TierPolicy::from_strict(strict);
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: TierPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default TTL fanned out to every tier when the cache is built
    #[must_use]
    pub fn default_ttl(mut self, ttl: Ttl) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Append a tier with an empty key prefix
    #[must_use]
    pub fn with_tier(self, source: TierSource) -> Self {
        self.with_prefixed_tier(source, "")
    }

    /// Append a tier whose keys are stored as `prefix + key`
    #[must_use]
    pub fn with_prefixed_tier(mut self, source: TierSource, prefix: impl AsRef<[u8]>) -> Self {
        self.tiers
            .push((PendingTier::Source(source), prefix.as_ref().to_vec()));
        self
    }

    /// Append a tier built by the backend registered under `backend`
    ///
    /// The name and options are only checked by [`Self::build`].
    #[must_use]
    pub fn with_named_tier(
        mut self,
        backend: impl Into<String>,
        prefix: impl AsRef<[u8]>,
        options: serde_json::Value,
    ) -> Self {
        self.tiers.push((
            PendingTier::Named {
                backend: backend.into(),
                options,
            },
            prefix.as_ref().to_vec(),
        ));
        self
    }

    /// Register (or replace) a named backend
    ///
    /// # Example
    ///
    /// ```rust
    /// use tiered_cache::{InMemoryCache, TierSource, TieredCacheBuilder};
    ///
    /// let builder = TieredCacheBuilder::new()
    ///     .register_backend("scratch", |_options| Ok(TierSource::instance(InMemoryCache::new())))
    ///     .with_named_tier("scratch", "", serde_json::Value::Null);
    /// ```
    #[must_use]
    pub fn register_backend<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&serde_json::Value) -> CacheResult<TierSource> + Send + Sync + 'static,
    {
        self.insert_backend(name, constructor);
        self
    }

    fn insert_backend<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&serde_json::Value) -> CacheResult<TierSource> + Send + Sync + 'static,
    {
        self.registry.insert(name.into(), Arc::new(constructor));
    }

    fn register_builtin_backends(&mut self) {
        self.insert_backend("memory", |options| {
            parse_options::<NoOptions>("memory", options)?;
            Ok(TierSource::instance(InMemoryCache::new()))
        });

        // Validated eagerly, opened on first use
        self.insert_backend("directory", |options| {
            let config = parse_options::<DirectoryCacheConfig>("directory", options)?;
            config.validate()?;
            Ok(TierSource::factory(move || {
                let config = config.clone();
                async move { DirectoryCache::open(config).await.map_err(anyhow::Error::from) }
            }))
        });

        #[cfg(feature = "moka")]
        self.insert_backend("moka", |options| {
            let config = parse_options::<MokaCacheConfig>("moka", options)?;
            Ok(TierSource::instance(MokaCache::new(config)))
        });

        #[cfg(feature = "redis")]
        self.insert_backend("redis", |options| {
            let config = parse_options::<RedisCacheConfig>("redis", options)?;
            Ok(TierSource::factory(move || {
                RedisCache::with_config(config.clone())
            }))
        });
    }

    /// Build the `TieredCache`
    ///
    /// Named tiers are resolved through the registry here, so an unknown
    /// backend name or unparsable options fail the build regardless of the
    /// policy. Lazy tiers stay unresolved unless a default TTL was
    /// configured, which is fanned out to every tier.
    ///
    /// # Errors
    ///
    /// `CacheError::InvalidConfiguration` for malformed tier entries, and the
    /// errors of `set_default_ttl` when a default TTL is configured.
    pub async fn build(self) -> CacheResult<TieredCache> {
        let mut tiers = Vec::with_capacity(self.tiers.len());
        for (index, (pending, prefix)) in self.tiers.into_iter().enumerate() {
            let source = match pending {
                PendingTier::Source(source) => source,
                PendingTier::Named { backend, options } => {
                    let constructor = self.registry.get(&backend).ok_or_else(|| {
                        CacheError::InvalidConfiguration(format!(
                            "tier {index}: no backend registered under '{backend}'"
                        ))
                    })?;
                    constructor(&options)?
                }
            };
            tiers.push((source, prefix));
        }

        let tier_count = tiers.len();
        let cache = TieredCache::from_parts(tiers, self.policy);
        if let Some(ttl) = self.default_ttl {
            cache.set_default_ttl(ttl).await?;
        }

        info!(
            tiers = tier_count,
            policy = ?self.policy,
            "Tiered cache built"
        );
        Ok(cache)
    }
}

impl Default for TieredCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Options of backends that take none
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoOptions {}

fn parse_options<T: DeserializeOwned + Default>(
    backend: &str,
    options: &serde_json::Value,
) -> CacheResult<T> {
    if options.is_null() {
        return Ok(T::default());
    }
    T::deserialize(options).map_err(|e| {
        CacheError::InvalidConfiguration(format!("invalid options for '{backend}' backend: {e}"))
    })
}
