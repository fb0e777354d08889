//! Cache Backend Traits
//!
//! This module defines the contract every cache backend (leaf or composite)
//! satisfies, the TTL vocabulary shared by all of them, and the pluggable
//! serialization codec used by the typed helpers.
//!
//! # Architecture
//!
//! - `CacheBackend`: Core trait for all cache implementations, including `TieredCache`
//! - `Ttl` / `RemainingTtl`: Write-side and read-side TTL semantics
//! - `DefaultTtl`: Per-instance default TTL state used by the leaf backends
//! - `CacheCodec`: Trait for pluggable serialization backends
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use tiered_cache::{async_trait, CacheBackend, CacheResult, Ttl};
//!
//! struct MyCustomCache {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl CacheBackend for MyCustomCache {
//!     async fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
//!         // Your implementation
//!     }
//!
//!     async fn set(&self, key: &[u8], value: &[u8], ttl: Ttl) -> CacheResult<()> {
//!         // Your implementation
//!     }
//!
//!     // ... set_default_ttl, delete, flush
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::error::{CacheError, CacheResult};

/// Time-to-live requested on a write
///
/// The integer form used by configuration files maps as follows:
/// `ttl > 0` expires after that many seconds, `ttl == 0` never expires and
/// `ttl < 0` uses the cache's current default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the cache's current default TTL
    #[default]
    Default,
    /// Never expires
    Never,
    /// Expires after the given duration (a zero duration means never)
    After(Duration),
}

impl Ttl {
    /// TTL of the given number of seconds, `0` meaning never
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::Never
        } else {
            Self::After(Duration::from_secs(secs))
        }
    }

    /// Integer form: `-1` for default, `0` for never, whole seconds rounded up otherwise
    #[must_use]
    pub fn as_secs(&self) -> i64 {
        match self {
            Self::Default => -1,
            Self::Never => 0,
            Self::After(duration) => ceil_secs(*duration),
        }
    }
}

impl From<i64> for Ttl {
    fn from(ttl: i64) -> Self {
        match ttl {
            t if t > 0 => Self::After(Duration::from_secs(t.unsigned_abs())),
            0 => Self::Never,
            _ => Self::Default,
        }
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Never
        } else {
            Self::After(duration)
        }
    }
}

/// Remaining lifetime of a stored item, as reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTtl {
    /// The item never expires
    Persistent,
    /// The item expires after the given duration
    Expires(Duration),
    /// The backend cannot report remaining TTLs
    Unsupported,
}

impl RemainingTtl {
    /// Integer form: `0` persistent, positive seconds (rounded up), `-1` unsupported
    #[must_use]
    pub fn as_secs(&self) -> i64 {
        match self {
            Self::Persistent => 0,
            Self::Expires(duration) => ceil_secs(*duration).max(1),
            Self::Unsupported => -1,
        }
    }
}

fn ceil_secs(duration: Duration) -> i64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Default TTL held by a single cache instance
///
/// Stored as milliseconds, `0` meaning never expire. Setting it to
/// [`Ttl::Default`] is a no-op, so the default can never be corrupted by a
/// negative integer TTL.
#[derive(Debug, Default)]
pub struct DefaultTtl {
    millis: AtomicU64,
}

impl DefaultTtl {
    #[must_use]
    pub fn new(ttl: Ttl) -> Self {
        let default = Self::default();
        default.set(ttl);
        default
    }

    /// Current default
    #[must_use]
    pub fn get(&self) -> Ttl {
        match self.millis.load(Ordering::Relaxed) {
            0 => Ttl::Never,
            millis => Ttl::After(Duration::from_millis(millis)),
        }
    }

    pub fn set(&self, ttl: Ttl) {
        let millis = match ttl {
            Ttl::Default => return,
            Ttl::Never => 0,
            Ttl::After(duration) if duration.is_zero() => 0,
            Ttl::After(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1),
        };
        self.millis.store(millis, Ordering::Relaxed);
    }

    /// Lifetime of an item written with `ttl`, `None` meaning it never expires
    #[must_use]
    pub fn lifetime(&self, ttl: Ttl) -> Option<Duration> {
        match ttl {
            Ttl::Default => self.lifetime(self.get()),
            Ttl::Never => None,
            Ttl::After(duration) if duration.is_zero() => None,
            Ttl::After(duration) => Some(duration),
        }
    }
}

/// Trait for cache value serialization/deserialization
///
/// This trait provides a pluggable serialization abstraction, used by the
/// typed helpers of `TieredCache` and by the on-disk entry format of
/// `DirectoryCache`.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug` to support concurrent access across async tasks
/// and provide debugging capabilities.
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Get the name of the codec
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str;
}

/// Core cache backend trait for leaf and composite caches
///
/// Keys and values are opaque byte sequences. Keys compare by exact byte
/// equality; any byte may appear in a key.
///
/// # Required Operations
///
/// - `get`: Retrieve a value by key (`None` when absent or expired)
/// - `set`: Store a value with a [`Ttl`]
/// - `set_default_ttl`: Change the TTL used for [`Ttl::Default`] writes
/// - `delete`: Remove a value by key (absence is not an error)
/// - `flush`: Remove every entry reachable through this instance
///
/// Expiry is lazy: an expired entry behaves as absent even if it has not
/// been physically removed yet. `clean` may remove expired entries eagerly.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; all operations take `&self`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get value from cache by key
    ///
    /// # Returns
    ///
    /// * `Ok(Some(value))` - Value found and not expired
    /// * `Ok(None)` - Key never set, deleted or expired
    /// * `Err(e)` - Backend failure (I/O, connection, ...)
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>>;

    /// Get value, reporting absence as [`CacheError::ItemNotInCache`]
    async fn fetch(&self, key: &[u8]) -> CacheResult<Vec<u8>> {
        self.get(key).await?.ok_or(CacheError::ItemNotInCache)
    }

    /// Remaining lifetime of a stored item
    ///
    /// Fails with [`CacheError::ItemNotInCache`] under the same conditions
    /// as a `get` miss. Backends that cannot introspect TTLs keep this
    /// default, which reports [`RemainingTtl::Unsupported`].
    async fn remaining_ttl(&self, key: &[u8]) -> CacheResult<RemainingTtl> {
        if self.is_in_cache(key).await? {
            Ok(RemainingTtl::Unsupported)
        } else {
            Err(CacheError::ItemNotInCache)
        }
    }

    /// Whether `get(key)` would find the item
    ///
    /// Backends may override this with a cheaper probe as long as the
    /// outcome is identical.
    async fn is_in_cache(&self, key: &[u8]) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Set value in cache
    ///
    /// Inserts or overwrites the entry. `Ttl::Default` uses the current default TTL.
    async fn set(&self, key: &[u8], value: &[u8], ttl: Ttl) -> CacheResult<()>;

    /// Set value using the current default TTL
    async fn set_default(&self, key: &[u8], value: &[u8]) -> CacheResult<()> {
        self.set(key, value, Ttl::Default).await
    }

    /// Set the default TTL used for `Ttl::Default` writes
    ///
    /// Passing `Ttl::Default` leaves the current default unchanged.
    async fn set_default_ttl(&self, ttl: Ttl) -> CacheResult<()>;

    /// Remove value from cache (no error if absent)
    async fn delete(&self, key: &[u8]) -> CacheResult<()>;

    /// Remove every entry reachable through this cache
    async fn flush(&self) -> CacheResult<()>;

    /// Best-effort removal of expired entries
    async fn clean(&self) -> CacheResult<()> {
        Ok(())
    }

    /// Check if cache backend is healthy
    ///
    /// The default performs a set/get/delete round trip on a probe key.
    /// A freshly constructed lazy tier that fails this check is treated as
    /// not conforming to the contract.
    async fn health_check(&self) -> bool {
        let probe_key = b"__tiered_cache_health_check__";
        let probe_value = b"health_check_value";

        if self
            .set(probe_key, probe_value, Ttl::After(Duration::from_secs(60)))
            .await
            .is_err()
        {
            return false;
        }
        let healthy = matches!(
            self.get(probe_key).await,
            Ok(Some(retrieved)) if retrieved == probe_value
        );
        if let Err(e) = self.delete(probe_key).await {
            warn!(backend = self.name(), error = %e, "Health check key was not removed");
        }
        healthy
    }

    /// Get the name of this cache backend
    ///
    /// This is used for logging and statistics.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
