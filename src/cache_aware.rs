//! Cache-Aware Components
//!
//! `CacheHandle` is the piece a component embeds to make its caching
//! optional and switchable at runtime: an on/off flag plus an optional
//! backend (ready, or built on first use).
//!
//! ```rust
//! use tiered_cache::{CacheHandle, InMemoryCache, TierSource, Ttl};
//!
//! # async fn example() -> tiered_cache::CacheResult<()> {
//! let handle = CacheHandle::new();
//! assert!(!handle.is_enabled());
//!
//! handle.set_backend(TierSource::instance(InMemoryCache::new()));
//! handle.enable();
//! assert!(handle.cache_set(b"report:7", b"...", Ttl::from_secs(60)).await?);
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::tier::{BackendFactory, TierSource};
use crate::traits::{CacheBackend, Ttl};

#[derive(Clone)]
enum Slot {
    Empty,
    Ready(Arc<dyn CacheBackend>),
    Lazy {
        factory: BackendFactory,
        cell: Arc<OnceCell<Arc<dyn CacheBackend>>>,
    },
}

/// Switchable, lazily bound cache for a cache-aware component
///
/// Caching starts disabled. It is in use only when it is enabled *and* a
/// backend or backend constructor has been set.
pub struct CacheHandle {
    enabled: AtomicBool,
    slot: RwLock<Slot>,
}

impl CacheHandle {
    /// Disabled handle without a backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            slot: RwLock::new(Slot::Empty),
        }
    }

    /// Enabled handle bound to `source`
    #[must_use]
    pub fn with_backend(source: TierSource) -> Self {
        let handle = Self::new();
        handle.set_backend(source);
        handle.enable();
        handle
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Replace the backend; a constructor runs on the next `backend()` call
    pub fn set_backend(&self, source: TierSource) {
        let slot = match source {
            TierSource::Instance(backend) => Slot::Ready(backend),
            TierSource::Factory(factory) => Slot::Lazy {
                factory,
                cell: Arc::new(OnceCell::new()),
            },
        };
        *self.slot.write() = slot;
    }

    /// Enabled and a backend (or constructor) is present
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed) && !matches!(*self.slot.read(), Slot::Empty)
    }

    /// The backend, constructing it on first call
    ///
    /// Works regardless of the enabled flag.
    ///
    /// # Errors
    ///
    /// `CacheError::NoBackend` if none was set; constructor failures are
    /// propagated and retried on the next call.
    pub async fn backend(&self) -> CacheResult<Arc<dyn CacheBackend>> {
        let slot = self.slot.read().clone();
        match slot {
            Slot::Empty => Err(CacheError::NoBackend),
            Slot::Ready(backend) => Ok(backend),
            Slot::Lazy { factory, cell } => {
                let backend = cell
                    .get_or_try_init(|| async {
                        let backend = factory().await?;
                        debug!(backend = backend.name(), "Cache handle backend constructed");
                        Ok::<_, CacheError>(backend)
                    })
                    .await?;
                Ok(Arc::clone(backend))
            }
        }
    }

    /// Read through the handle; `None` while caching is not in use
    ///
    /// # Errors
    ///
    /// Backend and construction errors.
    pub async fn cache_get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.backend().await?.get(key).await
    }

    /// Write through the handle, returning whether anything was written
    ///
    /// # Errors
    ///
    /// Backend and construction errors.
    pub async fn cache_set(&self, key: &[u8], value: &[u8], ttl: Ttl) -> CacheResult<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        self.backend().await?.set(key, value, ttl).await?;
        Ok(true)
    }
}

impl Default for CacheHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &*self.slot.read() {
            Slot::Empty => "none",
            Slot::Ready(_) => "ready",
            Slot::Lazy { cell, .. } if cell.initialized() => "ready",
            Slot::Lazy { .. } => "lazy",
        };
        f.debug_struct("CacheHandle")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("backend", &backend)
            .finish()
    }
}
