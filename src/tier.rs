//! Lazy Tier Binding
//!
//! A tier is either a ready backend instance or a zero-argument async
//! constructor that produces one on first use. Resolution happens at most
//! once per binding, also under concurrent first access.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::backends::InMemoryCache;
use crate::error::{CacheError, CacheResult};
use crate::traits::CacheBackend;

/// Zero-argument async constructor of a backend
pub type BackendFactory =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<dyn CacheBackend>>> + Send + Sync>;

/// What a tier is built from
#[derive(Clone)]
pub enum TierSource {
    /// A ready backend
    Instance(Arc<dyn CacheBackend>),
    /// A constructor invoked on first use
    Factory(BackendFactory),
}

impl TierSource {
    /// Wrap a ready backend
    pub fn instance<B: CacheBackend + 'static>(backend: B) -> Self {
        Self::Instance(Arc::new(backend))
    }

    /// Share a backend that is also used elsewhere
    pub fn shared(backend: Arc<dyn CacheBackend>) -> Self {
        Self::Instance(backend)
    }

    /// Lazily construct the backend with `constructor` on first use
    ///
    /// ```rust
    /// use tiered_cache::{InMemoryCache, TierSource};
    ///
    /// let source = TierSource::factory(|| async { Ok::<_, anyhow::Error>(InMemoryCache::new()) });
    /// ```
    pub fn factory<F, Fut, B>(constructor: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<B>> + Send + 'static,
        B: CacheBackend + 'static,
    {
        Self::Factory(Arc::new(move || {
            constructor()
                .map(|built| built.map(|backend| Arc::new(backend) as Arc<dyn CacheBackend>))
                .boxed()
        }))
    }
}

impl fmt::Debug for TierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(backend) => f.debug_tuple("Instance").field(&backend.name()).finish(),
            Self::Factory(_) => f.write_str("Factory"),
        }
    }
}

impl<B: CacheBackend + 'static> From<Arc<B>> for TierSource {
    fn from(backend: Arc<B>) -> Self {
        Self::Instance(backend)
    }
}

/// What happens when a lazy tier cannot be constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierPolicy {
    /// Construction failures are fatal to the triggering operation
    #[default]
    Strict,
    /// Construction failures are replaced by an empty `InMemoryCache`
    Lenient,
}

impl TierPolicy {
    #[must_use]
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Lenient }
    }
}

enum Backing {
    Ready(Arc<dyn CacheBackend>),
    Lazy {
        factory: BackendFactory,
        cell: OnceCell<Arc<dyn CacheBackend>>,
    },
}

/// Per-tier counters
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) backfills: AtomicU64,
}

impl TierCounters {
    pub(crate) fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// One tier of a `TieredCache`: a backend source plus its key prefix
pub struct TierBinding {
    index: usize,
    prefix: Vec<u8>,
    policy: TierPolicy,
    backing: Backing,
    pub(crate) counters: TierCounters,
}

impl TierBinding {
    pub(crate) fn new(index: usize, source: TierSource, prefix: Vec<u8>, policy: TierPolicy) -> Self {
        let backing = match source {
            TierSource::Instance(backend) => Backing::Ready(backend),
            TierSource::Factory(factory) => Backing::Lazy {
                factory,
                cell: OnceCell::new(),
            },
        };
        Self {
            index,
            prefix,
            policy,
            backing,
            counters: TierCounters::default(),
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// The backend, if it has been resolved already
    #[must_use]
    pub fn resolved(&self) -> Option<&Arc<dyn CacheBackend>> {
        match &self.backing {
            Backing::Ready(backend) => Some(backend),
            Backing::Lazy { cell, .. } => cell.get(),
        }
    }

    /// Physical key of `key` in this tier
    #[must_use]
    pub fn key(&self, key: &[u8]) -> Vec<u8> {
        [self.prefix.as_slice(), key].concat()
    }

    /// Resolve the backend, constructing it on first use
    ///
    /// # Errors
    ///
    /// `CacheError::TierConstruction` under the strict policy when the
    /// constructor fails or yields a backend that fails its health check.
    /// The binding then stays unresolved.
    pub async fn resolve(&self) -> CacheResult<&Arc<dyn CacheBackend>> {
        match &self.backing {
            Backing::Ready(backend) => Ok(backend),
            Backing::Lazy { factory, cell } => {
                cell.get_or_try_init(|| self.construct(factory)).await
            }
        }
    }

    async fn construct(&self, factory: &BackendFactory) -> CacheResult<Arc<dyn CacheBackend>> {
        let reason = match factory().await {
            Ok(backend) if backend.health_check().await => {
                info!(tier = self.index, backend = backend.name(), "Lazy tier resolved");
                return Ok(backend);
            }
            Ok(backend) => format!(
                "constructed backend '{}' failed its health check",
                backend.name()
            ),
            Err(e) => format!("constructor failed: {e:#}"),
        };

        match self.policy {
            TierPolicy::Strict => Err(CacheError::TierConstruction {
                index: self.index,
                reason,
            }),
            TierPolicy::Lenient => {
                warn!(
                    tier = self.index,
                    reason = %reason,
                    "Lazy tier unavailable, substituting an empty in-memory cache"
                );
                Ok(Arc::new(InMemoryCache::new()))
            }
        }
    }
}

impl fmt::Debug for TierBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierBinding")
            .field("index", &self.index)
            .field("prefix", &String::from_utf8_lossy(&self.prefix))
            .field("policy", &self.policy)
            .field("resolved", &self.resolved().map(|backend| backend.name()))
            .finish_non_exhaustive()
    }
}
