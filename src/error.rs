//! Cache Errors
//!
//! Absence of an item is an expected outcome and is usually expressed as
//! `Ok(None)`. [`CacheError::ItemNotInCache`] exists for the call sites that
//! want absence as an error (`fetch`, `remaining_ttl`).

use thiserror::Error;

/// Result alias used throughout the crate
pub type CacheResult<T> = Result<T, CacheError>;

/// Error taxonomy for cache backends and the tiered cascade
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key absent, deleted or expired
    #[error("item not in cache")]
    ItemNotInCache,

    /// Structurally invalid configuration, rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A lazy tier could not be constructed (strict policy only)
    #[error("tier {index} could not be constructed: {reason}")]
    TierConstruction { index: usize, reason: String },

    /// A cache handle was asked for its backend before one was set
    #[error("no cache backend available")]
    NoBackend,

    /// Value could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[source] anyhow::Error),

    /// Read-through compute function failed
    #[error("compute function failed: {0}")]
    Compute(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend-specific failure, propagated unchanged
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl CacheError {
    /// `true` for the expected "not in cache" outcome
    #[must_use]
    pub fn is_not_in_cache(&self) -> bool {
        matches!(self, Self::ItemNotInCache)
    }
}
