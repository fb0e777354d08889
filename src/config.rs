//! Tiered Cache Configuration
//!
//! Serde-deserializable description of a cascade, turned into a
//! `TieredCache` by [`TieredCacheBuilder::from_config`](crate::TieredCacheBuilder::from_config).
//!
//! ```json
//! {
//!   "strict": false,
//!   "default_ttl_secs": 300,
//!   "tiers": [
//!     { "backend": "moka", "options": { "max_capacity": 10000 } },
//!     { "backend": "directory", "prefix": "v1:",
//!       "options": { "directory": "/var/cache/app", "cache_name": "app" } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CacheError, CacheResult};
use crate::traits::Ttl;

fn default_strict() -> bool {
    true
}

/// Whole-cascade configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredCacheConfig {
    /// Strict (`true`, default) or lenient handling of tier construction failures
    #[serde(default = "default_strict")]
    pub strict: bool,
    /// Default TTL fanned out to every tier at build time (`0` never, negative ignored)
    #[serde(default)]
    pub default_ttl_secs: Option<i64>,
    /// Tiers in lookup order
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            strict: true,
            default_ttl_secs: None,
            tiers: Vec::new(),
        }
    }
}

/// One tier entry: a registered backend name, a key prefix and backend options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Registered backend name (`memory`, `directory`, `moka`, `redis` or custom)
    pub backend: String,
    #[serde(default)]
    pub prefix: String,
    /// Backend-specific options, `null` for the backend's defaults
    #[serde(default)]
    pub options: serde_json::Value,
}

impl TierConfig {
    #[must_use]
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            prefix: String::new(),
            options: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

impl TieredCacheConfig {
    /// Parse a JSON document
    ///
    /// # Errors
    ///
    /// `CacheError::InvalidConfiguration` if the document does not describe a cascade.
    pub fn from_json_str(json: &str) -> CacheResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CacheError::InvalidConfiguration(format!("malformed cache config: {e}")))
    }

    /// Read and parse a JSON file
    ///
    /// # Errors
    ///
    /// `CacheError::Io` if the file cannot be read, otherwise as [`Self::from_json_str`].
    pub async fn from_json_file(path: impl AsRef<Path>) -> CacheResult<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&json)
    }

    /// Configured default TTL, if any
    #[must_use]
    pub fn default_ttl(&self) -> Option<Ttl> {
        self.default_ttl_secs.map(Ttl::from)
    }
}
