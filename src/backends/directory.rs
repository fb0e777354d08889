//! Directory Cache - On-Disk File-per-Key Backend
//!
//! Persistent cache storing one file per key inside a directory. Several
//! caches can share a directory as long as their cache names differ.
//!
//! File names are `{cache_name}{separator}{sha256(key)}` followed by
//! `.{extension}` when an extension is configured. Hashing the key keeps
//! arbitrary binary keys away from the file system; the full key is stored
//! inside the file and compared on read.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use uuid::Uuid;

use crate::codecs::JsonCodec;
use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheCodec, DefaultTtl, RemainingTtl, Ttl};

/// Hex length of a SHA-256 digest
const DIGEST_HEX_LEN: usize = 64;

/// Configuration for `DirectoryCache`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryCacheConfig {
    /// Directory holding the cache files (created if missing)
    pub directory: PathBuf,
    /// Name prepended to every file of this cache
    pub cache_name: String,
    /// File extension without the dot, may be empty
    pub extension: String,
    /// Separator between cache name and key digest
    pub separator: String,
}

impl Default for DirectoryCacheConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir(),
            cache_name: "TieredCache".to_string(),
            extension: "txt".to_string(),
            separator: "-".to_string(),
        }
    }
}

impl DirectoryCacheConfig {
    /// Config for `cache_name` inside `directory`, default extension and separator
    pub fn new(directory: impl Into<PathBuf>, cache_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            cache_name: cache_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Check cache name, extension and separator
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidConfiguration` describing the first offending field.
    pub fn validate(&self) -> CacheResult<()> {
        let separator = self.separator.as_str();
        if separator.is_empty() {
            return Err(invalid("separator must not be empty"));
        }
        if separator.contains(&['/', '\\', '*'][..]) {
            return Err(invalid(format!("separator '{separator}' contains a path or glob character")));
        }
        if separator.contains('.') && !self.extension.is_empty() {
            return Err(invalid(format!(
                "separator '{separator}' may only contain '.' when no extension is used"
            )));
        }

        if self.cache_name.is_empty() {
            return Err(invalid("cache name must not be empty"));
        }
        if !is_file_name_safe(&self.cache_name) || self.cache_name.contains(separator) {
            return Err(invalid(format!(
                "cache name '{}' must be alphanumeric, '-' or '_' and must not contain the separator",
                self.cache_name
            )));
        }

        if !is_file_name_safe(&self.extension) || self.extension.contains(separator) {
            return Err(invalid(format!(
                "extension '{}' must be alphanumeric, '-' or '_' and must not contain the separator",
                self.extension
            )));
        }
        Ok(())
    }
}

fn is_file_name_safe(part: &str) -> bool {
    part.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn invalid(reason: impl Into<String>) -> CacheError {
    CacheError::InvalidConfiguration(reason.into())
}

/// On-disk entry format
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(with = "serde_bytes")]
    key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    value: Vec<u8>,
    /// Unix time in milliseconds, `None` for entries that never expire
    expires_at_ms: Option<u64>,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|expires_at| now_ms >= expires_at)
    }
}

fn now_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// File-backed cache
///
/// **Use Case**: persistent tier that survives process restarts.
///
/// Writes are atomic per key: the entry is written to a temporary file and
/// renamed into place. I/O failures propagate as `CacheError::Io`.
#[derive(Debug)]
pub struct DirectoryCache {
    config: DirectoryCacheConfig,
    file_prefix: String,
    file_suffix: String,
    default_ttl: DefaultTtl,
    codec: JsonCodec,
}

impl DirectoryCache {
    /// Validate the configuration and create the directory if needed
    ///
    /// # Errors
    ///
    /// `CacheError::InvalidConfiguration` for a bad name, extension or separator,
    /// `CacheError::Io` if the directory cannot be created.
    pub async fn open(config: DirectoryCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.directory).await?;

        info!(
            directory = %config.directory.display(),
            cache_name = %config.cache_name,
            "Directory Cache opened"
        );

        let file_prefix = format!("{}{}", config.cache_name, config.separator);
        let file_suffix = if config.extension.is_empty() {
            String::new()
        } else {
            format!(".{}", config.extension)
        };

        Ok(Self {
            config,
            file_prefix,
            file_suffix,
            default_ttl: DefaultTtl::default(),
            codec: JsonCodec,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DirectoryCacheConfig {
        &self.config
    }

    /// Path of the file holding `key`
    #[must_use]
    pub fn file_path(&self, key: &[u8]) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key));
        self.config
            .directory
            .join(format!("{}{digest}{}", self.file_prefix, self.file_suffix))
    }

    /// Whether a directory entry is a data file of this cache
    fn owns_file(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(&self.file_prefix)
            .and_then(|rest| rest.strip_suffix(&self.file_suffix))
            .is_some_and(|digest| {
                digest.len() == DIGEST_HEX_LEN && digest.chars().all(|c| c.is_ascii_hexdigit())
            })
    }

    async fn read_entry(&self, path: &Path) -> CacheResult<Option<StoredEntry>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => self
                .codec
                .deserialize(&bytes)
                .map(Some)
                .map_err(CacheError::Codec),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(path: &Path) -> CacheResult<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Live entry for `key`, removing the file if it has expired
    async fn live_entry(&self, key: &[u8]) -> CacheResult<Option<StoredEntry>> {
        let path = self.file_path(key);
        let Some(entry) = self.read_entry(&path).await? else {
            return Ok(None);
        };
        if entry.key != key {
            return Ok(None);
        }
        if entry.is_expired(now_ms()) {
            Self::remove_file(&path).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Paths of every data file this cache owns
    async fn owned_files(&self) -> CacheResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.config.directory).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_name().to_str().is_some_and(|name| self.owns_file(name)) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

#[async_trait]
impl CacheBackend for DirectoryCache {
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.live_entry(key).await?.map(|entry| entry.value))
    }

    async fn remaining_ttl(&self, key: &[u8]) -> CacheResult<RemainingTtl> {
        let entry = self
            .live_entry(key)
            .await?
            .ok_or(CacheError::ItemNotInCache)?;
        Ok(match entry.expires_at_ms {
            None => RemainingTtl::Persistent,
            Some(expires_at) => {
                RemainingTtl::Expires(Duration::from_millis(expires_at.saturating_sub(now_ms())))
            }
        })
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Ttl) -> CacheResult<()> {
        let lifetime = self.default_ttl.lifetime(ttl);
        let entry = StoredEntry {
            key: key.to_vec(),
            value: value.to_vec(),
            expires_at_ms: lifetime.map(|ttl| {
                now_ms().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            }),
        };
        let bytes = self.codec.serialize(&entry).map_err(CacheError::Codec)?;

        let path = self.file_path(key);
        let temp_path = self
            .config
            .directory
            .join(format!(".{}{}.tmp", self.file_prefix, Uuid::new_v4()));
        tokio::fs::write(&temp_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(
            file = %path.display(),
            ttl_secs = lifetime.map_or(0, |ttl| ttl.as_secs()),
            "[Directory] Cached key"
        );
        Ok(())
    }

    async fn set_default_ttl(&self, ttl: Ttl) -> CacheResult<()> {
        self.default_ttl.set(ttl);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        Self::remove_file(&self.file_path(key)).await
    }

    async fn flush(&self) -> CacheResult<()> {
        let files = self.owned_files().await?;
        for path in &files {
            Self::remove_file(path).await?;
        }
        debug!(count = files.len(), "[Directory] Flushed cache files");
        Ok(())
    }

    async fn clean(&self) -> CacheResult<()> {
        let now = now_ms();
        let mut removed = 0usize;
        for path in self.owned_files().await? {
            let entry = match self.read_entry(&path).await {
                Ok(Some(entry)) => entry,
                // Undecodable files are left alone
                Ok(None) | Err(CacheError::Codec(_)) => continue,
                Err(e) => return Err(e),
            };
            if entry.is_expired(now) {
                Self::remove_file(&path).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(count = removed, "[Directory] Cleaned up expired entries");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Directory"
    }
}
