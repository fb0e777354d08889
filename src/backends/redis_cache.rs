//! Redis Cache - Remote Cache Backend
//!
//! Redis-based cache for a shared, remote tier. Keys may be confined to a
//! namespace so several caches can share one Redis database; `flush` then only
//! removes keys of that namespace.

use anyhow::Context;
use redis::Client;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::traits::{DefaultTtl, RemainingTtl, Ttl};

/// Largest `PX` Redis accepts once added to the current Unix time
const MAX_EXPIRE_MILLIS: u64 = i64::MAX.unsigned_abs() / 2;

/// Configuration for `RedisCache`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Redis connection string, falls back to `REDIS_URL` then `redis://127.0.0.1:6379`
    pub url: Option<String>,
    /// Prepended to every key; empty means the whole database
    pub namespace: String,
}

impl RedisCacheConfig {
    /// Connection string after applying the environment fallback
    #[must_use]
    pub fn resolved_url(&self) -> String {
        self.url.clone().unwrap_or_else(|| {
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
        })
    }
}

/// Redis cache with `ConnectionManager` for automatic reconnection
///
/// - Remote storage shared across processes
/// - TTL introspection through `PTTL`, used for tier backfill
/// - Expiry handled by Redis itself, so `clean` is a no-op
pub struct RedisCache {
    /// Redis connection manager - handles reconnection automatically
    conn_manager: ConnectionManager,
    namespace: Vec<u8>,
    default_ttl: DefaultTtl,
}

impl RedisCache {
    /// Connect using `REDIS_URL` (default `redis://127.0.0.1:6379`) and no namespace
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_config(RedisCacheConfig::default()).await
    }

    /// Connect with an explicit configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn with_config(config: RedisCacheConfig) -> anyhow::Result<Self> {
        let redis_url = config.resolved_url();
        info!(redis_url = %redis_url, "Initializing Redis Cache with ConnectionManager");

        let client = Client::open(redis_url.as_str())
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection manager")?;

        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING health check failed")?;

        info!(redis_url = %redis_url, "Redis Cache connected successfully (ConnectionManager enabled)");

        Ok(Self {
            conn_manager,
            namespace: config.namespace.into_bytes(),
            default_ttl: DefaultTtl::default(),
        })
    }

    fn namespaced(&self, key: &[u8]) -> Vec<u8> {
        [self.namespace.as_slice(), key].concat()
    }

    /// Scan keys under this cache's namespace
    ///
    /// Uses the cursor-based `SCAN` command, which is safe for production use
    /// unlike `KEYS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis command fails.
    pub async fn scan_keys(&self) -> CacheResult<Vec<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        let mut pattern = glob_escape(&self.namespace);
        pattern.push(b'*');

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern.as_slice())
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .context("Redis SCAN failed")?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(count = keys.len(), "[Redis] Scanned namespace keys");
        Ok(keys)
    }

    /// Remove multiple keys at once, returning how many existed
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis command fails.
    pub async fn remove_bulk(&self, keys: &[Vec<u8>]) -> CacheResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn_manager.clone();
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key.as_slice());
        }
        let count: usize = cmd
            .query_async(&mut conn)
            .await
            .context("Redis DEL failed")?;
        debug!(count = count, "[Redis] Removed keys in bulk");
        Ok(count)
    }
}

/// Escape Redis glob metacharacters so the namespace matches literally
fn glob_escape(raw: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(raw.len());
    for &byte in raw {
        if matches!(byte, b'*' | b'?' | b'[' | b']' | b'\\') {
            escaped.push(b'\\');
        }
        escaped.push(byte);
    }
    escaped
}

// ===== Trait Implementations =====

use crate::traits::CacheBackend;
use async_trait::async_trait;

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();

        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .context("Redis GET failed")?;
        Ok(value)
    }

    async fn remaining_ttl(&self, key: &[u8]) -> CacheResult<RemainingTtl> {
        let mut conn = self.conn_manager.clone();

        // PTTL: -2 = key doesn't exist, -1 = no expiry
        let pttl: i64 = redis::cmd("PTTL")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .context("Redis PTTL failed")?;

        match pttl {
            -2 => Err(CacheError::ItemNotInCache),
            -1 => Ok(RemainingTtl::Persistent),
            millis if millis > 0 => Ok(RemainingTtl::Expires(Duration::from_millis(
                millis.unsigned_abs(),
            ))),
            _ => Err(CacheError::ItemNotInCache),
        }
    }

    async fn is_in_cache(&self, key: &[u8]) -> CacheResult<bool> {
        let mut conn = self.conn_manager.clone();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .context("Redis EXISTS failed")?;
        Ok(exists > 0)
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Ttl) -> CacheResult<()> {
        let mut conn = self.conn_manager.clone();
        let lifetime = self.default_ttl.lifetime(ttl);

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.namespaced(key)).arg(value);
        // Redis rejects expiry times past its own range; those keys never expire
        if let Some(millis) = lifetime
            .and_then(|ttl| u64::try_from(ttl.as_millis()).ok())
            .filter(|millis| *millis <= MAX_EXPIRE_MILLIS)
        {
            cmd.arg("PX").arg(millis.max(1));
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .context("Redis SET failed")?;

        debug!(
            key_len = key.len(),
            ttl_secs = lifetime.map_or(0, |ttl| ttl.as_secs()),
            "[Redis] Cached key"
        );
        Ok(())
    }

    async fn set_default_ttl(&self, ttl: Ttl) -> CacheResult<()> {
        self.default_ttl.set(ttl);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .context("Redis DEL failed")?;
        Ok(())
    }

    async fn flush(&self) -> CacheResult<()> {
        let keys = self.scan_keys().await?;
        self.remove_bulk(&keys).await?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn_manager.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}
