//! Read-through cache with TTL
//!
//! The cache is strictly a performance optimization, never a
//! correctness dependency: every backend failure is logged and
//! swallowed, and the caller falls through to the uncached path.
//! Writes after a miss are fire-and-forget so a slow cache never
//! delays a response.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::{BillingError, BillingResult};

/// Cache TTLs in seconds.
pub mod ttl {
    /// 1 minute - for frequently changing data
    pub const SHORT: u64 = 60;
    /// 5 minutes - for semi-static data
    pub const MEDIUM: u64 = 300;
    /// 30 minutes - for static data
    pub const LONG: u64 = 1800;
    /// 1 hour - for rarely changing data
    pub const VERY_LONG: u64 = 3600;
}

/// Cache key prefixes.
pub mod keys {
    pub const BILLING_HISTORY: &str = "billing:history";
    pub const SESSIONS: &str = "sessions";
    pub const MENTORS: &str = "mentors";
    pub const USER_PROFILE: &str = "user";
}

/// Build a cache key with consistent `prefix:part:part` naming.
pub fn cache_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

#[derive(Debug, Error)]
#[error("cache backend error: {0}")]
pub struct CacheBackendError(String);

impl From<redis::RedisError> for CacheBackendError {
    fn from(e: redis::RedisError) -> Self {
        CacheBackendError(e.to_string())
    }
}

/// Key-value store with TTL and pattern-based key listing.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64)
        -> Result<(), CacheBackendError>;
    async fn set_many(
        &self,
        entries: &[(String, String, u64)],
    ) -> Result<(), CacheBackendError>;
    async fn del(&self, keys: &[String]) -> Result<u64, CacheBackendError>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheBackendError>;
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheBackendError>;
}

/// Redis-backed cache using a multiplexed connection manager.
pub struct RedisBackend {
    conn: redis::aio::ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheBackendError> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), CacheBackendError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn set_many(
        &self,
        entries: &[(String, String, u64)],
    ) -> Result<(), CacheBackendError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (key, value, ttl_seconds) in entries {
            pipe.set_ex(key, value, *ttl_seconds).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheBackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys).await?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheBackendError> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheBackendError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.conn.clone();
        Ok(conn.get(keys).await?)
    }
}

/// In-memory cache backend for tests and cache-disabled deployments.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob match supporting `*` wildcards, enough for `prefix:*` patterns.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => {
                Ok(Some(value.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), CacheBackendError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            (
                value.to_string(),
                Instant::now() + Duration::from_secs(ttl_seconds),
            ),
        );
        Ok(())
    }

    async fn set_many(
        &self,
        batch: &[(String, String, u64)],
    ) -> Result<(), CacheBackendError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        for (key, value, ttl_seconds) in batch {
            entries.insert(
                key.clone(),
                (value.clone(), now + Duration::from_secs(*ttl_seconds)),
            );
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheBackendError> {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheBackendError> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(key, (_, expires_at))| *expires_at > now && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheBackendError> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.get(key).await?);
        }
        Ok(results)
    }
}

/// Read-through cache service.
///
/// Cloneable; all clones share the same backend.
#[derive(Clone)]
pub struct CacheService {
    backend: Option<Arc<dyn CacheBackend>>,
}

impl CacheService {
    /// Connect to Redis. Connection failure disables caching rather
    /// than failing startup.
    pub async fn redis(redis_url: &str) -> Self {
        match RedisBackend::connect(redis_url).await {
            Ok(backend) => {
                tracing::info!("Redis cache connected");
                Self {
                    backend: Some(Arc::new(backend)),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable - caching disabled");
                Self { backend: None }
            }
        }
    }

    pub fn new_in_memory() -> Self {
        Self {
            backend: Some(Arc::new(MemoryBackend::new())),
        }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Read-through fetch: return the cached value for `key` if one
    /// exists, otherwise run `fetch`, return its result, and persist it
    /// fire-and-forget under `key` with the given TTL.
    pub async fn with_cache<T, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        fetch: F,
    ) -> BillingResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = BillingResult<T>>,
    {
        let backend = match &self.backend {
            Some(backend) => backend.clone(),
            None => return fetch().await,
        };

        match backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    tracing::debug!(key = %key, "cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    // Corrupt entry: treat as a miss and overwrite below.
                    tracing::warn!(key = %key, error = %e, "cache entry failed to deserialize");
                }
            },
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
            }
            Err(e) => {
                // Backend unreachable: skip the write too.
                tracing::warn!(key = %key, error = %e, "cache read failed - falling through");
                return fetch().await;
            }
        }

        let value = fetch().await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                let key = key.to_string();
                tokio::spawn(async move {
                    if let Err(e) = backend.set_ex(&key, &raw, ttl_seconds).await {
                        tracing::warn!(key = %key, error = %e, "cache write failed");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache value failed to serialize");
            }
        }

        Ok(value)
    }

    /// Delete an exact key, or every key matching a `*` pattern.
    /// A pattern matching zero keys is not an error.
    pub async fn invalidate(&self, key_or_pattern: &str) -> BillingResult<()> {
        let backend = match &self.backend {
            Some(backend) => backend,
            None => return Ok(()),
        };

        let result = if key_or_pattern.contains('*') {
            match backend.keys(key_or_pattern).await {
                Ok(matched) => backend.del(&matched).await,
                Err(e) => Err(e),
            }
        } else {
            backend.del(&[key_or_pattern.to_string()]).await
        };

        match result {
            Ok(removed) => {
                tracing::debug!(pattern = %key_or_pattern, removed = removed, "cache invalidated");
            }
            Err(e) => {
                tracing::warn!(pattern = %key_or_pattern, error = %e, "cache invalidation failed");
            }
        }
        Ok(())
    }

    /// Batch read. Backend failure yields all-`None`, never an error.
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let backend = match &self.backend {
            Some(backend) => backend,
            None => return keys.iter().map(|_| None).collect(),
        };

        match backend.mget(keys).await {
            Ok(raw_values) => raw_values
                .into_iter()
                .map(|raw| raw.and_then(|r| serde_json::from_str(&r).ok()))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "cache mget failed");
                keys.iter().map(|_| None).collect()
            }
        }
    }

    /// Batch write via the backend pipeline. Failures are logged.
    pub async fn mset<T: Serialize>(&self, entries: &[(String, T, u64)]) -> BillingResult<()> {
        let backend = match &self.backend {
            Some(backend) => backend,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(entries.len());
        for (key, value, ttl_seconds) in entries {
            let raw = serde_json::to_string(value)
                .map_err(|e| BillingError::Internal(format!("cache serialize: {e}")))?;
            batch.push((key.clone(), raw, *ttl_seconds));
        }

        if let Err(e) = backend.set_many(&batch).await {
            tracing::warn!(error = %e, count = batch.len(), "cache mset failed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cache_key_builder() {
        assert_eq!(
            cache_key(keys::BILLING_HISTORY, &["user@example.com"]),
            "billing:history:user@example.com"
        );
        assert_eq!(cache_key("sessions", &["u1", "page2"]), "sessions:u1:page2");
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("billing:history:*", "billing:history:a@b.com"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("billing:history:*", "sessions:u1"));
        assert!(glob_match("*:u1", "sessions:u1"));
    }

    #[tokio::test]
    async fn test_with_cache_invokes_fetch_once_within_ttl() {
        let cache = CacheService::new_in_memory();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let value: String = cache
                .with_cache("k", ttl::MEDIUM, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("fresh".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "fresh");
            // Give the fire-and-forget write a moment to land.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidation_guarantees_next_miss() {
        let cache = CacheService::new_in_memory();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let _: u32 = cache
                .with_cache("counter", ttl::SHORT, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.invalidate("counter").await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pattern_invalidation_and_zero_matches_ok() {
        let cache = CacheService::new_in_memory();
        let _: u32 = cache
            .with_cache("billing:history:a@b.com", ttl::SHORT, || async { Ok(1) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        cache.invalidate("billing:history:*").await.unwrap();
        // Pattern with no matches must also succeed.
        cache.invalidate("billing:history:*").await.unwrap();

        let refetched: u32 = cache
            .with_cache("billing:history:a@b.com", ttl::SHORT, || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(refetched, 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_fetches() {
        let cache = CacheService::disabled();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let _: u32 = cache
                .with_cache("k", ttl::LONG, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_memory_backend_ttl_expiry() {
        let backend = MemoryBackend::new();
        backend.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mget_mset_roundtrip() {
        let cache = CacheService::new_in_memory();
        cache
            .mset(&[
                ("a".to_string(), 1u32, ttl::SHORT),
                ("b".to_string(), 2u32, ttl::SHORT),
            ])
            .await
            .unwrap();

        let values: Vec<Option<u32>> = cache
            .mget(&["a".to_string(), "missing".to_string(), "b".to_string()])
            .await;
        assert_eq!(values, vec![Some(1), None, Some(2)]);
    }
}
