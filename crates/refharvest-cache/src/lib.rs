#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-cache** – Namespace-keyed short-term cache for raw
//! third-party payloads.
//!
//! Harvester adapters issue deterministic `GET`s against slow-changing
//! external APIs (SPARQL endpoints, REST catalogues). This crate lets an
//! adapter memoise such a response between runs without committing to a
//! concrete store: the trait is namespace-keyed so each adapter (or even
//! each field of a multi-source adapter, e.g. IdRef's SUDOC enrichment)
//! gets its own eviction horizon, configured independently.
//!
//! Values are opaque bytes - this crate has no opinion on the payload
//! format a harvester chooses to cache (raw XML/RDF bytes, a serialised
//! JSON document, ...).

use std::time::Duration;

use async_trait::async_trait;

/// Errors raised by a cache backend. Callers treat every variant the same
/// way a cache miss would be treated: log and fall through to the live
/// fetch. A caching outage must never fail a harvesting.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend connection could not be established or was lost.
    #[error("cache backend unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// Convenience alias for fallible cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// The namespace-keyed key/value contract every cache backend satisfies.
///
/// `namespace` groups keys that share a TTL policy (e.g. one namespace per
/// harvester, or per external sub-source within a harvester); `key` is the
/// opaque identifier of the cached payload within that namespace (typically
/// the upstream request URL or a hash of its parameters).
#[async_trait]
pub trait ThirdPartyCache: Send + Sync {
    /// Look up a cached payload. Returns `Ok(None)` on a cache miss - this
    /// is the common case and is not an error.
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a payload under `(namespace, key)`, expiring after `ttl`.
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;
}

/// A Redis-backed `ThirdPartyCache`, namespacing keys with a `"<ns>:"`
/// prefix so every adapter shares one Redis database without key
/// collisions.
#[derive(Clone)]
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    /// Connect to `redis_url`, establishing the managed connection used for
    /// every subsequent `get`/`set` (it reconnects transparently on
    /// transient network failure).
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }

    fn namespaced_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }
}

#[async_trait]
impl ThirdPartyCache for RedisCache {
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<Vec<u8>>> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn
            .get(Self::namespaced_key(namespace, key))
            .await
            .map_err(|e| CacheError::Unavailable(e.into()))?;
        Ok(value)
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(Self::namespaced_key(namespace, key), value, seconds)
            .await
            .map_err(|e| CacheError::Unavailable(e.into()))?;
        Ok(())
    }
}

/// An in-memory `ThirdPartyCache` used as a test double - it does not honour
/// `ttl` (entries never expire), which is fine for the unit tests that use
/// it since none run long enough to observe eviction.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: dashmap::DashMap<(String, String), Vec<u8>>,
}

impl InMemoryCache {
    /// Create a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThirdPartyCache for InMemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|v| v.clone()))
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        self.entries.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_then_hit_round_trips_bytes() {
        let cache = InMemoryCache::new();
        assert!(cache.get("hal", "doc-1").await.unwrap().is_none());
        cache
            .set("hal", "doc-1", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("hal", "doc-1").await.unwrap(), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let cache = InMemoryCache::new();
        cache
            .set("hal", "k", b"a".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("idref", "k", b"b".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("hal", "k").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(cache.get("idref", "k").await.unwrap(), Some(b"b".to_vec()));
    }
}
