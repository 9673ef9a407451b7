//! Public key caching
//!
//! Caches fetched public keys to reduce remote requests. This is the
//! production [`KeyResolver`] behind signature verification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use super::signature::KeyResolver;
use crate::error::AppError;

/// Cached public key entry
#[derive(Debug, Clone)]
struct CachedKey {
    /// PEM-encoded public key
    pem: String,
    /// When this entry was cached
    cached_at: Instant,
    /// TTL for this entry
    ttl: Duration,
}

impl CachedKey {
    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Thread-safe cache for remote actor public keys.
pub struct PublicKeyCache {
    /// Cache storage: key_id -> cached key
    cache: Arc<RwLock<HashMap<String, CachedKey>>>,
    /// HTTP client for fetching keys
    http_client: Arc<reqwest::Client>,
    /// TTL for cached keys
    ttl: Duration,
}

impl PublicKeyCache {
    /// Create a new public key cache
    ///
    /// # Arguments
    /// * `http_client` - HTTP client for fetching keys
    /// * `ttl` - How long fetched keys stay valid
    pub fn new(http_client: Arc<reqwest::Client>, ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            http_client,
            ttl,
        }
    }

    /// Get the public key for a key ID
    ///
    /// Checks the cache first, fetches from the remote actor document
    /// if not cached or expired.
    pub async fn get(&self, key_id: &str) -> Result<String, AppError> {
        // 1. Check cache (read lock)
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(key_id) {
                if cached.is_valid() {
                    tracing::debug!("public key cache hit for {}", key_id);
                    return Ok(cached.pem.clone());
                }
                tracing::debug!("public key cache expired for {}", key_id);
            }
        }

        // 2. Cache miss or expired - fetch from remote
        tracing::debug!("public key cache miss for {}, fetching...", key_id);
        let pem = super::signature::fetch_public_key(key_id, &self.http_client).await?;

        // 3. Update cache (write lock)
        {
            let mut cache = self.cache.write().await;
            cache.insert(
                key_id.to_string(),
                CachedKey {
                    pem: pem.clone(),
                    cached_at: Instant::now(),
                    ttl: self.ttl,
                },
            );
        }

        Ok(pem)
    }

    /// Invalidate a cached key
    ///
    /// Useful when a key is known to be invalid or changed.
    pub async fn invalidate(&self, key_id: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(key_id);
        tracing::debug!("invalidated public key cache for {}", key_id);
    }

    /// Prune expired entries
    ///
    /// Should be called periodically to clean up expired entries.
    pub async fn prune_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, v| v.is_valid());
        let removed = before - cache.len();

        if removed > 0 {
            tracing::info!("pruned {} expired public key cache entries", removed);
        }
    }

    #[cfg(test)]
    async fn insert_for_test(&self, key_id: &str, pem: &str, ttl: Duration) {
        let mut cache = self.cache.write().await;
        cache.insert(
            key_id.to_string(),
            CachedKey {
                pem: pem.to_string(),
                cached_at: Instant::now(),
                ttl,
            },
        );
    }
}

impl KeyResolver for PublicKeyCache {
    fn resolve<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<String, AppError>> {
        Box::pin(self.get(key_id))
    }
}
