//! Remote object fetching
//!
//! Fetches and caches remote actor/object representations by URI. Cache
//! rows carry a fetch status and timestamp; a fresh `found` entry
//! short-circuits the network call, and a `gone` entry is durable and
//! surfaces as tombstone-equivalent forever.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;

use crate::data::{Database, FetchStatus, RemoteCacheEntry};
use crate::error::{AppError, FetchFailure};

/// Remote object fetcher with a database-backed cache.
///
/// Reads of a stale-but-present entry never block on a concurrent
/// refresh; each call decides independently whether to hit the network.
pub struct RemoteFetcher {
    db: Arc<Database>,
    http_client: Arc<reqwest::Client>,
    /// How long a `found` entry short-circuits refetching
    freshness: Duration,
}

impl RemoteFetcher {
    pub fn new(db: Arc<Database>, http_client: Arc<reqwest::Client>, freshness_secs: i64) -> Self {
        Self {
            db,
            http_client,
            freshness: Duration::seconds(freshness_secs),
        }
    }

    /// Fetch the representation of a remote URI.
    ///
    /// # Errors
    /// - `Fetch(NotFound)` - the remote reported 404 (retryable later)
    /// - `Fetch(Gone)` - durable; the caller should treat the object as
    ///   tombstoned and never retry
    /// - `Fetch(RemoteError)` - network or malformed-response failure;
    ///   the caller decides whether to fail the current activity or
    ///   retry later
    pub async fn fetch(&self, uri: &str) -> Result<Value, AppError> {
        // 1. Consult the cache.
        if let Some(entry) = self.db.cache_get(uri).await? {
            match entry.status {
                FetchStatus::Gone => return Err(FetchFailure::Gone.into()),
                FetchStatus::Found => {
                    let fresh = Utc::now() - entry.fetched_at < self.freshness;
                    if fresh {
                        if let Some(document) = entry.document {
                            tracing::debug!(uri, "remote cache hit");
                            return Ok(document);
                        }
                    }
                    tracing::debug!(uri, "remote cache entry stale, refetching");
                }
                // pending/not_found/error entries are all retryable
                _ => {}
            }
        }

        // 2. Record that a fetch is underway.
        self.record(uri, FetchStatus::Pending, None).await?;

        // 3. Hit the network.
        let response = self
            .http_client
            .get(uri)
            .header("Accept", "application/activity+json")
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(uri, %error, "remote fetch failed");
                self.record(uri, FetchStatus::Error, None).await?;
                return Err(FetchFailure::RemoteError(error.to_string()).into());
            }
        };

        match response.status().as_u16() {
            404 => {
                tracing::info!(uri, "remote object not found");
                self.record(uri, FetchStatus::NotFound, None).await?;
                Err(FetchFailure::NotFound.into())
            }
            410 => {
                tracing::info!(uri, "remote object gone; tombstoning durably");
                self.db.cache_mark_gone(uri).await?;
                Err(FetchFailure::Gone.into())
            }
            status if !response.status().is_success() => {
                tracing::warn!(uri, status, "remote fetch returned unexpected status");
                self.record(uri, FetchStatus::Error, None).await?;
                Err(FetchFailure::RemoteError(format!("HTTP {}", status)).into())
            }
            _ => match response.json::<Value>().await {
                Ok(document) => {
                    self.record(uri, FetchStatus::Found, Some(document.clone()))
                        .await?;
                    Ok(document)
                }
                Err(error) => {
                    tracing::warn!(uri, %error, "remote response was not JSON");
                    self.record(uri, FetchStatus::Error, None).await?;
                    Err(FetchFailure::RemoteError(error.to_string()).into())
                }
            },
        }
    }

    async fn record(
        &self,
        uri: &str,
        status: FetchStatus,
        document: Option<Value>,
    ) -> Result<(), AppError> {
        self.db
            .cache_put(&RemoteCacheEntry {
                uri: uri.to_string(),
                status,
                fetched_at: Utc::now(),
                document,
            })
            .await
    }
}
