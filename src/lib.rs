//! Bellhop - an embeddable ActivityPub federation engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Embedding application (not Bellhop)             │
//! │  - HTTP routing, auth, client API, admin tools              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - Ingestion pipeline (verify → archive → side effects)     │
//! │  - Delivery dispatcher (audience fan-out)                   │
//! │  - Collection serialization                                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Dynamic object store (SQLite via sqlx)                   │
//! │  - Follow tracker, envelopes, remote fetch cache            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `federation`: ingestion, delivery, signatures, collections
//! - `data`: the object store and its relations
//! - `config`: configuration management
//! - `error`: error types
//! - `logging`: tracing setup for embedders

pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod logging;

use std::sync::Arc;

/// Everything the embedding server needs, wired together once.
///
/// This struct is cheap to clone and contains shared resources: the
/// database pool, the HTTP client, caches, and the federation
/// components layered on top of them.
#[derive(Clone)]
pub struct FederationState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database (object store, follow tracker, caches)
    pub db: Arc<data::Database>,

    /// Remote object fetcher/cache
    pub fetcher: Arc<federation::RemoteFetcher>,

    /// Public key cache backing signature verification
    pub keys: Arc<federation::PublicKeyCache>,

    /// Side-effect engine
    pub engine: Arc<federation::SideEffects>,

    /// Outbound delivery dispatcher
    pub delivery: Arc<federation::DeliveryDispatcher>,

    /// Inbound ingestion pipeline
    pub ingest: Arc<federation::IngestionPipeline>,

    /// Collection page renderer
    pub pager: federation::CollectionPager,

    /// HTTP client for federation
    pub http_client: Arc<reqwest::Client>,
}

impl FederationState {
    /// Initialize the engine.
    ///
    /// # Steps
    /// 1. Connect to the SQLite database
    /// 2. Build the shared HTTP client
    /// 3. Layer fetcher, key cache, engine, delivery, and ingestion
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing federation state...");

        // 1. Connect to the database
        let db = Arc::new(
            data::Database::connect(&config.database.path, config.server.clone()).await?,
        );
        tracing::info!("Database connected");

        // 2. Shared HTTP client
        let http_client = Arc::new(
            reqwest::Client::builder()
                .user_agent(concat!("Bellhop/", env!("CARGO_PKG_VERSION")))
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .map_err(|e| error::AppError::Internal(e.into()))?,
        );

        // 3. Federation components, leaf to root
        let fetcher = Arc::new(federation::RemoteFetcher::new(
            db.clone(),
            http_client.clone(),
            config.federation.fetch_freshness_secs,
        ));

        let keys = Arc::new(federation::PublicKeyCache::new(
            http_client.clone(),
            std::time::Duration::from_secs(config.federation.key_cache_ttl_secs),
        ));

        let engine = Arc::new(federation::SideEffects::new(db.clone(), fetcher.clone()));

        let delivery = Arc::new(federation::DeliveryDispatcher::new(
            db.clone(),
            fetcher.clone(),
            http_client.clone(),
            config.federation.deliver_concurrency,
            config.federation.deliver_timeout_secs,
        ));

        let ingest = Arc::new(federation::IngestionPipeline::new(
            db.clone(),
            engine.clone(),
            keys.clone(),
            config.federation.max_date_skew_secs,
        ));

        let pager = federation::CollectionPager::new(config.federation.page_size);

        tracing::info!("Federation state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            fetcher,
            keys,
            engine,
            delivery,
            ingest,
            pager,
            http_client,
        })
    }
}
