//! Shared helpers for integration tests
//!
//! Spins up a full federation state against a throwaway SQLite file,
//! with a static key resolver in place of network key fetches.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use tempfile::TempDir;

use bellhop::FederationState;
use bellhop::config::{
    AppConfig, DatabaseConfig, FederationConfig, LoggingConfig, ServerConfig,
};
use bellhop::error::{AppError, FetchFailure};
use bellhop::federation::{Ingested, IngestionPipeline, KeyResolver, sign_request};

pub const TEST_DOMAIN: &str = "testserver.example";

/// Key resolver backed by a mutable static map.
///
/// Keys absent from the map resolve like a retryable fetch failure, so
/// tests can exercise envelope parking by registering the key later.
#[derive(Default)]
pub struct StaticKeys {
    keys: Mutex<HashMap<String, String>>,
}

impl StaticKeys {
    pub fn register(&self, key_id: &str, public_key_pem: &str) {
        self.keys
            .lock()
            .unwrap()
            .insert(key_id.to_string(), public_key_pem.to_string());
    }
}

impl KeyResolver for StaticKeys {
    fn resolve<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<String, AppError>> {
        Box::pin(async move {
            self.keys.lock().unwrap().get(key_id).cloned().ok_or_else(|| {
                AppError::Fetch(FetchFailure::RemoteError(
                    "key not yet available".to_string(),
                ))
            })
        })
    }
}

/// A remote actor with its own signing key pair.
pub struct RemoteActor {
    pub uri: String,
    pub key_id: String,
    pub private_key_pem: String,
    pub public_key_pem: String,
}

impl RemoteActor {
    /// Generate an actor at `https://{domain}/users/{name}`.
    pub fn generate(domain: &str, name: &str) -> Self {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
        use rsa::{RsaPrivateKey, RsaPublicKey};

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
        let public_key = RsaPublicKey::from(&private_key);

        let uri = format!("https://{}/users/{}", domain, name);
        Self {
            key_id: format!("{}#main-key", uri),
            uri,
            private_key_pem: private_key
                .to_pkcs8_pem(LineEnding::LF)
                .expect("private key pem")
                .to_string(),
            public_key_pem: public_key
                .to_public_key_pem(LineEnding::LF)
                .expect("public key pem"),
        }
    }
}

/// A complete engine over a throwaway database, plus an ingestion
/// pipeline wired to the static key resolver.
pub struct TestInstance {
    pub state: FederationState,
    pub keys: Arc<StaticKeys>,
    pub pipeline: IngestionPipeline,
    _tmp: TempDir,
}

pub fn test_config(db_path: PathBuf) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            domain: TEST_DOMAIN.to_string(),
            protocol: "https".to_string(),
        },
        database: DatabaseConfig { path: db_path },
        federation: FederationConfig {
            page_size: 50,
            max_date_skew_secs: 300,
            fetch_freshness_secs: 3600,
            key_cache_ttl_secs: 3600,
            deliver_concurrency: 10,
            deliver_timeout_secs: 5,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

pub async fn instance() -> TestInstance {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path().join("bellhop-test.db"));

    let state = FederationState::new(config).await.expect("state should build");

    let keys = Arc::new(StaticKeys::default());
    let pipeline = IngestionPipeline::new(
        state.db.clone(),
        state.engine.clone(),
        keys.clone(),
        state.config.federation.max_date_skew_secs,
    );

    TestInstance {
        state,
        keys,
        pipeline,
        _tmp: tmp,
    }
}

impl TestInstance {
    /// Register a remote actor's key so its signatures verify.
    pub fn trust(&self, actor: &RemoteActor) {
        self.keys.register(&actor.key_id, &actor.public_key_pem);
    }

    /// Sign and ingest an activity as `actor` into the shared inbox.
    pub async fn ingest_signed(
        &self,
        actor: &RemoteActor,
        activity: &Value,
    ) -> Result<Ingested, AppError> {
        let path = "/inbox";
        let (headers, body) = signed_post(actor, path, activity);
        self.pipeline.receive("POST", path, &headers, &body).await
    }

    pub fn actor_url(&self, username: &str) -> String {
        self.state.config.server.actor_url(username)
    }
}

/// Build the signed header map and body for an inbox POST.
pub fn signed_post(actor: &RemoteActor, path: &str, activity: &Value) -> (http::HeaderMap, Vec<u8>) {
    let body = serde_json::to_vec(activity).expect("activity should serialize");
    let url = format!("https://{}{}", TEST_DOMAIN, path);

    let signed = sign_request(
        "POST",
        &url,
        Some(&body),
        &actor.private_key_pem,
        &actor.key_id,
    )
    .expect("signing should work");

    let mut headers = http::HeaderMap::new();
    headers.insert("host", http::HeaderValue::from_static(TEST_DOMAIN));
    headers.insert(
        "content-type",
        http::HeaderValue::from_static("application/activity+json"),
    );
    headers.insert(
        "date",
        http::HeaderValue::from_str(&signed.date).expect("date header"),
    );
    if let Some(digest) = signed.digest {
        headers.insert(
            "digest",
            http::HeaderValue::from_str(&digest).expect("digest header"),
        );
    }
    headers.insert(
        "signature",
        http::HeaderValue::from_str(&signed.signature).expect("signature header"),
    );

    (headers, body)
}
