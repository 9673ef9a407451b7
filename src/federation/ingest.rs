//! Inbound ingestion
//!
//! The externally facing entry point for federation traffic. The
//! embedding HTTP layer hands `POST /inbox` requests here and answers
//! 2xx whenever the request was accepted for processing, even when the
//! side effects later turn out to be a no-op.
//!
//! Pipeline: verify the signature → archive the raw envelope → parse
//! into a stored object → run the side-effect engine. When the signing
//! key itself must be fetched and the fetch fails retryably, the
//! envelope is parked and re-validated later via
//! [`IngestionPipeline::retry_waiting`].

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::engine::{Outcome, SideEffects};
use super::signature::{self, KeyResolver};
use crate::data::{Database, EntityId, IncomingMessage, ShortId, Thing};
use crate::error::{AppError, FetchFailure};

/// What became of an accepted inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    /// Stored and side effects applied
    Applied { number: ShortId },
    /// Accepted at the transport layer, then dropped as malformed;
    /// nothing further is owed to the sender
    Dropped,
    /// Signature validation deferred until the signing key can be
    /// fetched; the envelope is parked
    Parked { envelope_id: String },
}

/// The inbound ingestion pipeline.
pub struct IngestionPipeline {
    db: Arc<Database>,
    engine: Arc<SideEffects>,
    keys: Arc<dyn KeyResolver>,
    max_date_skew_secs: i64,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<Database>,
        engine: Arc<SideEffects>,
        keys: Arc<dyn KeyResolver>,
        max_date_skew_secs: i64,
    ) -> Self {
        Self {
            db,
            engine,
            keys,
            max_date_skew_secs,
        }
    }

    /// Receive a signed inbox request.
    ///
    /// # Arguments
    /// * `method` - HTTP method (inboxes only accept POST)
    /// * `path` - Request path (per-actor inbox or shared inbox)
    /// * `headers` - All request headers
    /// * `body` - Raw request body
    ///
    /// # Errors
    /// - `SignatureInvalid` - the caller must answer 401/403 and must
    ///   not process the activity
    /// - `Validation` - structurally invalid JSON; answer 400
    pub async fn receive(
        &self,
        method: &str,
        path: &str,
        headers: &http::HeaderMap,
        body: &[u8],
    ) -> Result<Ingested, AppError> {
        // 1. Archive the raw envelope before doing anything else.
        let envelope = envelope_from_request(headers, path, body);
        self.db.store_envelope(&envelope).await?;

        // 2. Verify the signature; a retryable key-fetch failure parks
        //    the envelope instead of rejecting it.
        let actor = match signature::verify_request(
            method,
            path,
            headers,
            Some(body),
            self.keys.as_ref(),
            self.max_date_skew_secs,
        )
        .await
        {
            Ok(actor) => actor,
            Err(AppError::Fetch(FetchFailure::RemoteError(reason))) => {
                let key_id = signature::extract_signature_key_id(headers)?;
                tracing::info!(envelope = %envelope.id, key_id = %key_id, reason = %reason,
                    "signing key not yet fetchable; parking envelope");
                self.db.park_envelope(&envelope.id, &key_id).await?;
                return Ok(Ingested::Parked {
                    envelope_id: envelope.id,
                });
            }
            Err(AppError::Fetch(_)) => {
                return Err(AppError::SignatureInvalid(
                    "signing key unresolvable".to_string(),
                ));
            }
            Err(error) => return Err(error),
        };

        // 3. Parse and apply.
        let activity: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("invalid JSON: {}", e)))?;

        let result = self.ingest_verified(&activity, &actor).await?;
        self.db.clear_waiting(&envelope.id).await?;
        Ok(result)
    }

    /// Re-validate envelopes parked on a key that has since become
    /// fetchable. An external scheduler decides when to call this.
    pub async fn retry_waiting(&self, key_id: &str) -> Result<Vec<Ingested>, AppError> {
        let mut results = Vec::new();

        for envelope in self.db.envelopes_waiting_for(key_id).await? {
            tracing::info!(envelope = %envelope.id, key_id, "re-validating parked envelope");

            let headers = headers_from_envelope(&envelope);
            let body = envelope.body.as_bytes();

            let verified = signature::verify_request(
                "POST",
                &envelope.path,
                &headers,
                Some(body),
                self.keys.as_ref(),
                self.max_date_skew_secs,
            )
            .await;

            match verified {
                Ok(actor) => {
                    let activity: Value = match serde_json::from_slice(body) {
                        Ok(activity) => activity,
                        Err(error) => {
                            tracing::warn!(envelope = %envelope.id, %error,
                                "parked envelope body is not JSON; dropping");
                            self.db.clear_waiting(&envelope.id).await?;
                            results.push(Ingested::Dropped);
                            continue;
                        }
                    };

                    let result = self.ingest_verified(&activity, &actor).await?;
                    self.db.clear_waiting(&envelope.id).await?;
                    results.push(result);
                }
                Err(AppError::Fetch(FetchFailure::RemoteError(reason))) => {
                    tracing::info!(envelope = %envelope.id, reason = %reason, "key still unavailable");
                }
                Err(error) => {
                    tracing::warn!(envelope = %envelope.id, %error,
                        "parked envelope failed verification; dropping");
                    self.db.clear_waiting(&envelope.id).await?;
                    results.push(Ingested::Dropped);
                }
            }
        }

        Ok(results)
    }

    /// Store a verified activity and run its side effects.
    async fn ingest_verified(
        &self,
        activity: &Value,
        verified_actor: &str,
    ) -> Result<Ingested, AppError> {
        let server = self.db.server().clone();

        // The signer must be the activity's actor.
        let claimed_actor = activity.get("actor").and_then(Value::as_str);
        let Some(claimed_actor) = claimed_actor else {
            return Err(AppError::Validation("activity has no actor".to_string()));
        };
        if !signature::key_id_matches_actor(verified_actor, claimed_actor) {
            return Err(AppError::SignatureInvalid(
                "activity actor does not match signer".to_string(),
            ));
        }

        // Replays of an already-stored activity are idempotent.
        let remote_url = activity
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(id) = &remote_url {
            if let Some(existing) = self.db.find_stored(id).await? {
                tracing::debug!(id = %id, number = %existing.number, "duplicate activity; ignoring");
                return Ok(Ingested::Applied {
                    number: existing.number,
                });
            }
        }

        let mut thing = match Thing::from_document(activity, remote_url, &server) {
            Ok(thing) => thing,
            Err(AppError::MalformedActivity(reason)) => {
                // Already accepted at the transport layer; a quiet drop
                // is the only closure available.
                tracing::warn!(reason = %reason, "accepted activity is malformed; dropping");
                return Ok(Ingested::Dropped);
            }
            Err(error) => return Err(error),
        };

        self.db.save_new(&mut thing).await?;
        tracing::info!(number = %thing.number, r#type = %thing.f_type, actor = %verified_actor,
            "activity stored");

        match self.engine.apply(&mut thing).await? {
            Outcome::Keep => Ok(Ingested::Applied {
                number: thing.number,
            }),
            Outcome::Discard => {
                tracing::warn!(number = %thing.number,
                    "side effects rejected the activity; deleting it");
                self.db.delete_thing(thing.number.as_str()).await?;
                Ok(Ingested::Dropped)
            }
        }
    }
}

/// Capture the relevant request headers as an archival envelope.
fn envelope_from_request(headers: &http::HeaderMap, path: &str, body: &[u8]) -> IncomingMessage {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    IncomingMessage {
        id: EntityId::new().0,
        received_at: Utc::now(),
        content_type: header("content-type"),
        date: header("date"),
        digest: header("digest"),
        host: header("host"),
        path: path.to_string(),
        signature: header("signature"),
        body: String::from_utf8_lossy(body).into_owned(),
        waiting_for: None,
    }
}

/// Rebuild a header map from a stored envelope for re-validation.
fn headers_from_envelope(envelope: &IncomingMessage) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();

    for (name, value) in [
        ("content-type", &envelope.content_type),
        ("date", &envelope.date),
        ("digest", &envelope.digest),
        ("host", &envelope.host),
        ("signature", &envelope.signature),
    ] {
        if value.is_empty() {
            continue;
        }
        if let Ok(value) = http::HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn envelopes_capture_the_signature_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("social.example.com"));
        headers.insert(
            "date",
            HeaderValue::from_static("Tue, 05 Aug 2025 10:00:00 GMT"),
        );
        headers.insert("signature", HeaderValue::from_static("keyId=\"k\""));

        let envelope =
            envelope_from_request(&headers, "/users/alice/inbox", br#"{"type":"Follow"}"#);

        assert_eq!(envelope.host, "social.example.com");
        assert_eq!(envelope.path, "/users/alice/inbox");
        assert_eq!(envelope.signature, "keyId=\"k\"");
        assert_eq!(envelope.body, r#"{"type":"Follow"}"#);
        assert!(envelope.waiting_for.is_none());
    }

    #[test]
    fn envelope_headers_round_trip() {
        let mut headers = http::HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("social.example.com"));
        headers.insert(
            "date",
            HeaderValue::from_static("Tue, 05 Aug 2025 10:00:00 GMT"),
        );
        headers.insert("digest", HeaderValue::from_static("SHA-256=abc"));
        headers.insert("signature", HeaderValue::from_static("keyId=\"k\""));

        let envelope = envelope_from_request(&headers, "/inbox", b"{}");
        let rebuilt = headers_from_envelope(&envelope);

        for name in ["host", "date", "digest", "signature"] {
            assert_eq!(rebuilt.get(name), headers.get(name), "{name}");
        }
    }
}
