//! Activity delivery
//!
//! Fans a stored activity out to its recipients' remote inboxes:
//! compute the recipient set from the audience fields, expand
//! followers collections page by page, collapse recipients sharing a
//! shared inbox, then sign and POST one copy per destination.
//!
//! Every destination is attempted independently; one failure never
//! blocks or rolls back the others. The dispatcher is stateless per
//! call; retry scheduling belongs to the external task queue. Within
//! one sender, awaiting `deliver` before dispatching the next activity
//! preserves submission order per destination, which remote inboxes
//! assume.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;

use super::fetch::RemoteFetcher;
use crate::config::LocalRef;
use crate::data::{Database, LocalActor, Thing};
use crate::error::AppError;

/// Upper bound on pages walked per followers collection.
const MAX_COLLECTION_PAGES: usize = 50;

/// Result of one delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// Target inbox URI (or actor URI when resolution failed)
    pub inbox_uri: String,
    /// Whether delivery succeeded
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
    /// HTTP status code if available
    pub status_code: Option<u16>,
}

/// The outbound delivery dispatcher.
#[derive(Clone)]
pub struct DeliveryDispatcher {
    db: Arc<Database>,
    fetcher: Arc<RemoteFetcher>,
    http_client: Arc<reqwest::Client>,
    /// Maximum concurrent deliveries
    concurrency: usize,
    /// Per-destination timeout
    timeout: Duration,
}

/// Pick the inbox to deliver to from an actor document.
///
/// A shared inbox wins when advertised, so recipients behind one
/// endpoint collapse into a single delivery.
fn inbox_for_actor(doc: &Value) -> Option<String> {
    if let Some(shared) = doc
        .get("endpoints")
        .and_then(|endpoints| endpoints.get("sharedInbox"))
        .and_then(Value::as_str)
    {
        return Some(shared.to_string());
    }

    doc.get("inbox").and_then(Value::as_str).map(str::to_string)
}

/// Item URIs on one collection page.
fn collection_items(doc: &Value) -> Vec<String> {
    let items = doc
        .get("orderedItems")
        .or_else(|| doc.get("items"))
        .and_then(Value::as_array);

    match items {
        Some(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

impl DeliveryDispatcher {
    pub fn new(
        db: Arc<Database>,
        fetcher: Arc<RemoteFetcher>,
        http_client: Arc<reqwest::Client>,
        concurrency: usize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            db,
            fetcher,
            http_client,
            concurrency: concurrency.max(1),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Deliver an activity to every addressed remote inbox.
    ///
    /// # Errors
    /// Fails outright only when the activity's actor is not a local
    /// actor (there is no key to sign with). Per-destination failures
    /// are reported in the returned outcomes, never raised.
    pub async fn deliver(&self, activity: &Thing) -> Result<Vec<DeliveryOutcome>, AppError> {
        let server = self.db.server().clone();

        // 1. Only local actors have signing keys.
        let Some(actor_uri) = activity.f_actor.clone() else {
            return Err(AppError::Validation(
                "cannot deliver an activity without an actor".to_string(),
            ));
        };
        let Some(sender) = self.db.local_actor_for_url(&actor_uri).await? else {
            return Err(AppError::Validation(format!(
                "cannot deliver for non-local actor {}",
                actor_uri
            )));
        };

        // 2. Audience fields -> recipient actor URIs.
        let mut failures = Vec::new();
        let recipients = self.resolve_recipients(activity, &actor_uri).await?;

        // 3. Recipient actors -> inbox URLs, collapsed by shared inbox.
        let mut inboxes = BTreeSet::new();
        for recipient in recipients {
            match self.fetcher.fetch(&recipient).await {
                Ok(doc) => match inbox_for_actor(&doc) {
                    Some(inbox) => {
                        inboxes.insert(inbox);
                    }
                    None => {
                        tracing::warn!(recipient = %recipient, "recipient advertises no inbox");
                        failures.push(DeliveryOutcome {
                            inbox_uri: recipient,
                            success: false,
                            error: Some("no inbox advertised".to_string()),
                            status_code: None,
                        });
                    }
                },
                Err(error) => {
                    tracing::warn!(recipient = %recipient, %error, "failed to resolve recipient");
                    failures.push(DeliveryOutcome {
                        inbox_uri: recipient,
                        success: false,
                        error: Some(error.to_string()),
                        status_code: None,
                    });
                }
            }
        }

        // 4. Build the payload once; blind fields never leave the store.
        let mut payload = activity.activity_form(&server);
        if let Some(map) = payload.as_object_mut() {
            map.remove("bto");
            map.remove("bcc");
            map.insert(
                "@context".to_string(),
                Value::String("https://www.w3.org/ns/activitystreams".to_string()),
            );
        }

        tracing::info!(
            number = %activity.number,
            inboxes = inboxes.len(),
            "delivering activity"
        );

        // 5. Fan out with bounded parallelism.
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let payload = Arc::new(payload);
        let sender = Arc::new(sender);
        let key_id = server.key_id(&sender.preferred_username);

        let mut tasks = Vec::new();
        for inbox_uri in inboxes {
            let semaphore = semaphore.clone();
            let payload = payload.clone();
            let sender = sender.clone();
            let key_id = key_id.clone();
            let dispatcher = self.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");

                let attempt = tokio::time::timeout(
                    dispatcher.timeout,
                    dispatcher.deliver_to_inbox(&inbox_uri, &payload, &sender, &key_id),
                )
                .await;

                match attempt {
                    Ok(Ok(status)) => DeliveryOutcome {
                        inbox_uri,
                        success: true,
                        error: None,
                        status_code: Some(status),
                    },
                    Ok(Err(error)) => DeliveryOutcome {
                        inbox_uri,
                        success: false,
                        error: Some(error.to_string()),
                        status_code: None,
                    },
                    Err(_) => DeliveryOutcome {
                        inbox_uri,
                        success: false,
                        error: Some("delivery timed out".to_string()),
                        status_code: None,
                    },
                }
            }));
        }

        let mut outcomes = failures;
        for task in tasks {
            if let Ok(outcome) = task.await {
                outcomes.push(outcome);
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        tracing::info!(
            number = %activity.number,
            succeeded,
            failed = outcomes.len() - succeeded,
            "delivery complete"
        );

        Ok(outcomes)
    }

    /// Drain the outbound queue.
    ///
    /// Each queued activity gets one delivery attempt and is then
    /// dequeued; anything smarter (backoff, redelivery) is the external
    /// task queue's policy.
    pub async fn deliver_queued(&self) -> Result<Vec<DeliveryOutcome>, AppError> {
        let mut all = Vec::new();

        for number in self.db.pending_outbound().await? {
            let Some(activity) = self.db.get_by_number(number.as_str()).await? else {
                tracing::warn!(number = %number, "queued activity no longer exists");
                self.db.clear_outbound(number.as_str()).await?;
                continue;
            };

            match self.deliver(&activity).await {
                Ok(outcomes) => all.extend(outcomes),
                Err(error) => {
                    tracing::warn!(number = %number, %error, "queued delivery failed");
                }
            }
            self.db.clear_outbound(number.as_str()).await?;
        }

        Ok(all)
    }

    /// Audience URIs -> concrete recipient actor URIs.
    ///
    /// Followers collections (local or remote) expand to their members;
    /// the public sentinel was already excluded; local recipients and
    /// the sender are dropped, since their side effects are applied
    /// in-process.
    async fn resolve_recipients(
        &self,
        activity: &Thing,
        sender_uri: &str,
    ) -> Result<BTreeSet<String>, AppError> {
        let server = self.db.server().clone();
        let mut actors = BTreeSet::new();

        for recipient in activity.recipients() {
            match server.parse_local(&recipient) {
                Some(LocalRef::Collection { username, list }) if list == "followers" => {
                    let followed = server.actor_url(&username);
                    for follower in self.db.followers_of(&followed).await? {
                        actors.insert(follower);
                    }
                }
                Some(_) => {
                    // Local actor or other local URI: no network hop.
                    tracing::debug!(recipient = %recipient, "skipping local recipient");
                }
                None => {
                    if let Some(expanded) = self.try_expand_remote_collection(&recipient).await? {
                        actors.extend(expanded);
                    } else {
                        actors.insert(recipient);
                    }
                }
            }
        }

        actors.remove(sender_uri);

        // Local recipients resolved by URI are handled in-process too.
        let mut remote = BTreeSet::new();
        for actor in actors {
            if self.db.local_actor_for_url(&actor).await?.is_none() {
                remote.insert(actor);
            }
        }

        Ok(remote)
    }

    /// If `uri` is a remote collection, walk it page by page and return
    /// its member URIs. Returns `None` when it isn't a collection.
    async fn try_expand_remote_collection(
        &self,
        uri: &str,
    ) -> Result<Option<BTreeSet<String>>, AppError> {
        let doc = match self.fetcher.fetch(uri).await {
            Ok(doc) => doc,
            Err(AppError::Fetch(failure)) => {
                tracing::warn!(uri, %failure, "addressed URI unreachable; treating as actor");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let is_collection = doc
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| matches!(t, "Collection" | "OrderedCollection"));
        if !is_collection {
            return Ok(None);
        }

        let mut members = BTreeSet::new();
        members.extend(collection_items(&doc));

        let mut next_url = doc
            .get("first")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut pages = 0;

        while let Some(page_url) = next_url {
            if pages >= MAX_COLLECTION_PAGES {
                tracing::warn!(uri, "collection exceeds page budget; truncating expansion");
                break;
            }
            pages += 1;

            let page = match self.fetcher.fetch(&page_url).await {
                Ok(page) => page,
                Err(error) => {
                    tracing::warn!(page = %page_url, %error, "collection page unreachable");
                    break;
                }
            };

            members.extend(collection_items(&page));
            next_url = page
                .get("next")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        Ok(Some(members))
    }

    /// POST one signed copy to one inbox.
    async fn deliver_to_inbox(
        &self,
        inbox_uri: &str,
        payload: &Value,
        sender: &LocalActor,
        key_id: &str,
    ) -> Result<u16, AppError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| AppError::Validation(format!("failed to serialize activity: {}", e)))?;

        let sig_headers = super::signature::sign_request(
            "POST",
            inbox_uri,
            Some(&body),
            &sender.private_key_pem,
            key_id,
        )?;

        let mut request = self
            .http_client
            .post(inbox_uri)
            .header("Content-Type", "application/activity+json")
            .header("Date", sig_headers.date)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request.body(body).send().await.map_err(|e| {
            AppError::Delivery(format!("failed to deliver to {}: {}", inbox_uri, e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::Delivery(format!(
                "inbox {} rejected activity: HTTP {}",
                inbox_uri,
                response.status()
            )));
        }

        tracing::info!(inbox = inbox_uri, "delivered");
        Ok(response.status().as_u16())
    }
}
