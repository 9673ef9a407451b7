//! Activity side effects
//!
//! The protocol state machine: a dispatch table keyed by lower-cased
//! activity type name. Types without a handler carry no side effect and
//! are kept as-is. A handler either keeps the stored activity or signals
//! that it should be deleted, which is used when the activity turns out
//! to be malformed downstream of signature validation, after the
//! transport layer has already promised HTTP-level success.
//!
//! Side effects run synchronously in the same unit of work that stores
//! the triggering activity; outbound responses (like a synthesized
//! Accept) are enqueued for the delivery dispatcher, not sent inline.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use super::fetch::RemoteFetcher;
use crate::data::{Database, ObjectType, Thing, TypeClass};
use crate::error::AppError;

/// What should happen to the stored activity after its side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The activity stays in the store
    Keep,
    /// The activity was malformed; delete it
    Discard,
}

type Handler =
    for<'a> fn(&'a SideEffects, &'a mut Thing) -> BoxFuture<'a, Result<Outcome, AppError>>;

fn follow_handler<'a>(
    engine: &'a SideEffects,
    activity: &'a mut Thing,
) -> BoxFuture<'a, Result<Outcome, AppError>> {
    Box::pin(engine.on_follow(activity))
}

fn accept_handler<'a>(
    engine: &'a SideEffects,
    activity: &'a mut Thing,
) -> BoxFuture<'a, Result<Outcome, AppError>> {
    Box::pin(engine.on_accept(activity))
}

fn reject_handler<'a>(
    engine: &'a SideEffects,
    activity: &'a mut Thing,
) -> BoxFuture<'a, Result<Outcome, AppError>> {
    Box::pin(engine.on_reject(activity))
}

fn create_handler<'a>(
    engine: &'a SideEffects,
    activity: &'a mut Thing,
) -> BoxFuture<'a, Result<Outcome, AppError>> {
    Box::pin(engine.on_create(activity))
}

fn update_handler<'a>(
    engine: &'a SideEffects,
    activity: &'a mut Thing,
) -> BoxFuture<'a, Result<Outcome, AppError>> {
    Box::pin(engine.on_update(activity))
}

fn delete_handler<'a>(
    engine: &'a SideEffects,
    activity: &'a mut Thing,
) -> BoxFuture<'a, Result<Outcome, AppError>> {
    Box::pin(engine.on_delete(activity))
}

fn undo_handler<'a>(
    engine: &'a SideEffects,
    activity: &'a mut Thing,
) -> BoxFuture<'a, Result<Outcome, AppError>> {
    Box::pin(engine.on_undo(activity))
}

fn like_handler<'a>(
    engine: &'a SideEffects,
    activity: &'a mut Thing,
) -> BoxFuture<'a, Result<Outcome, AppError>> {
    Box::pin(engine.on_like(activity))
}

/// The URI an activity's `object` field points at.
fn object_uri(activity: &Thing) -> Option<String> {
    match activity.get("object")? {
        Value::String(uri) => Some(uri),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// The inline JSON payload of an activity's `object` field, if any.
fn object_payload(activity: &Thing) -> Option<Value> {
    match activity.get("object")? {
        payload @ Value::Object(_) => Some(payload),
        _ => None,
    }
}

/// For Delete: a bare URI, `{"id": ...}`, or a Tombstone wrapper.
fn delete_target_uri(activity: &Thing) -> Option<String> {
    let object = activity.get("object")?;

    if let Some(uri) = object.as_str() {
        return Some(uri.to_string());
    }

    let is_tombstone = object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|value| value.eq_ignore_ascii_case("Tombstone"));

    if is_tombstone {
        return object
            .get("object")
            .and_then(Value::as_str)
            .or_else(|| object.get("id").and_then(Value::as_str))
            .map(str::to_string);
    }

    object
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn same_origin(a: &str, b: &str) -> bool {
    let (Ok(a), Ok(b)) = (url::Url::parse(a), url::Url::parse(b)) else {
        return false;
    };
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// What a referenced prior activity turned out to be.
struct PriorActivity {
    type_name: Option<String>,
    actor: Option<String>,
    object: Option<String>,
}

/// The side-effect engine.
pub struct SideEffects {
    db: Arc<Database>,
    fetcher: Arc<RemoteFetcher>,
    handlers: HashMap<&'static str, Handler>,
}

impl SideEffects {
    pub fn new(db: Arc<Database>, fetcher: Arc<RemoteFetcher>) -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();

        for (name, handler) in [
            ("follow", follow_handler as Handler),
            ("accept", accept_handler as Handler),
            ("reject", reject_handler as Handler),
            ("create", create_handler as Handler),
            ("update", update_handler as Handler),
            ("delete", delete_handler as Handler),
            ("undo", undo_handler as Handler),
            ("like", like_handler as Handler),
        ] {
            handlers.insert(name, handler);
        }

        Self {
            db,
            fetcher,
            handlers,
        }
    }

    /// Apply the side effects of a newly stored activity.
    ///
    /// Absence of a handler for the type is not an error; some types
    /// carry no side effect.
    pub async fn apply(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let key = activity.f_type.name().to_ascii_lowercase();

        match self.handlers.get(key.as_str()) {
            Some(handler) => handler(self, activity).await,
            None => {
                tracing::debug!(number = %activity.number, r#type = %activity.f_type,
                    "no side effects for this type");
                Ok(Outcome::Keep)
            }
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Follow: create the relationship, accepting automatically when the
    /// local target allows it.
    async fn on_follow(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let Some(follower) = activity.f_actor.clone() else {
            tracing::warn!(number = %activity.number, "Follow without an actor");
            return Ok(Outcome::Discard);
        };
        let Some(target) = object_uri(activity) else {
            tracing::warn!(number = %activity.number, "Follow without an object");
            return Ok(Outcome::Discard);
        };

        let local_target = match self.db.local_actor_for_url(&target).await? {
            Some(local_target) => Some(local_target),
            None if self.db.server().parse_local(&target).is_some() => {
                tracing::warn!(number = %activity.number, object = %target,
                    "Follow of an unknown local actor");
                return Ok(Outcome::Discard);
            }
            None if url::Url::parse(&target).is_err() => {
                tracing::warn!(number = %activity.number, object = %target,
                    "Follow target is not a URI");
                return Ok(Outcome::Discard);
            }
            // A remote target: record the request and wait for the
            // remote end's Accept.
            None => None,
        };

        let auto_follow = local_target.as_ref().is_some_and(|actor| actor.auto_follow);
        if !auto_follow {
            tracing::info!(%follower, object = %target, "follow request recorded as pending");
            self.db.request_follow(&follower, &target).await?;
            return Ok(Outcome::Keep);
        }

        tracing::info!(%follower, object = %target, "auto-accepting follow");

        // Only the call that changed relationship state synthesizes the
        // Accept, so concurrent duplicate Follows answer once.
        if self.db.confirm_follow(&follower, &target).await? {
            let server = self.db.server().clone();

            let mut accept = Thing::new_local(ObjectType::Accept);
            accept.set("actor", target.as_str(), &server)?;
            accept.set("object", activity.url(&server), &server)?;
            accept.set("to", json!([follower.clone()]), &server)?;

            self.db.save_new(&mut accept).await?;
            self.db.queue_outbound(accept.number.as_str()).await?;

            tracing::info!(number = %accept.number, to = %follower,
                "Accept synthesized and enqueued");
        }

        Ok(Outcome::Keep)
    }

    /// Accept: transition the matching pending follow to accepted.
    async fn on_accept(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let Some(accepter) = activity.f_actor.clone() else {
            tracing::warn!(number = %activity.number, "Accept without an actor");
            return Ok(Outcome::Discard);
        };

        let Some(prior) = self.resolve_prior_activity(activity).await? else {
            tracing::warn!(number = %activity.number, "Accept of an unresolvable object");
            return Ok(Outcome::Discard);
        };

        if prior.type_name.as_deref() != Some("Follow") {
            tracing::warn!(number = %activity.number, r#type = ?prior.type_name,
                "object was Accepted, but it isn't a Follow");
            return Ok(Outcome::Keep);
        }

        let Some(follower) = prior.actor else {
            tracing::warn!(number = %activity.number, "Accepted Follow has no actor");
            return Ok(Outcome::Discard);
        };

        if self.db.accept_follow(&follower, &accepter).await? {
            tracing::info!(%follower, following = %accepter, "follow accepted");
        } else {
            tracing::warn!(%follower, following = %accepter,
                "Accept matched no pending follow; ignoring");
        }

        Ok(Outcome::Keep)
    }

    /// Reject: remove the matching follow relationship entirely.
    async fn on_reject(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let Some(rejecter) = activity.f_actor.clone() else {
            tracing::warn!(number = %activity.number, "Reject without an actor");
            return Ok(Outcome::Discard);
        };

        let Some(prior) = self.resolve_prior_activity(activity).await? else {
            tracing::warn!(number = %activity.number, "Reject of an unresolvable object");
            return Ok(Outcome::Discard);
        };

        if prior.type_name.as_deref() != Some("Follow") {
            tracing::warn!(number = %activity.number, r#type = ?prior.type_name,
                "object was Rejected, but it isn't a Follow");
            return Ok(Outcome::Keep);
        }

        let Some(follower) = prior.actor else {
            tracing::warn!(number = %activity.number, "Rejected Follow has no actor");
            return Ok(Outcome::Discard);
        };

        if self.db.remove_follow(&follower, &rejecter).await? {
            tracing::info!(%follower, following = %rejecter, "follow rejected");
        }

        Ok(Outcome::Keep)
    }

    /// Create: materialize the inline payload as a new object owned by
    /// the Create's actor.
    async fn on_create(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let server = self.db.server().clone();

        let Some(actor) = activity.f_actor.clone() else {
            tracing::warn!(number = %activity.number, "Create without an actor");
            return Ok(Outcome::Discard);
        };

        let Some(payload) = object_payload(activity) else {
            tracing::warn!(number = %activity.number,
                "attempt to use Create without an inline object; deleting original Create");
            return Ok(Outcome::Discard);
        };

        let Some(type_name) = payload.get("type").and_then(Value::as_str) else {
            tracing::warn!(number = %activity.number,
                "attempt to use Create to create something without a type; deleting original Create");
            return Ok(Outcome::Discard);
        };

        let Some(payload_type) = ObjectType::from_name(type_name) else {
            tracing::warn!(number = %activity.number, r#type = type_name,
                "attempt to use Create to create an object of unknown type; deleting original Create");
            return Ok(Outcome::Discard);
        };

        match payload_type.class() {
            TypeClass::Abstract => {
                tracing::warn!(number = %activity.number, r#type = type_name,
                    "attempt to use Create to create an abstract object; deleting original Create");
                return Ok(Outcome::Discard);
            }
            TypeClass::Activity => {
                tracing::warn!(number = %activity.number, r#type = type_name,
                    "Create can only create non-activities; deleting original Create");
                return Ok(Outcome::Discard);
            }
            TypeClass::Actor | TypeClass::Object => {}
        }

        // A replayed Create for an already-stored remote object just
        // re-links it.
        if let Some(id) = payload.get("id").and_then(Value::as_str) {
            if let Some(existing) = self.db.find_stored(id).await? {
                tracing::debug!(number = %activity.number, id, "Create target already stored");
                activity.set("object", &existing, &server)?;
                self.db.update(activity).await?;
                return Ok(Outcome::Keep);
            }
        }

        // Force attribution to the Create's actor.
        let mut payload = payload;
        let attributed_to = payload.get("attributedTo").and_then(Value::as_str);
        if attributed_to != Some(actor.as_str()) {
            tracing::warn!(
                number = %activity.number,
                attribution = ?attributed_to,
                actor = %actor,
                "attribution on object does not match actor on Create; fixing and continuing"
            );
        }
        if let Some(map) = payload.as_object_mut() {
            map.insert("attributedTo".to_string(), json!(actor));
        }

        let remote_url = if activity.is_local() {
            None
        } else {
            payload
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let mut child = match Thing::from_document(&payload, remote_url, &server) {
            Ok(child) => child,
            Err(error) => {
                tracing::warn!(number = %activity.number, %error,
                    "Create payload failed to parse; deleting original Create");
                return Ok(Outcome::Discard);
            }
        };

        self.db.save_new(&mut child).await?;

        activity.set("object", &child, &server)?;
        self.db.update(activity).await?;

        tracing::info!(number = %activity.number, child = %child.number,
            "Create materialized a new object");
        Ok(Outcome::Keep)
    }

    /// Update: overwrite the fields present in the payload onto an
    /// existing object owned by the same actor.
    ///
    /// Merge semantics: fields absent from the payload are left alone,
    /// for local and remote senders alike.
    async fn on_update(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let server = self.db.server().clone();

        let Some(actor) = activity.f_actor.clone() else {
            tracing::warn!(number = %activity.number, "Update without an actor");
            return Ok(Outcome::Discard);
        };

        let Some(payload) = object_payload(activity) else {
            tracing::warn!(number = %activity.number, "Update without an inline object");
            return Ok(Outcome::Discard);
        };

        let Some(id) = payload.get("id").and_then(Value::as_str) else {
            tracing::warn!(number = %activity.number, "Update did not include an id");
            return Ok(Outcome::Discard);
        };

        let Some(mut existing) = self.db.find_stored(id).await? else {
            tracing::warn!(number = %activity.number, id, "Update to non-existent object");
            return Ok(Outcome::Discard);
        };

        let owner = existing.get_str("attributedTo");
        if owner.as_deref() != Some(actor.as_str()) {
            tracing::warn!(
                number = %activity.number,
                actor = %actor,
                owner = ?owner,
                "Update to an object owned by someone else; deleting update"
            );
            return Ok(Outcome::Discard);
        }

        tracing::debug!(number = %activity.number, id, "updating object");

        if let Some(fields) = payload.as_object() {
            for (name, value) in fields {
                if matches!(name.as_str(), "id" | "@context") {
                    continue;
                }
                if let Err(error) = existing.set(name, value.clone(), &server) {
                    tracing::warn!(number = %activity.number, field = %name, %error,
                        "Update carried an unusable field; deleting update");
                    return Ok(Outcome::Discard);
                }
            }
        }

        self.db.update(&existing).await?;

        tracing::debug!(number = %activity.number, id, "update applied");
        Ok(Outcome::Keep)
    }

    /// Delete: entomb a local target, or durably tombstone a remote one.
    async fn on_delete(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let Some(actor) = activity.f_actor.clone() else {
            tracing::warn!(number = %activity.number, "Delete without an actor");
            return Ok(Outcome::Discard);
        };

        let Some(target_uri) = delete_target_uri(activity) else {
            tracing::warn!(number = %activity.number, "Delete without a target");
            return Ok(Outcome::Discard);
        };

        if let Some(mut target) = self.db.find_stored(&target_uri).await? {
            let owner = target.get_str("attributedTo").or(target.f_actor.clone());
            if owner.as_deref() != Some(actor.as_str()) {
                tracing::warn!(
                    number = %activity.number,
                    actor = %actor,
                    owner = ?owner,
                    "Delete of an object owned by someone else; deleting the Delete"
                );
                return Ok(Outcome::Discard);
            }

            if target.is_local() {
                target.entomb()?;
            } else {
                // A remote mirror cannot be entombed locally; record the
                // gone status durably and retire the mirror.
                self.db.cache_mark_gone(&target_uri).await?;
                target.active = false;
            }
            self.db.update(&target).await?;

            tracing::info!(number = %activity.number, object = %target_uri, "target retired");
            return Ok(Outcome::Keep);
        }

        if self.db.server().parse_local(&target_uri).is_some() {
            tracing::warn!(number = %activity.number, object = %target_uri,
                "Delete of an unknown local object");
            return Ok(Outcome::Discard);
        }

        // Unseen remote object: only its own origin may tombstone it.
        if !same_origin(&actor, &target_uri) {
            tracing::warn!(number = %activity.number, actor = %actor, object = %target_uri,
                "Delete crosses origins; deleting the Delete");
            return Ok(Outcome::Discard);
        }

        self.db.cache_mark_gone(&target_uri).await?;
        tracing::info!(object = %target_uri, "remote object marked gone");
        Ok(Outcome::Keep)
    }

    /// Undo: reverse a prior Follow or Like by the same actor.
    async fn on_undo(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let Some(actor) = activity.f_actor.clone() else {
            tracing::warn!(number = %activity.number, "Undo without an actor");
            return Ok(Outcome::Discard);
        };

        let Some(prior) = self.resolve_prior_activity(activity).await? else {
            tracing::warn!(number = %activity.number, "Undo of an unresolvable object");
            return Ok(Outcome::Discard);
        };

        if let Some(original_actor) = &prior.actor {
            if original_actor != &actor {
                tracing::warn!(number = %activity.number, actor = %actor, original = %original_actor,
                    "Undo by a different actor; deleting the Undo");
                return Ok(Outcome::Discard);
            }
        }

        match prior.type_name.as_deref() {
            Some("Follow") => {
                let Some(following) = prior.object else {
                    tracing::warn!(number = %activity.number, "undone Follow has no object");
                    return Ok(Outcome::Discard);
                };
                if self.db.remove_follow(&actor, &following).await? {
                    tracing::info!(follower = %actor, following = %following, "follow undone");
                }
                Ok(Outcome::Keep)
            }
            Some("Like") => {
                let Some(liked) = prior.object else {
                    tracing::warn!(number = %activity.number, "undone Like has no object");
                    return Ok(Outcome::Discard);
                };
                if self.db.remove_like(&actor, &liked).await? {
                    tracing::info!(actor = %actor, object = %liked, "like undone");
                }
                Ok(Outcome::Keep)
            }
            Some(other) => {
                tracing::warn!(number = %activity.number, r#type = other,
                    "Undo of an unsupported activity type; ignoring");
                Ok(Outcome::Keep)
            }
            None => {
                tracing::warn!(number = %activity.number, "Undo of an untyped object");
                Ok(Outcome::Discard)
            }
        }
    }

    /// Like: record a favourite edge.
    async fn on_like(&self, activity: &mut Thing) -> Result<Outcome, AppError> {
        let Some(actor) = activity.f_actor.clone() else {
            tracing::warn!(number = %activity.number, "Like without an actor");
            return Ok(Outcome::Discard);
        };

        let Some(target) = object_uri(activity) else {
            tracing::warn!(number = %activity.number, "Like without an object");
            return Ok(Outcome::Discard);
        };

        self.db.add_like(&actor, &target).await?;
        tracing::info!(actor = %actor, object = %target, "like recorded");
        Ok(Outcome::Keep)
    }

    // =========================================================================
    // Object resolution
    // =========================================================================

    /// Resolve an activity's `object` as a reference to a prior
    /// activity (for Accept/Reject/Undo).
    ///
    /// A stored activity wins; otherwise the inline fields are taken at
    /// face value. Returns `None` when there is nothing usable.
    async fn resolve_prior_activity(
        &self,
        activity: &Thing,
    ) -> Result<Option<PriorActivity>, AppError> {
        let Some(object) = activity.get("object") else {
            return Ok(None);
        };

        if let Some(uri) = object_uri(activity) {
            if let Some(stored) = self.db.find_stored(&uri).await? {
                return Ok(Some(PriorActivity {
                    type_name: Some(stored.f_type.name().to_string()),
                    actor: stored.f_actor.clone(),
                    object: stored.get_str("object"),
                }));
            }
        }

        match object {
            Value::Object(map) => Ok(Some(PriorActivity {
                type_name: map
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                actor: map
                    .get("actor")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                object: map
                    .get("object")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })),
            // A bare URI we have never stored: ask the remote end.
            Value::String(uri) => match self.fetcher.fetch(&uri).await {
                Ok(doc) => Ok(Some(PriorActivity {
                    type_name: doc
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    actor: doc
                        .get("actor")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    object: doc
                        .get("object")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })),
                Err(AppError::Fetch(failure)) => {
                    tracing::warn!(uri = %uri, %failure, "referenced activity unreachable");
                    Ok(None)
                }
                Err(error) => Err(error),
            },
            _ => Ok(None),
        }
    }
}
