//! The dynamic object ("thing")
//!
//! Every federated entity, whether an activity or a content object, is
//! a `Thing`: a small set of typed core fields, an open mapping of
//! extension fields, and the audience relation. Field lookup resolves core fields
//! first, then audience fields, then extensions; this order is fixed,
//! since core fields shadow same-named extensions.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::config::ServerConfig;
use crate::data::models::{AudienceField, ObjectType, ShortId};
use crate::error::AppError;

/// A value on its way into [`Thing::set`].
///
/// Null, string, boolean, list, and JSON-object values pass through
/// unchanged; an object reference is reduced to its identifier URI;
/// anything else falls back to its string form.
#[derive(Debug)]
pub enum FieldInput<'a> {
    Json(Value),
    Object(&'a Thing),
}

impl FieldInput<'_> {
    fn normalize(self, server: &ServerConfig) -> Value {
        match self {
            FieldInput::Json(value) => match value {
                Value::Null
                | Value::String(_)
                | Value::Bool(_)
                | Value::Array(_)
                | Value::Object(_) => value,
                other => Value::String(other.to_string()),
            },
            FieldInput::Object(thing) => Value::String(thing.url(server)),
        }
    }
}

impl From<Value> for FieldInput<'_> {
    fn from(value: Value) -> Self {
        FieldInput::Json(value)
    }
}

impl From<&str> for FieldInput<'_> {
    fn from(value: &str) -> Self {
        FieldInput::Json(Value::String(value.to_string()))
    }
}

impl From<String> for FieldInput<'_> {
    fn from(value: String) -> Self {
        FieldInput::Json(Value::String(value))
    }
}

impl From<bool> for FieldInput<'_> {
    fn from(value: bool) -> Self {
        FieldInput::Json(Value::Bool(value))
    }
}

impl<'a> From<&'a Thing> for FieldInput<'a> {
    fn from(thing: &'a Thing) -> Self {
        FieldInput::Object(thing)
    }
}

/// The unit of federation.
#[derive(Debug, Clone)]
pub struct Thing {
    /// Stable short local identifier
    pub number: ShortId,
    pub f_type: ObjectType,
    /// URI of the actor responsible, if any
    pub f_actor: Option<String>,
    /// Display name; empty string means absent
    pub f_name: String,
    /// Set for remote objects only; local objects derive their id
    pub remote_url: Option<String>,
    /// False once entombed
    pub active: bool,
    pub created_at: DateTime<Utc>,
    extensions: Map<String, Value>,
    audiences: BTreeMap<AudienceField, BTreeSet<String>>,
}

impl Thing {
    /// Create a locally authored object with a fresh short id.
    pub fn new_local(f_type: ObjectType) -> Self {
        Self {
            number: ShortId::new(),
            f_type,
            f_actor: None,
            f_name: String::new(),
            remote_url: None,
            active: true,
            created_at: Utc::now(),
            extensions: Map::new(),
            audiences: BTreeMap::new(),
        }
    }

    /// Create an object mirroring a remote one.
    pub fn new_remote(f_type: ObjectType, remote_url: String) -> Self {
        Self {
            remote_url: Some(remote_url),
            ..Self::new_local(f_type)
        }
    }

    /// Rebuild from stored parts. Used by the database layer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        number: ShortId,
        f_type: ObjectType,
        f_actor: Option<String>,
        f_name: String,
        remote_url: Option<String>,
        active: bool,
        created_at: DateTime<Utc>,
        extensions: Map<String, Value>,
        audiences: BTreeMap<AudienceField, BTreeSet<String>>,
    ) -> Self {
        Self {
            number,
            f_type,
            f_actor,
            f_name,
            remote_url,
            active,
            created_at,
            extensions,
            audiences,
        }
    }

    /// Parse an ActivityPub document into a thing.
    ///
    /// `remote_url` carries the document's own id when it originates
    /// elsewhere; local documents mint a short id instead. Fields other
    /// than `id`, `type`, and `@context` flow through [`Thing::set`].
    ///
    /// # Errors
    /// `MalformedActivity` when the type is missing or unrecognized.
    pub fn from_document(
        doc: &Value,
        remote_url: Option<String>,
        server: &ServerConfig,
    ) -> Result<Self, AppError> {
        let type_name = doc
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::MalformedActivity("document has no type".to_string()))?;

        let f_type = ObjectType::from_name(type_name).ok_or_else(|| {
            AppError::MalformedActivity(format!("unrecognized type: {}", type_name))
        })?;

        let mut thing = match remote_url {
            Some(url) => Self::new_remote(f_type, url),
            None => Self::new_local(f_type),
        };

        if let Some(fields) = doc.as_object() {
            for (name, value) in fields {
                if matches!(name.as_str(), "id" | "type" | "@context") {
                    continue;
                }
                thing.set(name, value.clone(), server)?;
            }
        }

        Ok(thing)
    }

    /// The object's globally unique identifier.
    pub fn url(&self, server: &ServerConfig) -> String {
        match &self.remote_url {
            Some(url) => url.clone(),
            None => server.object_url(self.number.as_str()),
        }
    }

    /// True when this object was authored on this instance.
    pub fn is_local(&self) -> bool {
        self.remote_url.is_none()
    }

    pub fn is_tombstone(&self) -> bool {
        self.f_type == ObjectType::Tombstone
    }

    /// Look up a named field.
    ///
    /// Resolution order is core fields, then audience fields, then the
    /// extension mapping. The derived `id` is not a field; use
    /// [`Thing::url`]. An empty core `name` reads as absent.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "type" => return Some(Value::String(self.f_type.name().to_string())),
            "actor" => return self.f_actor.clone().map(Value::String),
            "name" => {
                if self.f_name.is_empty() {
                    return None;
                }
                return Some(Value::String(self.f_name.clone()));
            }
            _ => {}
        }

        if let Some(field) = AudienceField::from_name(name) {
            let recipients = self.audience(field);
            if recipients.is_empty() {
                return None;
            }
            return Some(Value::Array(
                recipients.iter().cloned().map(Value::String).collect(),
            ));
        }

        self.extensions.get(name).cloned()
    }

    /// Shorthand for string-valued fields.
    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Assign a named field.
    ///
    /// Core fields are validated; an audience field replaces that
    /// field's recipient set; anything else lands in the extension
    /// mapping, last write winning.
    pub fn set<'a>(
        &mut self,
        name: &str,
        value: impl Into<FieldInput<'a>>,
        server: &ServerConfig,
    ) -> Result<(), AppError> {
        let value = value.into().normalize(server);

        tracing::debug!(number = %self.number, field = name, "setting field");

        match name {
            "id" => {
                return Err(AppError::Validation(
                    "id is derived and cannot be assigned".to_string(),
                ));
            }
            "type" => {
                let type_name = value.as_str().ok_or_else(|| {
                    AppError::MalformedActivity("type must be a string".to_string())
                })?;
                self.f_type = ObjectType::from_name(type_name).ok_or_else(|| {
                    AppError::MalformedActivity(format!("unrecognized type: {}", type_name))
                })?;
                return Ok(());
            }
            "actor" => {
                self.f_actor = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    // Some servers inline the actor document.
                    Value::Object(ref map) => map
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => {
                        return Err(AppError::MalformedActivity(
                            "actor must be a URI".to_string(),
                        ));
                    }
                };
                return Ok(());
            }
            "name" => {
                self.f_name = match value {
                    Value::Null => String::new(),
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                return Ok(());
            }
            _ => {}
        }

        if let Some(field) = AudienceField::from_name(name) {
            let recipients = parse_recipients(&value)?;
            if recipients.is_empty() {
                self.audiences.remove(&field);
            } else {
                self.audiences.insert(field, recipients);
            }
            return Ok(());
        }

        self.extensions.insert(name.to_string(), value);
        Ok(())
    }

    /// Recipients of one audience field.
    pub fn audience(&self, field: AudienceField) -> BTreeSet<String> {
        self.audiences.get(&field).cloned().unwrap_or_default()
    }

    /// Every recipient URI across all audience fields, public sentinel
    /// excluded.
    pub fn recipients(&self) -> BTreeSet<String> {
        self.audiences
            .values()
            .flatten()
            .filter(|uri| uri.as_str() != crate::data::models::PUBLIC_AUDIENCE)
            .cloned()
            .collect()
    }

    pub(crate) fn extensions(&self) -> &Map<String, Value> {
        &self.extensions
    }

    pub(crate) fn audiences(&self) -> &BTreeMap<AudienceField, BTreeSet<String>> {
        &self.audiences
    }

    /// Render the object as its ActivityPub document.
    ///
    /// Merges the derived `id`/`type`, the populated core fields, every
    /// extension field, and the audience sets as recipient-URI arrays.
    pub fn activity_form(&self, server: &ServerConfig) -> Value {
        let mut form = Map::new();
        form.insert("id".to_string(), Value::String(self.url(server)));
        form.insert(
            "type".to_string(),
            Value::String(self.f_type.name().to_string()),
        );

        if let Some(actor) = &self.f_actor {
            form.insert("actor".to_string(), Value::String(actor.clone()));
        }
        if !self.f_name.is_empty() {
            form.insert("name".to_string(), Value::String(self.f_name.clone()));
        }

        for (name, value) in &self.extensions {
            form.insert(name.clone(), value.clone());
        }

        for (field, recipients) in &self.audiences {
            if recipients.is_empty() {
                continue;
            }
            form.insert(
                field.name().to_string(),
                Value::Array(recipients.iter().cloned().map(Value::String).collect()),
            );
        }

        Value::Object(form)
    }

    /// Irreversibly retire this object.
    ///
    /// The type becomes `Tombstone` and the extension fields are
    /// discarded, except a recorded `former_type`. A second call is a
    /// no-op with a warning. Remote objects cannot be entombed here;
    /// their cache entries are marked gone instead.
    pub fn entomb(&mut self) -> Result<(), AppError> {
        if self.is_tombstone() {
            tracing::warn!(number = %self.number, "already entombed; ignoring");
            return Ok(());
        }

        if !self.is_local() {
            return Err(AppError::Validation(format!(
                "cannot entomb remote object {}",
                self.remote_url.as_deref().unwrap_or("?")
            )));
        }

        tracing::info!(number = %self.number, former = %self.f_type, "entombing");

        let former_type = self.f_type.name();
        self.extensions.clear();
        self.extensions
            .insert("former_type".to_string(), json!(former_type));
        self.f_type = ObjectType::Tombstone;
        self.active = false;

        Ok(())
    }
}

/// Parse an audience value: a single URI or a list of URIs.
fn parse_recipients(value: &Value) -> Result<BTreeSet<String>, AppError> {
    match value {
        Value::Null => Ok(BTreeSet::new()),
        Value::String(uri) => Ok(BTreeSet::from([uri.clone()])),
        Value::Array(entries) => {
            let mut recipients = BTreeSet::new();
            for entry in entries {
                match entry {
                    Value::String(uri) => {
                        recipients.insert(uri.clone());
                    }
                    _ => {
                        return Err(AppError::MalformedActivity(
                            "audience entries must be URIs".to_string(),
                        ));
                    }
                }
            }
            Ok(recipients)
        }
        _ => Err(AppError::MalformedActivity(
            "audience must be a URI or a list of URIs".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::PUBLIC_AUDIENCE;

    fn server() -> ServerConfig {
        ServerConfig {
            domain: "social.example.com".to_string(),
            protocol: "https".to_string(),
        }
    }

    #[test]
    fn local_things_derive_their_url_from_the_number() {
        let thing = Thing::new_local(ObjectType::Note);
        assert_eq!(
            thing.url(&server()),
            format!("https://social.example.com/obj/{}", thing.number)
        );
        assert!(thing.is_local());
    }

    #[test]
    fn remote_things_keep_their_remote_url() {
        let thing = Thing::new_remote(
            ObjectType::Note,
            "https://remote.example/notes/1".to_string(),
        );
        assert_eq!(thing.url(&server()), "https://remote.example/notes/1");
        assert!(!thing.is_local());
    }

    #[test]
    fn core_fields_shadow_same_named_extensions() {
        let server = server();
        let mut thing = Thing::new_local(ObjectType::Note);
        thing.set("name", "proper name", &server).unwrap();

        // The extension mapping never sees "name".
        assert_eq!(thing.extensions().get("name"), None);
        assert_eq!(thing.get_str("name").as_deref(), Some("proper name"));
    }

    #[test]
    fn empty_core_name_reads_as_absent() {
        let thing = Thing::new_local(ObjectType::Note);
        assert_eq!(thing.get("name"), None);

        let form = thing.activity_form(&server());
        assert!(form.get("name").is_none());
    }

    #[test]
    fn object_references_normalize_to_their_id() {
        let server = server();
        let target = Thing::new_local(ObjectType::Note);
        let mut activity = Thing::new_local(ObjectType::Like);

        activity.set("object", &target, &server).unwrap();

        assert_eq!(
            activity.get("object"),
            Some(Value::String(target.url(&server)))
        );
    }

    #[test]
    fn numbers_normalize_to_their_string_form() {
        let server = server();
        let mut thing = Thing::new_local(ObjectType::Note);
        thing.set("replies_count", json!(4), &server).unwrap();
        assert_eq!(thing.get("replies_count"), Some(Value::String("4".into())));
    }

    #[test]
    fn extensions_are_last_write_wins() {
        let server = server();
        let mut thing = Thing::new_local(ObjectType::Note);
        thing.set("content", "first", &server).unwrap();
        thing.set("content", "second", &server).unwrap();
        assert_eq!(thing.get_str("content").as_deref(), Some("second"));
    }

    #[test]
    fn audience_fields_accept_string_or_list() {
        let server = server();
        let mut thing = Thing::new_local(ObjectType::Note);

        thing
            .set("to", json!("https://remote.example/users/fred"), &server)
            .unwrap();
        thing
            .set(
                "cc",
                json!([PUBLIC_AUDIENCE, "https://remote.example/users/jim"]),
                &server,
            )
            .unwrap();

        assert_eq!(thing.audience(AudienceField::To).len(), 1);
        assert_eq!(thing.audience(AudienceField::Cc).len(), 2);

        // Public is addressable but never a delivery recipient.
        assert!(!thing.recipients().contains(PUBLIC_AUDIENCE));
        assert_eq!(thing.recipients().len(), 2);
    }

    #[test]
    fn setting_id_is_rejected() {
        let server = server();
        let mut thing = Thing::new_local(ObjectType::Note);
        let result = thing.set("id", "https://social.example.com/obj/fake", &server);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn activity_form_merges_core_extensions_and_audiences() {
        let server = server();
        let mut thing = Thing::new_local(ObjectType::Note);
        thing
            .set("actor", "https://social.example.com/users/alice", &server)
            .unwrap();
        thing.set("content", "hello", &server).unwrap();
        thing.set("to", json!([PUBLIC_AUDIENCE]), &server).unwrap();

        let form = thing.activity_form(&server);
        assert_eq!(form["type"], "Note");
        assert_eq!(form["id"], thing.url(&server));
        assert_eq!(form["actor"], "https://social.example.com/users/alice");
        assert_eq!(form["content"], "hello");
        assert_eq!(form["to"], json!([PUBLIC_AUDIENCE]));
    }

    #[test]
    fn entomb_discards_extensions_and_records_former_type() {
        let server = server();
        let mut thing = Thing::new_local(ObjectType::Article);
        thing.set("content", "goodbye", &server).unwrap();

        thing.entomb().unwrap();

        assert!(thing.is_tombstone());
        assert_eq!(thing.get("content"), None);
        assert_eq!(thing.get_str("former_type").as_deref(), Some("Article"));

        let form = thing.activity_form(&server);
        assert_eq!(form["type"], "Tombstone");
        assert_eq!(form["former_type"], "Article");
    }

    #[test]
    fn entomb_twice_is_a_no_op() {
        let mut thing = Thing::new_local(ObjectType::Note);
        thing.entomb().unwrap();
        let after_first = thing.activity_form(&server());

        thing.entomb().unwrap();
        assert_eq!(thing.activity_form(&server()), after_first);
        assert_eq!(thing.get_str("former_type").as_deref(), Some("Note"));
    }

    #[test]
    fn entomb_rejects_remote_objects() {
        let mut thing = Thing::new_remote(
            ObjectType::Note,
            "https://remote.example/notes/1".to_string(),
        );
        assert!(matches!(thing.entomb(), Err(AppError::Validation(_))));
    }

    #[test]
    fn from_document_parses_fields_and_audiences() {
        let server = server();
        let doc = json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "id": "https://remote.example/activities/9",
            "type": "Follow",
            "actor": "https://remote.example/users/fred",
            "object": "https://social.example.com/users/alice",
            "to": ["https://social.example.com/users/alice"],
        });

        let thing = Thing::from_document(
            &doc,
            Some("https://remote.example/activities/9".to_string()),
            &server,
        )
        .unwrap();

        assert_eq!(thing.f_type, ObjectType::Follow);
        assert_eq!(
            thing.f_actor.as_deref(),
            Some("https://remote.example/users/fred")
        );
        assert_eq!(
            thing.get_str("object").as_deref(),
            Some("https://social.example.com/users/alice")
        );
        assert_eq!(thing.audience(AudienceField::To).len(), 1);
    }

    #[test]
    fn from_document_rejects_unknown_types() {
        let doc = json!({"type": "Blorp"});
        let result = Thing::from_document(&doc, None, &server());
        assert!(matches!(result, Err(AppError::MalformedActivity(_))));
    }
}
