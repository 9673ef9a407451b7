//! SQLite persistence
//!
//! All database access goes through this module. The `Database` wrapper
//! owns the pool and the object store's persistence rules: short-id
//! collision retry, audience rows, the follow tracker's transactional
//! transitions, inbound envelopes, the remote fetch cache, and the
//! post-write field hooks.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};

use super::models::*;
use super::thing::{FieldInput, Thing};
use crate::config::{LocalRef, ServerConfig};
use crate::error::AppError;

/// A rendered object document, ready for the HTTP layer to serve.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// Serve with 200
    Ok(Value),
    /// A tombstoned object; serve the body with 410
    Gone(Value),
}

impl Rendered {
    pub fn document(&self) -> &Value {
        match self {
            Rendered::Ok(doc) | Rendered::Gone(doc) => doc,
        }
    }
}

/// Post-write hooks, registered per field name.
///
/// A hook runs after the store persists an assignment to its field.
#[derive(Debug, Clone, Copy)]
enum FieldHook {
    /// Index `tag` entries of type Mention into the mention edge set
    IndexMentions,
}

fn field_hook(name: &str) -> Option<FieldHook> {
    match name {
        "tag" => Some(FieldHook::IndexMentions),
        _ => None,
    }
}

fn is_number_collision(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.message().contains("things.number")
        }
        _ => false,
    }
}

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
    server: ServerConfig,
}

impl Database {
    /// Open (creating if needed) the SQLite database at `path`.
    ///
    /// The schema is created idempotently; schema *versioning* is the
    /// embedding application's concern.
    pub async fn connect(path: &Path, server: ServerConfig) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let db = Self { pool, server };
        db.init_schema().await?;

        tracing::info!(path = %path.display(), "Database connected");
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), AppError> {
        // One statement per call; sqlx prepares statements individually.
        const SCHEMA: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS things (
                number      TEXT PRIMARY KEY,
                f_type      TEXT NOT NULL,
                f_actor     TEXT,
                f_name      TEXT NOT NULL DEFAULT '',
                remote_url  TEXT UNIQUE,
                active      INTEGER NOT NULL DEFAULT 1,
                other_fields TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audiences (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                parent    TEXT NOT NULL REFERENCES things(number) ON DELETE CASCADE,
                field     TEXT NOT NULL,
                recipient TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_audiences_parent ON audiences(parent)",
            r#"
            CREATE TABLE IF NOT EXISTS follows (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                follower   TEXT NOT NULL,
                following  TEXT NOT NULL,
                pending    INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                UNIQUE (follower, following)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS local_actors (
                number             TEXT PRIMARY KEY REFERENCES things(number),
                preferred_username TEXT NOT NULL UNIQUE,
                private_key_pem    TEXT NOT NULL,
                public_key_pem     TEXT NOT NULL,
                auto_follow        INTEGER NOT NULL DEFAULT 1,
                created_at         TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS incoming_messages (
                id           TEXT PRIMARY KEY,
                received_at  TEXT NOT NULL,
                content_type TEXT NOT NULL DEFAULT '',
                date         TEXT NOT NULL DEFAULT '',
                digest       TEXT NOT NULL DEFAULT '',
                host         TEXT NOT NULL DEFAULT '',
                path         TEXT NOT NULL DEFAULT '',
                signature    TEXT NOT NULL DEFAULT '',
                body         TEXT NOT NULL DEFAULT '',
                waiting_for  TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS remote_cache (
                uri        TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                document   TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS likes (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                actor      TEXT NOT NULL,
                object_uri TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (actor, object_uri)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS mentions (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                parent TEXT NOT NULL REFERENCES things(number) ON DELETE CASCADE,
                href   TEXT NOT NULL,
                UNIQUE (parent, href)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS outbound_queue (
                number    TEXT PRIMARY KEY REFERENCES things(number) ON DELETE CASCADE,
                queued_at TEXT NOT NULL
            )
            "#,
        ];

        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    // =========================================================================
    // Things
    // =========================================================================

    /// Persist a freshly created thing.
    ///
    /// Short identifiers are low-entropy; a collision regenerates the
    /// number and retries until the insert succeeds. Collisions are
    /// never surfaced to callers.
    pub async fn save_new(&self, thing: &mut Thing) -> Result<(), AppError> {
        loop {
            let result = sqlx::query(
                r#"
                INSERT INTO things (
                    number, f_type, f_actor, f_name, remote_url, active,
                    other_fields, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(thing.number.as_str())
            .bind(thing.f_type.name())
            .bind(&thing.f_actor)
            .bind(&thing.f_name)
            .bind(&thing.remote_url)
            .bind(thing.active)
            .bind(Value::Object(thing.extensions().clone()).to_string())
            .bind(thing.created_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => break,
                Err(error) if is_number_collision(&error) => {
                    let old = thing.number.clone();
                    thing.number = ShortId::new();
                    tracing::debug!(old = %old, new = %thing.number, "short id collision, retrying");
                }
                Err(error) => return Err(error.into()),
            }
        }

        self.replace_audiences(thing).await?;
        self.run_field_hooks(thing).await?;
        Ok(())
    }

    /// Persist changes to an existing thing.
    pub async fn update(&self, thing: &Thing) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE things
            SET f_type = ?, f_actor = ?, f_name = ?, active = ?, other_fields = ?
            WHERE number = ?
            "#,
        )
        .bind(thing.f_type.name())
        .bind(&thing.f_actor)
        .bind(&thing.f_name)
        .bind(thing.active)
        .bind(Value::Object(thing.extensions().clone()).to_string())
        .bind(thing.number.as_str())
        .execute(&self.pool)
        .await?;

        self.replace_audiences(thing).await?;
        self.run_field_hooks(thing).await?;
        Ok(())
    }

    /// The store-level `set` operation: assign a field, persist, and
    /// run the field's post-write hook if one is registered.
    pub async fn set_field<'a>(
        &self,
        thing: &mut Thing,
        name: &str,
        value: impl Into<FieldInput<'a>>,
    ) -> Result<(), AppError> {
        thing.set(name, value, &self.server)?;
        self.update(thing).await
    }

    async fn replace_audiences(&self, thing: &Thing) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM audiences WHERE parent = ?")
            .bind(thing.number.as_str())
            .execute(&mut *tx)
            .await?;

        for (field, recipients) in thing.audiences() {
            for recipient in recipients {
                sqlx::query("INSERT INTO audiences (parent, field, recipient) VALUES (?, ?, ?)")
                    .bind(thing.number.as_str())
                    .bind(field.name())
                    .bind(recipient)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn run_field_hooks(&self, thing: &Thing) -> Result<(), AppError> {
        for (name, _) in thing.extensions() {
            if let Some(hook) = field_hook(name) {
                match hook {
                    FieldHook::IndexMentions => self.index_mentions(thing).await?,
                }
            }
        }
        Ok(())
    }

    /// Load a thing by its short identifier.
    pub async fn get_by_number(&self, number: &str) -> Result<Option<Thing>, AppError> {
        let row = sqlx::query(
            "SELECT number, f_type, f_actor, f_name, remote_url, active, other_fields, created_at
             FROM things WHERE number = ?",
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.assemble_thing(row).await?)),
            None => Ok(None),
        }
    }

    /// Resolve a URI against the store without touching the network.
    ///
    /// Local object and actor URLs resolve through their identifiers;
    /// anything else is matched against stored `remote_url`s.
    pub async fn find_stored(&self, uri: &str) -> Result<Option<Thing>, AppError> {
        match self.server.parse_local(uri) {
            Some(LocalRef::Object(number)) => self.get_by_number(&number).await,
            Some(LocalRef::Actor(username)) => match self.get_local_actor(&username).await? {
                Some(actor) => self.get_by_number(&actor.number).await,
                None => Ok(None),
            },
            Some(LocalRef::Collection { .. }) => Ok(None),
            None => {
                let row = sqlx::query(
                    "SELECT number, f_type, f_actor, f_name, remote_url, active, other_fields, created_at
                     FROM things WHERE remote_url = ?",
                )
                .bind(uri)
                .fetch_optional(&self.pool)
                .await?;

                match row {
                    Some(row) => Ok(Some(self.assemble_thing(row).await?)),
                    None => Ok(None),
                }
            }
        }
    }

    /// Hard-delete a thing and its owned rows.
    ///
    /// Only used for malformed never-activated records; everything else
    /// is entombed instead.
    pub async fn delete_thing(&self, number: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM things WHERE number = ?")
            .bind(number)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Activities attributed to an actor, oldest first.
    ///
    /// Backs the outbox collection.
    pub async fn activities_by_actor(&self, actor_uri: &str) -> Result<Vec<Thing>, AppError> {
        let rows = sqlx::query(
            "SELECT number, f_type, f_actor, f_name, remote_url, active, other_fields, created_at
             FROM things WHERE f_actor = ? ORDER BY created_at, number",
        )
        .bind(actor_uri)
        .fetch_all(&self.pool)
        .await?;

        let mut things = Vec::with_capacity(rows.len());
        for row in rows {
            things.push(self.assemble_thing(row).await?);
        }
        Ok(things)
    }

    async fn assemble_thing(&self, row: sqlx::sqlite::SqliteRow) -> Result<Thing, AppError> {
        let number: String = row.try_get("number")?;
        let type_name: String = row.try_get("f_type")?;
        let f_type = ObjectType::from_name(&type_name).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "stored thing {} has unknown type {}",
                number,
                type_name
            ))
        })?;

        let other_fields: String = row.try_get("other_fields")?;
        let extensions: Map<String, Value> = match serde_json::from_str(&other_fields) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!(number = %number, "stored extension fields were not JSON; discarding");
                Map::new()
            }
        };

        let audience_rows =
            sqlx::query_as::<_, (String, String)>(
                "SELECT field, recipient FROM audiences WHERE parent = ? ORDER BY id",
            )
            .bind(&number)
            .fetch_all(&self.pool)
            .await?;

        let mut audiences: BTreeMap<AudienceField, BTreeSet<String>> = BTreeMap::new();
        for (field, recipient) in audience_rows {
            if let Some(field) = AudienceField::from_name(&field) {
                audiences.entry(field).or_default().insert(recipient);
            }
        }

        Ok(Thing::from_parts(
            ShortId::from_string(number),
            f_type,
            row.try_get("f_actor")?,
            row.try_get("f_name")?,
            row.try_get("remote_url")?,
            row.try_get("active")?,
            row.try_get::<DateTime<Utc>, _>("created_at")?,
            extensions,
            audiences,
        ))
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Render a thing as the document the HTTP layer serves.
    ///
    /// Local actors are decorated with their collection URLs, public
    /// key, and default images. Tombstoned objects come back as
    /// [`Rendered::Gone`] so the caller can answer 410.
    pub async fn render_object(&self, thing: &Thing) -> Result<Rendered, AppError> {
        let mut form = thing.activity_form(&self.server);

        let mut context = json!("https://www.w3.org/ns/activitystreams");

        if thing.f_type.is_actor() && thing.is_local() {
            if let Some(actor) = self.local_actor_for_number(thing.number.as_str()).await? {
                self.decorate_actor(&mut form, &actor);
                context = json!([
                    "https://www.w3.org/ns/activitystreams",
                    "https://w3id.org/security/v1"
                ]);
            }
        }

        if let Some(map) = form.as_object_mut() {
            map.insert("@context".to_string(), context);
        }

        if thing.is_tombstone() {
            return Ok(Rendered::Gone(form));
        }
        Ok(Rendered::Ok(form))
    }

    fn decorate_actor(&self, form: &mut Value, actor: &LocalActor) {
        let Some(map) = form.as_object_mut() else {
            return;
        };

        let username = &actor.preferred_username;
        let actor_url = self.server.actor_url(username);

        map.insert("preferredUsername".to_string(), json!(username));
        map.insert("url".to_string(), json!(actor_url));

        for list in ["inbox", "outbox", "followers", "following"] {
            map.insert(
                list.to_string(),
                json!(self.server.collection_url(username, list)),
            );
        }

        map.insert(
            "endpoints".to_string(),
            json!({ "sharedInbox": self.server.shared_inbox_url() }),
        );

        map.insert(
            "publicKey".to_string(),
            json!({
                "id": self.server.key_id(username),
                "owner": actor_url,
                "publicKeyPem": actor.public_key_pem,
            }),
        );

        // Default images, unless the actor has set its own.
        if !map.contains_key("icon") {
            map.insert(
                "icon".to_string(),
                json!({
                    "type": "Image",
                    "mediaType": "image/jpeg",
                    "url": format!("{}/static/defaults/avatar.jpg", self.server.base_url()),
                }),
            );
        }
        if !map.contains_key("header") {
            map.insert(
                "header".to_string(),
                json!({
                    "type": "Image",
                    "mediaType": "image/jpeg",
                    "url": format!("{}/static/defaults/header.jpg", self.server.base_url()),
                }),
            );
        }
    }

    // =========================================================================
    // Local actors
    // =========================================================================

    /// Create a locally hosted actor with a fresh RSA key pair.
    pub async fn create_local_actor(
        &self,
        username: &str,
        auto_follow: bool,
    ) -> Result<LocalActor, AppError> {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
        use rsa::{RsaPrivateKey, RsaPublicKey};

        tracing::info!(username, "generating key pair for new local actor");

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|e| AppError::Internal(e.into()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(e.into()))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(e.into()))?;

        let mut thing = Thing::new_local(ObjectType::Person);
        thing.set("name", username, &self.server)?;
        thing.set("preferredUsername", username, &self.server)?;
        self.save_new(&mut thing).await?;

        let actor = LocalActor {
            number: thing.number.as_str().to_string(),
            preferred_username: username.to_string(),
            private_key_pem,
            public_key_pem,
            auto_follow,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO local_actors (
                number, preferred_username, private_key_pem, public_key_pem,
                auto_follow, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&actor.number)
        .bind(&actor.preferred_username)
        .bind(&actor.private_key_pem)
        .bind(&actor.public_key_pem)
        .bind(actor.auto_follow)
        .bind(actor.created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(username, number = %actor.number, "local actor created");
        Ok(actor)
    }

    pub async fn get_local_actor(&self, username: &str) -> Result<Option<LocalActor>, AppError> {
        let actor = sqlx::query_as::<_, LocalActor>(
            "SELECT * FROM local_actors WHERE preferred_username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(actor)
    }

    async fn local_actor_for_number(&self, number: &str) -> Result<Option<LocalActor>, AppError> {
        let actor = sqlx::query_as::<_, LocalActor>("SELECT * FROM local_actors WHERE number = ?")
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(actor)
    }

    /// Resolve an actor URL to a local actor, if it names one.
    pub async fn local_actor_for_url(&self, uri: &str) -> Result<Option<LocalActor>, AppError> {
        match self.server.parse_local(uri) {
            Some(LocalRef::Actor(username)) => self.get_local_actor(&username).await,
            _ => Ok(None),
        }
    }

    // =========================================================================
    // Follow tracker
    // =========================================================================

    /// Record a pending follow request.
    ///
    /// A no-op when any relationship (pending or accepted) already
    /// exists for the pair.
    pub async fn request_follow(&self, follower: &str, following: &str) -> Result<(), AppError> {
        sqlx::query(
            "INSERT OR IGNORE INTO follows (follower, following, pending, created_at)
             VALUES (?, ?, 1, ?)",
        )
        .bind(follower)
        .bind(following)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create or confirm a non-pending relationship (auto-accept path).
    ///
    /// # Returns
    /// `true` when this call changed state (created the edge or
    /// transitioned it out of pending). Under concurrent duplicate
    /// Follows only one caller sees `true`, so only one Accept is
    /// synthesized.
    pub async fn confirm_follow(&self, follower: &str, following: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO follows (follower, following, pending, created_at)
            VALUES (?, ?, 0, ?)
            ON CONFLICT (follower, following)
            DO UPDATE SET pending = 0 WHERE follows.pending = 1
            "#,
        )
        .bind(follower)
        .bind(following)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition an existing pending relationship to accepted.
    ///
    /// Compare-and-swap on the pending flag: never creates an edge, and
    /// of two concurrent Accepts only one returns `true`.
    pub async fn accept_follow(&self, follower: &str, following: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE follows SET pending = 0 WHERE follower = ? AND following = ? AND pending = 1",
        )
        .bind(follower)
        .bind(following)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove a relationship entirely, whatever its state.
    pub async fn remove_follow(&self, follower: &str, following: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM follows WHERE follower = ? AND following = ?")
            .bind(follower)
            .bind(following)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn follow_state(
        &self,
        follower: &str,
        following: &str,
    ) -> Result<Option<FollowRelation>, AppError> {
        let relation = sqlx::query_as::<_, FollowRelation>(
            "SELECT follower, following, pending, created_at FROM follows
             WHERE follower = ? AND following = ?",
        )
        .bind(follower)
        .bind(following)
        .fetch_optional(&self.pool)
        .await?;

        Ok(relation)
    }

    /// Accepted followers of an actor, oldest first.
    pub async fn followers_of(&self, following: &str) -> Result<Vec<String>, AppError> {
        let followers = sqlx::query_scalar::<_, String>(
            "SELECT follower FROM follows WHERE following = ? AND pending = 0
             ORDER BY created_at, id",
        )
        .bind(following)
        .fetch_all(&self.pool)
        .await?;

        Ok(followers)
    }

    /// Actors an actor follows (accepted), oldest first.
    pub async fn following_of(&self, follower: &str) -> Result<Vec<String>, AppError> {
        let following = sqlx::query_scalar::<_, String>(
            "SELECT following FROM follows WHERE follower = ? AND pending = 0
             ORDER BY created_at, id",
        )
        .bind(follower)
        .fetch_all(&self.pool)
        .await?;

        Ok(following)
    }

    // =========================================================================
    // Inbound envelopes
    // =========================================================================

    /// Archive a raw inbound envelope.
    pub async fn store_envelope(&self, message: &IncomingMessage) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO incoming_messages (
                id, received_at, content_type, date, digest, host, path,
                signature, body, waiting_for
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(message.received_at)
        .bind(&message.content_type)
        .bind(&message.date)
        .bind(&message.digest)
        .bind(&message.host)
        .bind(&message.path)
        .bind(&message.signature)
        .bind(&message.body)
        .bind(&message.waiting_for)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Park an envelope until its signing key can be fetched.
    pub async fn park_envelope(&self, id: &str, key_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE incoming_messages SET waiting_for = ? WHERE id = ?")
            .bind(key_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Mark an envelope's validation as finished.
    pub async fn clear_waiting(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE incoming_messages SET waiting_for = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Envelopes parked on a key, oldest first.
    pub async fn envelopes_waiting_for(
        &self,
        key_id: &str,
    ) -> Result<Vec<IncomingMessage>, AppError> {
        let envelopes = sqlx::query_as::<_, IncomingMessage>(
            "SELECT * FROM incoming_messages WHERE waiting_for = ? ORDER BY received_at",
        )
        .bind(key_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(envelopes)
    }

    // =========================================================================
    // Remote fetch cache
    // =========================================================================

    pub async fn cache_get(&self, uri: &str) -> Result<Option<RemoteCacheEntry>, AppError> {
        let row = sqlx::query(
            "SELECT uri, status, fetched_at, document FROM remote_cache WHERE uri = ?",
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_str: String = row.try_get("status")?;
        let status = FetchStatus::from_str(&status_str).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("unknown cache status: {}", status_str))
        })?;

        let document: Option<String> = row.try_get("document")?;
        let document = document.and_then(|raw| serde_json::from_str(&raw).ok());

        Ok(Some(RemoteCacheEntry {
            uri: row.try_get("uri")?,
            status,
            fetched_at: row.try_get::<DateTime<Utc>, _>("fetched_at")?,
            document,
        }))
    }

    /// Record the outcome of a fetch.
    ///
    /// A `gone` row is durable: this upsert leaves it untouched.
    pub async fn cache_put(&self, entry: &RemoteCacheEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO remote_cache (uri, status, fetched_at, document)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (uri) DO UPDATE SET
                status = excluded.status,
                fetched_at = excluded.fetched_at,
                document = excluded.document
            WHERE remote_cache.status != 'gone'
            "#,
        )
        .bind(&entry.uri)
        .bind(entry.status.as_str())
        .bind(entry.fetched_at)
        .bind(entry.document.as_ref().map(|doc| doc.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Durably mark a remote URI as gone (tombstone-equivalent).
    pub async fn cache_mark_gone(&self, uri: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO remote_cache (uri, status, fetched_at, document)
            VALUES (?, 'gone', ?, NULL)
            ON CONFLICT (uri) DO UPDATE SET
                status = 'gone', fetched_at = excluded.fetched_at, document = NULL
            "#,
        )
        .bind(uri)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Likes
    // =========================================================================

    /// Record a favourite edge. Idempotent.
    pub async fn add_like(&self, actor: &str, object_uri: &str) -> Result<(), AppError> {
        sqlx::query(
            "INSERT OR IGNORE INTO likes (actor, object_uri, created_at) VALUES (?, ?, ?)",
        )
        .bind(actor)
        .bind(object_uri)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove_like(&self, actor: &str, object_uri: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM likes WHERE actor = ? AND object_uri = ?")
            .bind(actor)
            .bind(object_uri)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn has_like(&self, actor: &str, object_uri: &str) -> Result<bool, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM likes WHERE actor = ? AND object_uri = ?",
        )
        .bind(actor)
        .bind(object_uri)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    // =========================================================================
    // Mentions (post-write hook on "tag")
    // =========================================================================

    async fn index_mentions(&self, thing: &Thing) -> Result<(), AppError> {
        let mut hrefs = Vec::new();
        if let Some(Value::Array(tags)) = thing.get("tag") {
            for tag in &tags {
                let is_mention = tag
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t == "Mention");
                if !is_mention {
                    continue;
                }
                if let Some(href) = tag.get("href").and_then(Value::as_str) {
                    hrefs.push(href.to_string());
                }
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM mentions WHERE parent = ?")
            .bind(thing.number.as_str())
            .execute(&mut *tx)
            .await?;

        for href in &hrefs {
            sqlx::query("INSERT OR IGNORE INTO mentions (parent, href) VALUES (?, ?)")
                .bind(thing.number.as_str())
                .bind(href)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn mentions_of(&self, number: &str) -> Result<Vec<String>, AppError> {
        let hrefs = sqlx::query_scalar::<_, String>(
            "SELECT href FROM mentions WHERE parent = ? ORDER BY id",
        )
        .bind(number)
        .fetch_all(&self.pool)
        .await?;

        Ok(hrefs)
    }

    // =========================================================================
    // Outbound queue
    // =========================================================================

    /// Enqueue an activity for delivery.
    ///
    /// The dispatcher is stateless per call; retry scheduling belongs
    /// to the external task-queue collaborator draining this queue.
    pub async fn queue_outbound(&self, number: &str) -> Result<(), AppError> {
        sqlx::query("INSERT OR IGNORE INTO outbound_queue (number, queued_at) VALUES (?, ?)")
            .bind(number)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Queued activities, oldest first.
    pub async fn pending_outbound(&self) -> Result<Vec<ShortId>, AppError> {
        let numbers = sqlx::query_scalar::<_, String>(
            "SELECT number FROM outbound_queue ORDER BY queued_at, number",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(numbers.into_iter().map(ShortId::from_string).collect())
    }

    pub async fn clear_outbound(&self, number: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM outbound_queue WHERE number = ?")
            .bind(number)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
