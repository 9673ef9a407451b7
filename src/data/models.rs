//! Data models
//!
//! Rust structs representing stored entities. Object identifiers are
//! short 8-hex-digit strings regenerated on collision; audit records
//! (incoming envelopes) use ULIDs; timestamps use chrono.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Local object identifier: 8 lowercase hex digits.
///
/// Deliberately short and low-entropy; collisions are resolved by
/// regenerating and retrying the insert, never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortId(pub String);

impl ShortId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(format!("{:08x}", rand::random::<u32>()))
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ShortId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Envelope/audit record ID (ULID format, 26 characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ActivityPub types
// =============================================================================

/// Broad class of an ActivityPub type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// An action: carries side effects when received
    Activity,
    /// Something that can send and receive activities
    Actor,
    /// Plain content
    Object,
    /// Recognized but not directly creatable
    Abstract,
}

/// The closed enumeration of recognized ActivityPub types.
///
/// Anything outside this set is rejected at the parsing boundary; the
/// side-effect engine never sees an unknown type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    // Activities
    Accept,
    Add,
    Announce,
    Create,
    Delete,
    Follow,
    Like,
    Reject,
    Remove,
    Undo,
    Update,
    // Actors
    Application,
    Group,
    Organization,
    Person,
    Service,
    // Objects
    Article,
    Audio,
    Document,
    Event,
    Image,
    Note,
    Page,
    Place,
    Profile,
    Relationship,
    Tombstone,
    Video,
    // Abstract
    Collection,
    OrderedCollection,
}

impl ObjectType {
    /// Parse a type name. Case-sensitive, as ActivityPub type names are.
    pub fn from_name(name: &str) -> Option<Self> {
        use ObjectType::*;
        Some(match name {
            "Accept" => Accept,
            "Add" => Add,
            "Announce" => Announce,
            "Create" => Create,
            "Delete" => Delete,
            "Follow" => Follow,
            "Like" => Like,
            "Reject" => Reject,
            "Remove" => Remove,
            "Undo" => Undo,
            "Update" => Update,
            "Application" => Application,
            "Group" => Group,
            "Organization" => Organization,
            "Person" => Person,
            "Service" => Service,
            "Article" => Article,
            "Audio" => Audio,
            "Document" => Document,
            "Event" => Event,
            "Image" => Image,
            "Note" => Note,
            "Page" => Page,
            "Place" => Place,
            "Profile" => Profile,
            "Relationship" => Relationship,
            "Tombstone" => Tombstone,
            "Video" => Video,
            "Collection" => Collection,
            "OrderedCollection" => OrderedCollection,
            _ => return None,
        })
    }

    /// The wire name of this type.
    pub fn name(&self) -> &'static str {
        use ObjectType::*;
        match self {
            Accept => "Accept",
            Add => "Add",
            Announce => "Announce",
            Create => "Create",
            Delete => "Delete",
            Follow => "Follow",
            Like => "Like",
            Reject => "Reject",
            Remove => "Remove",
            Undo => "Undo",
            Update => "Update",
            Application => "Application",
            Group => "Group",
            Organization => "Organization",
            Person => "Person",
            Service => "Service",
            Article => "Article",
            Audio => "Audio",
            Document => "Document",
            Event => "Event",
            Image => "Image",
            Note => "Note",
            Page => "Page",
            Place => "Place",
            Profile => "Profile",
            Relationship => "Relationship",
            Tombstone => "Tombstone",
            Video => "Video",
            Collection => "Collection",
            OrderedCollection => "OrderedCollection",
        }
    }

    pub fn class(&self) -> TypeClass {
        use ObjectType::*;
        match self {
            Accept | Add | Announce | Create | Delete | Follow | Like | Reject | Remove
            | Undo | Update => TypeClass::Activity,
            Application | Group | Organization | Person | Service => TypeClass::Actor,
            Article | Audio | Document | Event | Image | Note | Page | Place | Profile
            | Relationship | Tombstone | Video => TypeClass::Object,
            Collection | OrderedCollection => TypeClass::Abstract,
        }
    }

    pub fn is_activity(&self) -> bool {
        self.class() == TypeClass::Activity
    }

    pub fn is_actor(&self) -> bool {
        self.class() == TypeClass::Actor
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Audiences
// =============================================================================

/// The recipient URI that addresses everyone.
///
/// A recognized sentinel, not a real actor: it is never a delivery
/// target and never resolved.
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// The five ActivityPub audience fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AudienceField {
    To,
    Cc,
    Bto,
    Bcc,
    Audience,
}

impl AudienceField {
    pub const ALL: [AudienceField; 5] = [
        AudienceField::To,
        AudienceField::Cc,
        AudienceField::Bto,
        AudienceField::Bcc,
        AudienceField::Audience,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "to" => AudienceField::To,
            "cc" => AudienceField::Cc,
            "bto" => AudienceField::Bto,
            "bcc" => AudienceField::Bcc,
            "audience" => AudienceField::Audience,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AudienceField::To => "to",
            AudienceField::Cc => "cc",
            AudienceField::Bto => "bto",
            AudienceField::Bcc => "bcc",
            AudienceField::Audience => "audience",
        }
    }

    /// Blind fields are stripped from delivered payloads.
    pub fn is_blind(&self) -> bool {
        matches!(self, AudienceField::Bto | AudienceField::Bcc)
    }
}

// =============================================================================
// Follow relationships
// =============================================================================

/// A follower/following edge between two actors, keyed by URI.
///
/// At most one relationship exists per (follower, following) pair.
/// `pending` means a Follow request awaits Accept/Reject.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FollowRelation {
    pub follower: String,
    pub following: String,
    pub pending: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Local actors
// =============================================================================

/// Side-record for a locally hosted actor.
///
/// The actor itself is an object in the store; this row carries the
/// parts that never federate (private key) and local policy.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LocalActor {
    /// Short id of the actor's object row
    pub number: String,
    pub preferred_username: String,
    /// RSA private key (PEM format)
    pub private_key_pem: String,
    /// RSA public key (PEM format)
    pub public_key_pem: String,
    /// Accept incoming Follow requests automatically
    pub auto_follow: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Inbound envelopes
// =============================================================================

/// The raw inbound envelope, persisted before parsing.
///
/// Kept for audit and to re-validate asynchronously when the signing
/// key itself had to be fetched; never required for correctness after
/// successful ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IncomingMessage {
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub content_type: String,
    pub date: String,
    pub digest: String,
    pub host: String,
    pub path: String,
    pub signature: String,
    pub body: String,
    /// Key id this envelope is parked on, when validation is deferred
    pub waiting_for: Option<String>,
}

// =============================================================================
// Remote fetch cache
// =============================================================================

/// Result status of the most recent fetch of a URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// A fetch is underway (or was interrupted)
    Pending,
    /// A usable document was retrieved
    Found,
    /// The remote reported 404
    NotFound,
    /// The remote reported 410; durable, never re-fetched
    Gone,
    /// Network/parse failure or unexpected status
    Error,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Pending => "pending",
            FetchStatus::Found => "found",
            FetchStatus::NotFound => "not_found",
            FetchStatus::Gone => "gone",
            FetchStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => FetchStatus::Pending,
            "found" => FetchStatus::Found,
            "not_found" => FetchStatus::NotFound,
            "gone" => FetchStatus::Gone,
            "error" => FetchStatus::Error,
            _ => return None,
        })
    }
}

/// Cached representation of a remote URI.
#[derive(Debug, Clone)]
pub struct RemoteCacheEntry {
    pub uri: String,
    pub status: FetchStatus,
    pub fetched_at: DateTime<Utc>,
    pub document: Option<serde_json::Value>,
}
