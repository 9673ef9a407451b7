//! ActivityPub federation module
//!
//! Handles:
//! - Inbound ingestion (signature verification, envelope archival,
//!   side effects)
//! - Activity delivery (outbox fan-out)
//! - HTTP Signatures
//! - Remote object fetching and caching
//! - Public key caching
//! - Collection serialization

mod collection;
mod delivery;
mod engine;
mod fetch;
mod ingest;
mod key_cache;
mod signature;

pub use collection::CollectionPager;
pub use delivery::{DeliveryDispatcher, DeliveryOutcome};
pub use engine::{Outcome, SideEffects};
pub use fetch::RemoteFetcher;
pub use ingest::{Ingested, IngestionPipeline};
pub use key_cache::PublicKeyCache;
pub use signature::{
    KeyResolver, extract_signature_key_id, fetch_public_key, key_id_matches_actor,
    parse_signature_header, sign_request, verify_request,
};
