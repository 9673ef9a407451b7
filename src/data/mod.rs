//! Data layer module
//!
//! Handles all persistence:
//! - The dynamic object store ("things") and its audience rows
//! - Follow relationship tracking
//! - Inbound envelope archival and the remote fetch cache

mod database;
mod models;
mod thing;

pub use database::{Database, Rendered};
pub use models::*;
pub use thing::{FieldInput, Thing};
