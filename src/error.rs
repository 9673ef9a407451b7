//! Error types for Bellhop
//!
//! All errors in the crate are converted to `AppError`. The embedding
//! HTTP layer can translate any variant to a response status via
//! [`AppError::status_code`] without depending on a web framework.

use http::StatusCode;
use thiserror::Error;

/// Outcome of a remote fetch that did not produce a usable document.
///
/// `Gone` is durable: the URI is never fetched again and is treated as
/// tombstone-equivalent by callers. The other variants are retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The remote server reported 404
    #[error("remote object not found")]
    NotFound,

    /// The remote server reported 410; never re-fetched
    #[error("remote object gone")]
    Gone,

    /// Network failure, malformed response, or unexpected status
    #[error("remote fetch failed: {0}")]
    RemoteError(String),
}

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Inbound HTTP signature could not be verified (401)
    ///
    /// Covers unparseable Signature headers, unknown algorithms, stale
    /// Date headers, digest mismatches, and cryptographic failures.
    /// The caller must not proceed to ingestion.
    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    /// An accepted activity turned out to be malformed downstream of
    /// signature validation (unknown/abstract type, ownership mismatch).
    ///
    /// Internal only: the triggering activity is deleted and the remote
    /// sender never sees more than the original 2xx acceptance.
    #[error("Malformed activity: {0}")]
    MalformedActivity(String),

    /// Remote fetch failure (see [`FetchFailure`])
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchFailure),

    /// A single outbound delivery failed; never affects other
    /// destinations or the stored activity
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Map an error to the HTTP status the embedding layer should serve.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Fetch(FetchFailure::NotFound) => StatusCode::NOT_FOUND,
            AppError::Fetch(FetchFailure::Gone) => StatusCode::GONE,
            AppError::Fetch(FetchFailure::RemoteError(_)) => StatusCode::BAD_GATEWAY,
            AppError::HttpClient(_) | AppError::Delivery(_) => StatusCode::BAD_GATEWAY,
            AppError::MalformedActivity(_)
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
