//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)
//!
//! The resulting [`AppConfig`] is constructed once at startup and passed
//! by reference into every component that needs it. There are no ambient
//! global lookups.

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
}

/// Server identity configuration
///
/// Bellhop does not bind a listener itself; the embedding HTTP layer
/// does. These values define how local object and actor URLs are
/// formatted, and how URIs are recognized as local.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

/// A local URL taken apart into the entity it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRef {
    /// An object URL: `{base}/obj/{number}`
    Object(String),
    /// An actor URL: `{base}/users/{username}`
    Actor(String),
    /// A per-actor collection URL: `{base}/users/{username}/{list}`
    Collection { username: String, list: String },
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// URL of a locally stored object, derived from its short identifier.
    pub fn object_url(&self, number: &str) -> String {
        format!("{}/obj/{}", self.base_url(), number)
    }

    /// URL of a local actor.
    pub fn actor_url(&self, username: &str) -> String {
        format!("{}/users/{}", self.base_url(), username)
    }

    /// URL of one of a local actor's collections
    /// (inbox, outbox, followers, following).
    pub fn collection_url(&self, username: &str, list: &str) -> String {
        format!("{}/users/{}/{}", self.base_url(), username, list)
    }

    /// URL of the instance-wide shared inbox.
    pub fn shared_inbox_url(&self) -> String {
        format!("{}/inbox", self.base_url())
    }

    /// Key id advertised for a local actor's signing key.
    pub fn key_id(&self, username: &str) -> String {
        format!("{}#main-key", self.actor_url(username))
    }

    /// Parse a URI that belongs to this instance.
    ///
    /// Returns `None` for foreign URIs and for local paths that do not
    /// name an object, an actor, or an actor collection.
    pub fn parse_local(&self, uri: &str) -> Option<LocalRef> {
        let base = self.base_url();
        let rest = uri.strip_prefix(&base)?;
        let rest = rest.strip_prefix('/')?;
        let mut segments = rest.trim_end_matches('/').split('/');

        match segments.next()? {
            "obj" => {
                let number = segments.next()?;
                if segments.next().is_some() || number.is_empty() {
                    return None;
                }
                Some(LocalRef::Object(number.to_string()))
            }
            "users" => {
                let username = segments.next()?;
                if username.is_empty() {
                    return None;
                }
                match segments.next() {
                    None => Some(LocalRef::Actor(username.to_string())),
                    Some(list)
                        if segments.next().is_none()
                            && matches!(list, "inbox" | "outbox" | "followers" | "following") =>
                    {
                        Some(LocalRef::Collection {
                            username: username.to_string(),
                            list: list.to_string(),
                        })
                    }
                    Some(_) => None,
                }
            }
            _ => None,
        }
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Federation tuning knobs
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Items per collection page (default: 50)
    pub page_size: usize,
    /// Maximum allowed skew on the signed Date header, in seconds
    pub max_date_skew_secs: i64,
    /// How long a cached remote fetch stays fresh, in seconds
    pub fetch_freshness_secs: i64,
    /// TTL for cached remote public keys, in seconds
    pub key_cache_ttl_secs: u64,
    /// Maximum concurrent outbound deliveries
    pub deliver_concurrency: usize,
    /// Per-destination delivery timeout, in seconds
    pub deliver_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (BELLHOP_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.protocol", "https")?
            .set_default("federation.page_size", 50)?
            .set_default("federation.max_date_skew_secs", 300)?
            .set_default("federation.fetch_freshness_secs", 3600)?
            .set_default("federation.key_cache_ttl_secs", 3600)?
            .set_default("federation.deliver_concurrency", 10)?
            .set_default("federation.deliver_timeout_secs", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (BELLHOP_*)
            .add_source(
                Environment::with_prefix("BELLHOP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if !matches!(self.server.protocol.as_str(), "http" | "https") {
            return Err(crate::error::AppError::Config(format!(
                "server.protocol must be http or https, got {}",
                self.server.protocol
            )));
        }

        if self.server.domain.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "server.domain must not be empty".to_string(),
            ));
        }

        if self.federation.page_size == 0 {
            return Err(crate::error::AppError::Config(
                "federation.page_size must be greater than 0".to_string(),
            ));
        }

        if self.federation.max_date_skew_secs <= 0 {
            return Err(crate::error::AppError::Config(
                "federation.max_date_skew_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                domain: "social.example.com".to_string(),
                protocol: "https".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/bellhop-test.db"),
            },
            federation: FederationConfig {
                page_size: 50,
                max_date_skew_secs: 300,
                fetch_freshness_secs: 3600,
                key_cache_ttl_secs: 3600,
                deliver_concurrency: 10,
                deliver_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_reference_values() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_page_size() {
        let mut config = valid_config();
        config.federation.page_size = 0;

        let error = config.validate().expect_err("page_size 0 must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("federation.page_size")
        ));
    }

    #[test]
    fn validate_rejects_unknown_protocol() {
        let mut config = valid_config();
        config.server.protocol = "gopher".to_string();

        let error = config.validate().expect_err("unknown protocol must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("server.protocol")
        ));
    }

    #[test]
    fn url_formats_compose_from_base_url() {
        let config = valid_config();
        assert_eq!(
            config.server.object_url("a1b2c3d4"),
            "https://social.example.com/obj/a1b2c3d4"
        );
        assert_eq!(
            config.server.actor_url("alice"),
            "https://social.example.com/users/alice"
        );
        assert_eq!(
            config.server.collection_url("alice", "followers"),
            "https://social.example.com/users/alice/followers"
        );
        assert_eq!(
            config.server.shared_inbox_url(),
            "https://social.example.com/inbox"
        );
    }

    #[test]
    fn parse_local_recognizes_objects_actors_and_collections() {
        let config = valid_config();

        assert_eq!(
            config
                .server
                .parse_local("https://social.example.com/obj/00c0ffee"),
            Some(LocalRef::Object("00c0ffee".to_string()))
        );
        assert_eq!(
            config
                .server
                .parse_local("https://social.example.com/users/alice"),
            Some(LocalRef::Actor("alice".to_string()))
        );
        assert_eq!(
            config
                .server
                .parse_local("https://social.example.com/users/alice/followers"),
            Some(LocalRef::Collection {
                username: "alice".to_string(),
                list: "followers".to_string(),
            })
        );
    }

    #[test]
    fn parse_local_rejects_foreign_and_unknown_paths() {
        let config = valid_config();

        assert_eq!(
            config
                .server
                .parse_local("https://other.example.com/users/alice"),
            None
        );
        assert_eq!(
            config.server.parse_local("https://social.example.com/about"),
            None
        );
        assert_eq!(
            config
                .server
                .parse_local("https://social.example.com/users/alice/unknown"),
            None
        );
    }
}
