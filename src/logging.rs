//! Tracing setup
//!
//! Bellhop logs through `tracing`; the embedding binary decides when to
//! install a subscriber. This helper wires the configured level and
//! format the same way for every embedder.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Install a global tracing subscriber from [`LoggingConfig`].
///
/// `RUST_LOG` overrides the configured level when set. Calling this
/// twice panics (the global subscriber can only be set once), so only
/// the outermost binary should call it.
pub fn init(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("bellhop={}", config.level).into());

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
