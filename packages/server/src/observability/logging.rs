//! Logging subsystem initialization.
//!
//! The `tracing` macros are the logging API everywhere in the crate; this
//! module only installs the subscriber. Production gets one JSON object per
//! line on stdout; development gets the human-readable formatter. The filter
//! honors `RUST_LOG`, falling back to the configured level.
//!
//! Initialization degrades rather than fails: if a global subscriber is
//! already installed (tests, embedding), the existing sink keeps receiving
//! events and application code is never interrupted.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, LogFormat};

/// Installs the global subscriber according to the configuration.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let result = match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init(),
    };

    if result.is_err() {
        // A subscriber is already installed; keep it.
        tracing::debug!("logging already initialized, keeping existing subscriber");
    }
}
