//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins when set,
//! otherwise `logging.level` applies. Output is JSON by default; set
//! `logging.format: text` for human-readable lines during development.

use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::{LogFormat, LoggingConfig};

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the subscriber; returns `false` if one was already installed
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = env_filter(&config.level);

    let installed = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Text => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok(),
    };

    if !installed {
        debug!("Tracing subscriber already initialized, skipping initialization");
    }
    installed
}

/// Text logging at `info`, used when the configuration itself failed
pub fn init_fallback_logging() -> bool {
    init_logging(&LoggingConfig {
        level: "info".to_string(),
        format: LogFormat::Text,
    })
}
