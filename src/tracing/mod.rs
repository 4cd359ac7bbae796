//! Structured logging
//!
//! Installs the global `tracing` subscriber from the `logging` config
//! section. `RUST_LOG`, when set, takes precedence over the configured
//! level.

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Tracing error types
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("Invalid log filter {filter:?}: {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Initialization error: {0}")]
    InitError(String),
}

/// Build the filter: `RUST_LOG` if set, else the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, TracingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|err| TracingError::InvalidFilter {
        filter: config.level.clone(),
        message: err.to_string(),
    })
}

/// Initialize tracing with the given configuration
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TracingError> {
    if !config.enabled {
        return Ok(());
    }

    let env_filter = build_filter(config)?;

    match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    }
    .map_err(|err| TracingError::InitError(err.to_string()))?;

    info!(
        level = %config.level,
        format = ?config.format,
        "tracing initialized for pollcast"
    );
    Ok(())
}
