//! Logging setup.
//!
//! Library code logs through the `log` macros and opens `tracing` spans.
//! [`init_logging`] installs one global subscriber that receives both.

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::OcrDeskError;

/// `RUST_LOG` wins over the configured level when it is set and valid.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, OcrDeskError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| {
        OcrDeskError::Logging(format!("Invalid log level '{}': {}", config.level, e))
    })
}

/// Installs the global subscriber and forwards `log` records into it.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), OcrDeskError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))
    };
    installed.map_err(|e| OcrDeskError::Logging(e.to_string()))?;

    LogTracer::init().map_err(|e| OcrDeskError::Logging(e.to_string()))?;
    log::debug!("Logging initialized at level '{}'", config.level);
    Ok(())
}
