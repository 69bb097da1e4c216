//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::{
    config::Settings,
    error::{Error, Result},
};

/// Install a JSON `tracing` subscriber filtered at the configured level
///
/// An invalid filter directive falls back to `info`. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(settings: &Settings) -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| Error::configuration(format!("tracing subscriber: {}", e)))?;

    tracing::info!(log_level = %settings.log_level, "Tracing initialized");
    Ok(())
}
