//! Diagnostics on stderr through `tracing`.
//!
//! The filter comes from the first of: `RUST_LOG`, the `-v` count on the
//! command line, `log.level` in the settings.

use crate::config::{ConfigError, LogSettings};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter directive for `verbosity` repetitions of `-v`
pub fn verbosity_directive(verbosity: u8, settings: &LogSettings) -> String {
    match verbosity {
        0 => settings.level.clone(),
        1 => "gitdeck=debug".to_string(),
        _ => "gitdeck=trace".to_string(),
    }
}

fn filter(settings: &LogSettings, verbosity: u8) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = verbosity_directive(verbosity, settings);
    EnvFilter::try_new(&directive).map_err(|e| ConfigError::Invalid {
        key: "log.level".to_string(),
        message: format!("'{directive}': {e}"),
    })
}

/// Install the global subscriber.
///
/// Calling it again keeps the subscriber installed first.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if `log.level` is not a valid filter.
pub fn init(settings: &LogSettings, verbosity: u8) -> Result<(), ConfigError> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity > 1)
        .with_level(true)
        .with_filter(filter(settings, verbosity)?);

    // Fails only when a subscriber is already set
    let _ = tracing_subscriber::registry().with(console).try_init();
    Ok(())
}
