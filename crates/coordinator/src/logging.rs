//! Tracing subscriber setup.

use std::io::IsTerminal;

use teamchain_types::{
    TeamError,
    config::{LogFormat, LoggingConfig},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Whether `format` resolves to JSON output on this process.
///
/// `Auto` picks JSON when stdout is not a terminal.
pub fn use_json(format: LogFormat) -> bool {
    match format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        LogFormat::Auto => !std::io::stdout().is_terminal(),
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`.
///
/// # Errors
///
/// Returns [`TeamError::Config`] if the filter does not parse or a global
/// subscriber is already installed.
pub fn try_init_logging(config: &LoggingConfig) -> Result<(), TeamError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|err| TeamError::Config {
            message: format!("invalid log filter {:?}: {err}", config.filter),
        })?,
    };

    let installed = if use_json(config.format) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init()
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer()).try_init()
    };
    installed.map_err(|err| TeamError::Config { message: format!("logging already initialized: {err}") })
}
