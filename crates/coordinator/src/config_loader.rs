//! Loading [`TeamsConfig`] from files and the environment.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. the config file, or `teamchain.toml` / `/etc/teamchain/config.toml` when none is given
//! 3. `TEAMCHAIN__*` environment variables, `__` separating nested keys
//!    (`TEAMCHAIN__REKEY__MAX_CHANGES_PER_LINK=50`)

use std::path::Path;

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use teamchain_types::{TeamError, config::TeamsConfig};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TEAMCHAIN";

/// Loads and validates the configuration.
///
/// # Errors
///
/// Returns [`TeamError::Config`] if `path` is given but unreadable, a value
/// fails to parse, or validation fails.
pub fn load_config(path: Option<&Path>) -> Result<TeamsConfig, TeamError> {
    let builder = Config::builder();
    let builder = match path {
        Some(path) => builder.add_source(File::from(path)),
        None => builder
            .add_source(File::with_name("teamchain").required(false))
            .add_source(File::with_name("/etc/teamchain/config").required(false)),
    };
    finish(builder.add_source(environment()))
}

/// Parses and validates a TOML document, ignoring the environment.
///
/// # Errors
///
/// Returns [`TeamError::Config`] if the document does not parse or
/// validation fails.
pub fn parse_config(toml: &str) -> Result<TeamsConfig, TeamError> {
    finish(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).prefix_separator("__").separator("__").try_parsing(true)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<TeamsConfig, TeamError> {
    let config = builder
        .build()
        .map_err(|err| TeamError::Config { message: format!("failed to load config: {err}") })?;
    let config: TeamsConfig = config
        .try_deserialize()
        .map_err(|err| TeamError::Config { message: format!("failed to parse config: {err}") })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use teamchain_types::{ErrorCode, config::LogFormat};

    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, TeamsConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = parse_config(
            r#"
            [rekey]
            max_changes_per_link = 2
            conflict_backoff = "5ms"

            [join]
            queue_requests_while_closed = false

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.rekey.max_changes_per_link, 2);
        assert_eq!(config.rekey.conflict_backoff, Duration::from_millis(5));
        assert_eq!(config.rekey.max_append_attempts, 5);
        assert!(!config.join.queue_requests_while_closed);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.poll, TeamsConfig::default().poll);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("[rekey]\nmax_changes_per_link = 0\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Config);
        assert!(err.to_string().contains("max_changes_per_link"));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = parse_config("[poll]\ntimeout = \"soon\"\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Config);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/teamchain.toml"))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Config);
    }
}
