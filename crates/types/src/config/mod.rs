//! Configuration types for teamchain.
//!
//! Configuration is loaded from TOML files and environment variables.
//! All config structs validate their values at construction time via
//! fallible builders. Post-deserialization validation is available via
//! the `validate()` method on each struct.

// The schemars `JsonSchema` derive macro internally uses `.unwrap()` in its
// expansions.
#![allow(clippy::disallowed_methods)]

mod join;
mod logging;
mod rekey;

pub use join::*;
pub use logging::*;
pub use rekey::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Configuration validation error.
///
/// Returned when a configuration value is outside its valid range or
/// violates a cross-field constraint.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Top-level configuration of a team service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TeamsConfig {
    /// Write coalescing.
    #[serde(default)]
    pub rekey: RekeyConfig,
    /// Seqno polling.
    #[serde(default)]
    pub poll: PollConfig,
    /// Open-team joins.
    #[serde(default)]
    pub join: JoinConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TeamsConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rekey.validate()?;
        self.poll.validate()?;
        self.join.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use super::*;

    // =========================================================================
    // RekeyConfig
    // =========================================================================

    #[test]
    fn test_rekey_config_defaults_are_valid() {
        let config = RekeyConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.max_changes_per_link, 100);
        assert_eq!(config.max_append_attempts, 5);
        assert_eq!(config.conflict_backoff, Duration::from_millis(10));
        assert_eq!(config.max_conflict_backoff, Duration::from_millis(500));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config, RekeyConfig::default());
    }

    #[test]
    fn test_rekey_config_rejects_zero_batch() {
        let err = RekeyConfig::builder().max_changes_per_link(0).build().unwrap_err();
        assert!(err.to_string().contains("max_changes_per_link"));
    }

    #[test]
    fn test_rekey_config_rejects_zero_attempts() {
        let err = RekeyConfig::builder().max_append_attempts(0).build().unwrap_err();
        assert!(err.to_string().contains("max_append_attempts"));
    }

    #[test]
    fn test_rekey_config_backoff_ordering() {
        let result = RekeyConfig::builder()
            .conflict_backoff(Duration::from_secs(2))
            .max_conflict_backoff(Duration::from_secs(1))
            .build();
        assert!(result.is_err());

        let result = RekeyConfig::builder()
            .conflict_backoff(Duration::from_secs(1))
            .max_conflict_backoff(Duration::from_secs(1))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_rekey_config_tick_minimum() {
        assert!(RekeyConfig::builder().tick_interval(Duration::from_millis(9)).build().is_err());
        assert!(RekeyConfig::builder().tick_interval(Duration::from_millis(10)).build().is_ok());
    }

    // =========================================================================
    // PollConfig
    // =========================================================================

    #[test]
    fn test_poll_config_defaults_are_valid() {
        let config = PollConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.initial_interval, Duration::from_millis(10));
        assert_eq!(config.max_interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_poll_config_rejects_zero_interval() {
        let result = PollConfig::builder().initial_interval(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_poll_config_rejects_inverted_intervals() {
        let result = PollConfig::builder()
            .initial_interval(Duration::from_secs(1))
            .max_interval(Duration::from_millis(100))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_poll_config_timeout_shorter_than_interval() {
        let err = PollConfig::builder()
            .initial_interval(Duration::from_millis(100))
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    // =========================================================================
    // JoinConfig / LoggingConfig
    // =========================================================================

    #[test]
    fn test_join_config_defaults() {
        let config = JoinConfig::builder().build().unwrap();
        assert!(config.queue_requests_while_closed);
        assert_eq!(config.max_pending_requests, 10_000);
        assert!(JoinConfig::builder().max_pending_requests(0).build().is_err());
    }

    #[test]
    fn test_logging_config_rejects_empty_filter() {
        let config = LoggingConfig { format: LogFormat::Json, filter: "  ".to_string() };
        assert!(config.validate().is_err());
        assert!(LoggingConfig::default().validate().is_ok());
    }

    // =========================================================================
    // Serde
    // =========================================================================

    #[test]
    fn test_teams_config_from_partial_json() {
        let json = r#"{
            "rekey": { "max_changes_per_link": 8, "conflict_backoff": "25ms" },
            "poll": { "timeout": "2s" },
            "logging": { "format": "json" }
        }"#;
        let config: TeamsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.rekey.max_changes_per_link, 8);
        assert_eq!(config.rekey.conflict_backoff, Duration::from_millis(25));
        assert_eq!(config.rekey.max_append_attempts, 5);
        assert_eq!(config.poll.timeout, Duration::from_secs(2));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.join, JoinConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_duration_serializes_as_humantime() {
        let json = serde_json::to_value(PollConfig::default()).unwrap();
        assert_eq!(json["initial_interval"], "10ms");
        assert_eq!(json["timeout"], "10s");
    }

    #[test]
    fn test_teams_config_validate_reports_section_error() {
        let mut config = TeamsConfig::default();
        config.join.max_pending_requests = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_pending_requests"));
    }

    #[test]
    fn test_schema_describes_durations_as_strings() {
        let schema = serde_json::to_value(schemars::schema_for!(TeamsConfig)).unwrap();
        let rekey = &schema["definitions"]["RekeyConfig"]["properties"];
        assert_eq!(rekey["tick_interval"]["type"], "string");
        assert_eq!(rekey["max_changes_per_link"]["type"], "integer");
        assert!(schema["properties"]["logging"].is_object());
    }
}
