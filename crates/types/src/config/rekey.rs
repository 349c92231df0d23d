use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Rekey (write coalescing) configuration.
///
/// # Validation Rules
///
/// - `max_changes_per_link` must be > 0
/// - `max_append_attempts` must be > 0
/// - `conflict_backoff` must be <= `max_conflict_backoff`
/// - `tick_interval` must be >= 10ms
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use teamchain_types::config::RekeyConfig;
/// let config = RekeyConfig::builder()
///     .max_changes_per_link(50)
///     .tick_interval(Duration::from_millis(500))
///     .build()
///     .expect("valid rekey config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RekeyConfig {
    /// Maximum atomic changes carried by one link.
    ///
    /// Larger batches are split into consecutive links. Must be > 0.
    #[serde(default = "default_max_changes_per_link")]
    pub max_changes_per_link: usize,
    /// Attempts per link before a lost race surfaces as a conflict.
    ///
    /// Must be > 0.
    #[serde(default = "default_max_append_attempts")]
    pub max_append_attempts: usize,
    /// Initial delay after losing an append race.
    #[serde(default = "default_conflict_backoff")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub conflict_backoff: Duration,
    /// Upper bound on the delay between append attempts.
    #[serde(default = "default_max_conflict_backoff")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub max_conflict_backoff: Duration,
    /// Interval of the time-based trigger loop.
    #[serde(default = "default_tick_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub tick_interval: Duration,
}

#[bon::bon]
impl RekeyConfig {
    /// Creates a new rekey configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any rule above is broken.
    #[builder]
    pub fn new(
        #[builder(default = default_max_changes_per_link())] max_changes_per_link: usize,
        #[builder(default = default_max_append_attempts())] max_append_attempts: usize,
        #[builder(default = default_conflict_backoff())] conflict_backoff: Duration,
        #[builder(default = default_max_conflict_backoff())] max_conflict_backoff: Duration,
        #[builder(default = default_tick_interval())] tick_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_changes_per_link,
            max_append_attempts,
            conflict_backoff,
            max_conflict_backoff,
            tick_interval,
        };
        config.validate()?;
        Ok(config)
    }
}

impl RekeyConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_changes_per_link == 0 {
            return Err(ConfigError::Validation {
                message: "max_changes_per_link must be > 0".to_string(),
            });
        }
        if self.max_append_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_append_attempts must be > 0".to_string(),
            });
        }
        if self.conflict_backoff > self.max_conflict_backoff {
            return Err(ConfigError::Validation {
                message: format!(
                    "conflict_backoff ({:?}) must not exceed max_conflict_backoff ({:?})",
                    self.conflict_backoff, self.max_conflict_backoff
                ),
            });
        }
        if self.tick_interval < Duration::from_millis(10) {
            return Err(ConfigError::Validation {
                message: format!("tick_interval must be >= 10ms, got {:?}", self.tick_interval),
            });
        }
        Ok(())
    }
}

impl Default for RekeyConfig {
    fn default() -> Self {
        Self {
            max_changes_per_link: default_max_changes_per_link(),
            max_append_attempts: default_max_append_attempts(),
            conflict_backoff: default_conflict_backoff(),
            max_conflict_backoff: default_max_conflict_backoff(),
            tick_interval: default_tick_interval(),
        }
    }
}

fn default_max_changes_per_link() -> usize {
    100
}

fn default_max_append_attempts() -> usize {
    5
}

fn default_conflict_backoff() -> Duration {
    Duration::from_millis(10)
}

fn default_max_conflict_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

// =========================================================================
// PollConfig
// =========================================================================

/// Bounded backoff for callers waiting on a chain seqno.
///
/// # Validation Rules
///
/// - `initial_interval` must be > 0 and <= `max_interval`
/// - `timeout` must be >= `initial_interval`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PollConfig {
    /// First delay between polls.
    #[serde(default = "default_initial_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub initial_interval: Duration,
    /// Largest delay between polls.
    #[serde(default = "default_max_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub max_interval: Duration,
    /// Total time before giving up with a poll timeout.
    #[serde(default = "default_poll_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub timeout: Duration,
}

#[bon::bon]
impl PollConfig {
    /// Creates a new poll configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any rule above is broken.
    #[builder]
    pub fn new(
        #[builder(default = default_initial_interval())] initial_interval: Duration,
        #[builder(default = default_max_interval())] max_interval: Duration,
        #[builder(default = default_poll_timeout())] timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { initial_interval, max_interval, timeout };
        config.validate()?;
        Ok(config)
    }
}

impl PollConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_interval.is_zero() {
            return Err(ConfigError::Validation {
                message: "initial_interval must be > 0".to_string(),
            });
        }
        if self.initial_interval > self.max_interval {
            return Err(ConfigError::Validation {
                message: format!(
                    "initial_interval ({:?}) must not exceed max_interval ({:?})",
                    self.initial_interval, self.max_interval
                ),
            });
        }
        if self.timeout < self.initial_interval {
            return Err(ConfigError::Validation {
                message: format!(
                    "timeout ({:?}) must be >= initial_interval ({:?})",
                    self.timeout, self.initial_interval
                ),
            });
        }
        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            timeout: default_poll_timeout(),
        }
    }
}

fn default_initial_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_max_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(10)
}
