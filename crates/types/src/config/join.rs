use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Open-team join configuration.
///
/// # Validation Rules
///
/// - `max_pending_requests` must be > 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JoinConfig {
    /// Queue access requests against closed teams until the next trigger.
    ///
    /// When false, a request to a closed team fails immediately with `TeamNotOpen`.
    #[serde(default = "default_queue_requests_while_closed")]
    pub queue_requests_while_closed: bool,
    /// Upper bound on queued access requests per team.
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
}

#[bon::bon]
impl JoinConfig {
    /// Creates a new join configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `max_pending_requests` is 0.
    #[builder]
    pub fn new(
        #[builder(default = default_queue_requests_while_closed())]
        queue_requests_while_closed: bool,
        #[builder(default = default_max_pending_requests())] max_pending_requests: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { queue_requests_while_closed, max_pending_requests };
        config.validate()?;
        Ok(config)
    }
}

impl JoinConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending_requests == 0 {
            return Err(ConfigError::Validation {
                message: "max_pending_requests must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            queue_requests_while_closed: default_queue_requests_while_closed(),
            max_pending_requests: default_max_pending_requests(),
        }
    }
}

fn default_queue_requests_while_closed() -> bool {
    true
}

fn default_max_pending_requests() -> usize {
    10_000
}
