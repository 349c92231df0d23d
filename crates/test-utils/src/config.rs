//! Test configuration helpers.
//!
//! Small intervals so that retry and polling paths run in milliseconds.

use std::time::Duration;

use teamchain_types::config::{JoinConfig, PollConfig, RekeyConfig, TeamsConfig};

/// Rekey configuration for tests.
///
/// - `max_changes_per_link`: 100
/// - `max_append_attempts`: 5
/// - `conflict_backoff`: 1ms, capped at 5ms
/// - `tick_interval`: 10ms
#[must_use]
pub fn test_rekey_config() -> RekeyConfig {
    RekeyConfig {
        max_changes_per_link: 100,
        max_append_attempts: 5,
        conflict_backoff: Duration::from_millis(1),
        max_conflict_backoff: Duration::from_millis(5),
        tick_interval: Duration::from_millis(10),
    }
}

/// Poll configuration for tests: 1ms growing to 5ms, giving up after 1s.
#[must_use]
pub fn test_poll_config() -> PollConfig {
    PollConfig {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        timeout: Duration::from_secs(1),
    }
}

/// Full service configuration for tests.
#[must_use]
pub fn test_teams_config() -> TeamsConfig {
    TeamsConfig {
        rekey: test_rekey_config(),
        poll: test_poll_config(),
        join: JoinConfig::default(),
        logging: Default::default(),
    }
}
