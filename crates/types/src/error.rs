//! Error types for teamchain using snafu.
//!
//! Two layers:
//! - [`ValidationError`]: why a single candidate link was refused
//! - [`TeamError`]: the unified error returned by every public operation
//!
//! Each variant maps to an [`ErrorCode`] with a unique numeric identifier,
//! retryability classification, and suggested recovery action.

use core::fmt;
use std::time::Duration;

use snafu::{Location, Snafu};

use crate::{
    config::ConfigError,
    signing::SigningError,
    types::{InviteId, MemberIdentity, PrincipalId, Role, Seqno, TeamId},
};

/// Unified result type for team operations.
pub type Result<T, E = TeamError> = std::result::Result<T, E>;

/// Machine-readable error codes for programmatic error handling.
///
/// | Range       | Domain     | Examples                                         |
/// |-------------|------------|--------------------------------------------------|
/// | 1000–1099   | Validation | Stale base, bad signature, permission, ban       |
/// | 1100–1199   | Policy     | Team or invite not found, team not open, banned  |
/// | 2000–2099   | Conflict   | Append race, poll timeout, store unavailable     |
/// | 3000–3099   | Internal   | Replay invariant, signing, config, internal      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // --- Validation errors (1000–1099) ---
    /// Link was built on a superseded chain tail.
    StaleBase = 1000,
    /// Link seqno skips ahead of the chain tail.
    SeqnoGap = 1001,
    /// Link signature does not verify under the signer's key.
    BadSignature = 1002,
    /// Signer lacks the role required for the change.
    PermissionDenied = 1003,
    /// Change would admit a banned principal.
    BannedIdentity = 1004,
    /// Change would leave the team without an owner.
    RoleFloorViolation = 1005,
    /// Change is structurally invalid against the current state.
    InvalidChange = 1006,

    // --- Policy errors (1100–1199) ---
    /// Team does not exist.
    TeamNotFound = 1100,
    /// Invite does not exist in the team.
    InviteNotFound = 1101,
    /// Team does not accept self-service joins.
    TeamNotOpen = 1102,
    /// Requester is banned from the team.
    Banned = 1103,
    /// Team name already in use.
    TeamNameTaken = 1104,

    // --- Conflict errors (2000–2099) ---
    /// Another writer appended first; attempts exhausted.
    ConcurrentAppendRace = 2000,
    /// Polling for a seqno exceeded its bound.
    PollExceeded = 2001,
    /// Chain store temporarily unavailable.
    StoreUnavailable = 2002,

    // --- Internal errors (3000–3099) ---
    /// Replay encountered a log that cannot be folded.
    ReplayInvariantViolation = 3000,
    /// Signing service failed.
    Signing = 3001,
    /// Configuration error.
    Config = 3002,
    /// Unexpected internal state.
    Internal = 3003,
}

impl ErrorCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a numeric code to an `ErrorCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::StaleBase),
            1001 => Some(Self::SeqnoGap),
            1002 => Some(Self::BadSignature),
            1003 => Some(Self::PermissionDenied),
            1004 => Some(Self::BannedIdentity),
            1005 => Some(Self::RoleFloorViolation),
            1006 => Some(Self::InvalidChange),
            1100 => Some(Self::TeamNotFound),
            1101 => Some(Self::InviteNotFound),
            1102 => Some(Self::TeamNotOpen),
            1103 => Some(Self::Banned),
            1104 => Some(Self::TeamNameTaken),
            2000 => Some(Self::ConcurrentAppendRace),
            2001 => Some(Self::PollExceeded),
            2002 => Some(Self::StoreUnavailable),
            3000 => Some(Self::ReplayInvariantViolation),
            3001 => Some(Self::Signing),
            3002 => Some(Self::Config),
            3003 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether this error is retryable.
    ///
    /// Retryable errors may succeed on a subsequent attempt, typically after
    /// backoff. Non-retryable errors are caller misuse or policy rejections.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::ConcurrentAppendRace | Self::PollExceeded | Self::StoreUnavailable)
    }

    /// Suggested recovery action for this error code.
    ///
    /// Stable and safe to display to operators.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::StaleBase => "Re-fetch the chain tail, rebuild the link on it and resubmit.",
            Self::SeqnoGap => "Fetch the missing links before authoring a new one.",
            Self::BadSignature => {
                "Sign with the key of the signer's current epoch. Check for a pending account reset."
            },
            Self::PermissionDenied => "Ask an admin or owner of the team to make the change.",
            Self::BannedIdentity => "The principal is banned. An admin must not re-add them.",
            Self::RoleFloorViolation => "Promote another member to owner before removing this one.",
            Self::InvalidChange => "Reload team state and rebuild the change against it.",
            Self::TeamNotFound => "Verify the team name or ID.",
            Self::InviteNotFound => "Reload active invites; the invite may already be resolved.",
            Self::TeamNotOpen => "Ask an admin to open the team or to add you directly.",
            Self::Banned => "Not retryable. Contact a team admin.",
            Self::TeamNameTaken => "Choose a different team name.",
            Self::ConcurrentAppendRace => {
                "Retry with backoff. Another writer appended to the team concurrently."
            },
            Self::PollExceeded => "Poll again. The change may still land on the next trigger.",
            Self::StoreUnavailable => "Retry after a short delay.",
            Self::ReplayInvariantViolation => {
                "Force a full re-poll of the team. Report the chain if it persists."
            },
            Self::Signing => "Check that key material exists for the signer's current epoch.",
            Self::Config => "Fix the configuration value and restart.",
            Self::Internal => {
                "Unexpected state or invariant violation. Collect context and report as an issue."
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Why a candidate link was refused.
///
/// Only the first violated rule is reported. Rules are checked in the order
/// seqno, prev hash, signature, permissions and structure, owner floor, bans.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ValidationError {
    /// Link cites a superseded tail: its seqno is taken or its prev hash is wrong.
    #[snafu(display("Stale base at seqno {seqno}: chain tail is {tail}"))]
    StaleBase {
        /// Seqno of the candidate.
        seqno: Seqno,
        /// Current tail seqno.
        tail: Seqno,
    },

    /// Link seqno is beyond the next expected seqno.
    #[snafu(display("Seqno gap: expected {expected}, got {actual}"))]
    SeqnoGap {
        /// Next expected seqno.
        expected: Seqno,
        /// Seqno of the candidate.
        actual: Seqno,
    },

    /// Signature does not verify under the signer's key for its epoch.
    #[snafu(display("Bad signature from {signer}"))]
    BadSignature {
        /// Claimed signer.
        signer: MemberIdentity,
    },

    /// Signer's role does not allow the change.
    #[snafu(display("{signer} holds {held}, {required} required for {change}"))]
    PermissionDenied {
        /// Signer of the link.
        signer: MemberIdentity,
        /// Role the signer holds.
        held: Role,
        /// Minimum role required.
        required: Role,
        /// Kind of change refused.
        change: &'static str,
    },

    /// Change would add or complete an invite for a banned principal.
    #[snafu(display("{principal} is banned"))]
    BannedIdentity {
        /// Banned principal.
        principal: PrincipalId,
    },

    /// Change would remove the last owner.
    #[snafu(display("Link at seqno {seqno} would leave the team without an owner"))]
    RoleFloorViolation {
        /// Seqno of the candidate.
        seqno: Seqno,
    },

    /// Change is structurally invalid against the current state.
    #[snafu(display("Invalid change: {reason}"))]
    InvalidChange {
        /// What is wrong.
        reason: String,
    },
}

impl ValidationError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::StaleBase { .. } => ErrorCode::StaleBase,
            Self::SeqnoGap { .. } => ErrorCode::SeqnoGap,
            Self::BadSignature { .. } => ErrorCode::BadSignature,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::BannedIdentity { .. } => ErrorCode::BannedIdentity,
            Self::RoleFloorViolation { .. } => ErrorCode::RoleFloorViolation,
            Self::InvalidChange { .. } => ErrorCode::InvalidChange,
        }
    }
}

/// Top-level error type for team operations.
///
/// # Recovery Guide
///
/// | Variant                    | Retryable | Recovery Action                                    |
/// | -------------------------- | --------- | -------------------------------------------------- |
/// | `Validation`               | No        | See the inner [`ValidationError`]                  |
/// | `TeamNotFound`             | No        | Verify the team name or ID                         |
/// | `InviteNotFound`           | No        | Reload invites                                     |
/// | `TeamNotOpen`              | No        | Ask an admin to open the team                      |
/// | `Banned`                   | No        | Terminal for the requester                         |
/// | `TeamNameTaken`            | No        | Pick another name                                  |
/// | `ConcurrentAppendRace`     | Yes       | Retry with backoff                                 |
/// | `PollExceeded`             | Yes       | Poll again                                         |
/// | `StoreUnavailable`         | Yes       | Retry after a short delay                          |
/// | `ReplayInvariantViolation` | No        | Force a full re-poll; report if persistent         |
/// | `Signing`                  | No        | Provision key material                             |
/// | `Config`                   | No        | Fix configuration and restart                      |
/// | `Internal`                 | No        | Report as issue with context                       |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TeamError {
    /// A link was refused by the validator.
    #[snafu(display("Validation failed: {source}"))]
    Validation {
        /// Underlying rule violation.
        source: ValidationError,
    },

    /// Team does not exist.
    #[snafu(display("Team {team} not found"))]
    TeamNotFound {
        /// Team name or ID as given by the caller.
        team: String,
    },

    /// Invite does not exist in the team.
    #[snafu(display("Invite {invite_id} not found in {team_id}"))]
    InviteNotFound {
        /// Team identifier.
        team_id: TeamId,
        /// Invite identifier.
        invite_id: InviteId,
    },

    /// Team is closed to self-service joins.
    #[snafu(display("{team_id} is not open"))]
    TeamNotOpen {
        /// Team identifier.
        team_id: TeamId,
    },

    /// Requester is banned from the team.
    #[snafu(display("{principal} is banned from {team_id}"))]
    Banned {
        /// Team identifier.
        team_id: TeamId,
        /// Banned principal.
        principal: PrincipalId,
    },

    /// Team name already in use.
    #[snafu(display("Team name {name:?} is taken"))]
    TeamNameTaken {
        /// Requested name.
        name: String,
    },

    /// Appends kept losing the race to other writers.
    #[snafu(display("Concurrent append race on {team_id} after {attempts} attempts"))]
    ConcurrentAppendRace {
        /// Team identifier.
        team_id: TeamId,
        /// Attempts made.
        attempts: usize,
    },

    /// Seqno was not reached before the poll bound.
    #[snafu(display("{team_id} reached seqno {reached}, wanted {target} within {waited:?}"))]
    PollExceeded {
        /// Team identifier.
        team_id: TeamId,
        /// Seqno waited for.
        target: Seqno,
        /// Latest seqno observed.
        reached: Seqno,
        /// Time spent polling.
        waited: Duration,
    },

    /// Chain store temporarily unavailable.
    #[snafu(display("Chain store unavailable: {message}"))]
    StoreUnavailable {
        /// Error description.
        message: String,
    },

    /// Replay could not fold the log; indicates a bug or a corrupt store.
    #[snafu(display("Replay invariant violated for {team_id}: {message}"))]
    ReplayInvariantViolation {
        /// Team identifier.
        team_id: TeamId,
        /// What broke.
        message: String,
    },

    /// Signing service failed.
    #[snafu(display("Signing failed: {source}"))]
    Signing {
        /// Underlying signing error.
        source: SigningError,
    },

    /// Configuration error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// Internal error (unexpected state).
    #[snafu(display("Internal error at {location}: {message}"))]
    Internal {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl TeamError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { source } => source.code(),
            Self::TeamNotFound { .. } => ErrorCode::TeamNotFound,
            Self::InviteNotFound { .. } => ErrorCode::InviteNotFound,
            Self::TeamNotOpen { .. } => ErrorCode::TeamNotOpen,
            Self::Banned { .. } => ErrorCode::Banned,
            Self::TeamNameTaken { .. } => ErrorCode::TeamNameTaken,
            Self::ConcurrentAppendRace { .. } => ErrorCode::ConcurrentAppendRace,
            Self::PollExceeded { .. } => ErrorCode::PollExceeded,
            Self::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            Self::ReplayInvariantViolation { .. } => ErrorCode::ReplayInvariantViolation,
            Self::Signing { .. } => ErrorCode::Signing,
            Self::Config { .. } => ErrorCode::Config,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Whether this error is retryable.
    ///
    /// Delegates to [`ErrorCode::is_retryable`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Suggested recovery action for this error.
    #[must_use]
    pub const fn suggested_action(&self) -> &'static str {
        self.code().suggested_action()
    }
}

impl From<ValidationError> for TeamError {
    fn from(source: ValidationError) -> Self {
        TeamError::Validation { source }
    }
}

impl From<SigningError> for TeamError {
    fn from(source: SigningError) -> Self {
        TeamError::Signing { source }
    }
}

impl From<ConfigError> for TeamError {
    fn from(err: ConfigError) -> Self {
        TeamError::Config { message: err.to_string() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn all_error_codes() -> Vec<ErrorCode> {
        vec![
            ErrorCode::StaleBase,
            ErrorCode::SeqnoGap,
            ErrorCode::BadSignature,
            ErrorCode::PermissionDenied,
            ErrorCode::BannedIdentity,
            ErrorCode::RoleFloorViolation,
            ErrorCode::InvalidChange,
            ErrorCode::TeamNotFound,
            ErrorCode::InviteNotFound,
            ErrorCode::TeamNotOpen,
            ErrorCode::Banned,
            ErrorCode::TeamNameTaken,
            ErrorCode::ConcurrentAppendRace,
            ErrorCode::PollExceeded,
            ErrorCode::StoreUnavailable,
            ErrorCode::ReplayInvariantViolation,
            ErrorCode::Signing,
            ErrorCode::Config,
            ErrorCode::Internal,
        ]
    }

    #[test]
    fn test_error_code_numeric_uniqueness() {
        let mut seen = HashSet::new();
        for code in all_error_codes() {
            let numeric = code.as_u16();
            assert!(seen.insert(numeric), "Duplicate error code: {numeric} for {code:?}");
        }
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in all_error_codes() {
            assert_eq!(ErrorCode::from_u16(code.as_u16()), Some(code));
        }
        assert_eq!(ErrorCode::from_u16(9999), None);
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let retryable: Vec<_> =
            all_error_codes().into_iter().filter(|code| code.is_retryable()).collect();
        assert_eq!(
            retryable,
            vec![
                ErrorCode::ConcurrentAppendRace,
                ErrorCode::PollExceeded,
                ErrorCode::StoreUnavailable
            ]
        );
    }

    #[test]
    fn test_validation_code_passes_through() {
        let err: TeamError = ValidationError::RoleFloorViolation { seqno: 4 }.into();
        assert_eq!(err.code(), ErrorCode::RoleFloorViolation);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Validation failed: Link at seqno 4 would leave the team without an owner");
    }

    #[test]
    fn test_error_display() {
        let err = TeamError::Banned { team_id: TeamId::new(3), principal: PrincipalId::new(8) };
        assert_eq!(err.to_string(), "uid:8 is banned from team:3");

        let err = ValidationError::PermissionDenied {
            signer: MemberIdentity::new(PrincipalId::new(2), 0),
            held: Role::Writer,
            required: Role::Admin,
            change: "change_settings",
        };
        assert_eq!(err.to_string(), "uid:2%0 holds writer, admin required for change_settings");
    }

    #[test]
    fn test_suggested_actions_non_empty() {
        for code in all_error_codes() {
            assert!(!code.suggested_action().is_empty(), "{code:?} has no action");
        }
    }
}
