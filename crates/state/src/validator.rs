//! Link validation.
//!
//! [`ChainValidator::validate`] decides whether a candidate link may follow a
//! replayed state. It is a pure check: the state it returns is a new value
//! and the input is never touched.
//!
//! Rules, checked in order, first failure wins:
//! 1. seqno is exactly `last_seqno + 1`, and the team matches
//! 2. `prev_hash` is the hash of the last link
//! 3. the signature verifies under the signer's key for its epoch
//! 4. per sub-change, against the state left by the previous sub-change:
//!    the signer's role allows it, it does not admit a banned principal,
//!    and it applies cleanly
//! 5. at least one owner remains

use std::sync::Arc;

use snafu::ensure;
use teamchain_types::{
    ChangeType, MemberIdentity, Role, SignatureVerifier, TeamLink, ValidationError,
    error::{
        BadSignatureSnafu, BannedIdentitySnafu, InvalidChangeSnafu, PermissionDeniedSnafu,
        RoleFloorViolationSnafu, SeqnoGapSnafu, StaleBaseSnafu,
    },
    hash::hash_eq,
};

use crate::team_state::TeamState;

/// A link that passed validation, with the state it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLink {
    link: TeamLink,
    state: TeamState,
}

impl ValidatedLink {
    /// The accepted link.
    pub fn link(&self) -> &TeamLink {
        &self.link
    }

    /// State after applying the link.
    pub fn state(&self) -> &TeamState {
        &self.state
    }

    /// Splits into the link and the resulting state.
    pub fn into_parts(self) -> (TeamLink, TeamState) {
        (self.link, self.state)
    }
}

/// Validates candidate links against replayed state.
#[derive(Clone)]
pub struct ChainValidator {
    verifier: Arc<dyn SignatureVerifier>,
}

impl std::fmt::Debug for ChainValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainValidator").finish_non_exhaustive()
    }
}

impl ChainValidator {
    /// Creates a validator verifying signatures with `verifier`.
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Checks `candidate` against `current` and returns the resulting state.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a [`ValidationError`].
    pub fn validate(
        &self,
        candidate: &TeamLink,
        current: &TeamState,
    ) -> Result<ValidatedLink, ValidationError> {
        let expected = current.last_seqno() + 1;
        ensure!(
            candidate.seqno >= expected,
            StaleBaseSnafu { seqno: candidate.seqno, tail: current.last_seqno() }
        );
        ensure!(candidate.seqno == expected, SeqnoGapSnafu { expected, actual: candidate.seqno });
        ensure!(
            candidate.team_id == current.team_id(),
            InvalidChangeSnafu {
                reason: format!("link for {} offered to {}", candidate.team_id, current.team_id())
            }
        );
        ensure!(
            hash_eq(&candidate.prev_hash, &current.last_hash()),
            StaleBaseSnafu { seqno: candidate.seqno, tail: current.last_seqno() }
        );
        ensure!(candidate.verify_with(self.verifier.as_ref()), BadSignatureSnafu {
            signer: candidate.signer
        });

        let is_create = matches!(candidate.change, ChangeType::CreateTeam { .. });
        ensure!(
            is_create == candidate.is_root(),
            InvalidChangeSnafu {
                reason: "create_team must be the first link and only the first".to_string()
            }
        );
        let mut next = self.preview(current, candidate.signer, &candidate.change)?;
        next.advance(candidate.seqno, candidate.hash());
        Ok(ValidatedLink { link: candidate.clone(), state: next })
    }

    /// Applies `change` as if `signer` authored the next link.
    ///
    /// Runs the permission, structure, owner-floor and ban rules but not the
    /// seqno, hash or signature checks. Used to plan links before signing them.
    /// The returned state keeps the input's seqno and hash.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a [`ValidationError`].
    pub fn preview(
        &self,
        state: &TeamState,
        signer: MemberIdentity,
        change: &ChangeType,
    ) -> Result<TeamState, ValidationError> {
        if let ChangeType::Batch(changes) = change {
            ensure!(!changes.is_empty(), InvalidChangeSnafu { reason: "empty batch".to_string() });
        }

        let mut next = state.clone();
        let mut banned = None;
        for change in change.atomic_changes() {
            check_permission(&next, signer, change)?;
            // bans are judged per sub-change but reported after the owner floor
            banned = banned.or_else(|| check_ban(&next, change).err());
            next.apply_change(signer, change)?;
        }

        ensure!(
            next.owner_count() > 0,
            RoleFloorViolationSnafu { seqno: state.last_seqno() + 1 }
        );
        match banned {
            Some(err) => Err(err),
            None => Ok(next),
        }
    }
}

/// Minimum signer role for `change` given the current state.
///
/// `None` means any member may author it.
fn required_role(state: &TeamState, signer: MemberIdentity, change: &ChangeType) -> Option<Role> {
    let owner_or_admin = |touches_owner: bool| {
        if touches_owner { Some(Role::Owner) } else { Some(Role::Admin) }
    };
    match change {
        ChangeType::CreateTeam { .. } => None,
        ChangeType::AddMember { role, .. } | ChangeType::AddInvite { role, .. } => {
            owner_or_admin(*role == Role::Owner)
        },
        ChangeType::RemoveMember { identity, ban } => {
            if *identity == signer && !*ban {
                return None;
            }
            owner_or_admin(state.role_of(identity) == Role::Owner)
        },
        ChangeType::ChangeRole { identity, role } => {
            let held = state.role_of(identity);
            if *identity == signer && *role < held {
                return None;
            }
            owner_or_admin(*role == Role::Owner || held == Role::Owner)
        },
        ChangeType::ChangeSettings { .. }
        | ChangeType::CancelInvite { .. }
        | ChangeType::CompleteInvite { .. }
        | ChangeType::Batch(_) => Some(Role::Admin),
    }
}

fn check_permission(
    state: &TeamState,
    signer: MemberIdentity,
    change: &ChangeType,
) -> Result<(), ValidationError> {
    if matches!(change, ChangeType::CreateTeam { .. }) {
        return Ok(());
    }
    let held = state.role_of(&signer);
    let required = required_role(state, signer, change).unwrap_or(Role::Restricted);
    ensure!(
        held >= required,
        PermissionDeniedSnafu { signer, held, required, change: change.kind() }
    );
    Ok(())
}

fn check_ban(state: &TeamState, change: &ChangeType) -> Result<(), ValidationError> {
    let principal = match change {
        ChangeType::AddMember { identity, .. } | ChangeType::CompleteInvite { identity, .. } => {
            identity.principal
        },
        ChangeType::AddInvite { target, .. } => match target.principal() {
            Some(principal) => principal,
            None => return Ok(()),
        },
        _ => return Ok(()),
    };
    ensure!(!state.is_banned(principal), BannedIdentitySnafu { principal });
    Ok(())
}
