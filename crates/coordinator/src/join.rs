//! Open-team join policy.
//!
//! Access requests are ephemeral: they live in the rekey queue until the
//! next trigger, where [`OpenTeamJoinCoordinator::handle`] decides each one
//! against the team state as it stands at that point of the batch.

use chrono::{DateTime, Utc};
use teamchain_state::TeamState;
use teamchain_types::{
    ChangeType, InviteId, InviteTarget, MemberIdentity, PrincipalId, ResolvedIdentity, Role,
    TeamId,
};

/// A self-service request to join a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Team to join.
    pub team_id: TeamId,
    /// Requesting principal.
    pub requester: PrincipalId,
    /// When the request was submitted.
    pub requested_at: DateTime<Utc>,
}

impl AccessRequest {
    /// Creates a request stamped with the current time.
    pub fn new(team_id: TeamId, requester: PrincipalId) -> Self {
        Self { team_id, requester, requested_at: Utc::now() }
    }
}

/// Why an access request produced no change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Team does not accept self-service joins.
    NotOpen,
    /// Requester is on the ban list.
    Banned,
    /// Requester is already a member at their current identity.
    AlreadyMember,
    /// An active invite already waits for the requester's current identity.
    InvitePending,
}

impl RejectReason {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::NotOpen => "not_open",
            RejectReason::Banned => "banned",
            RejectReason::AlreadyMember => "already_member",
            RejectReason::InvitePending => "invite_pending",
        }
    }
}

/// Result of applying the join policy to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Requester holds key material and joins directly.
    AutoAdded {
        /// Joining identity.
        identity: MemberIdentity,
        /// Granted role, the team's `join_as`.
        role: Role,
    },
    /// Requester has no key material yet; an invite waits for it.
    InviteCreated {
        /// New invite.
        invite_id: InviteId,
        /// Identity the invite is for.
        identity: MemberIdentity,
        /// Role granted on completion.
        role: Role,
    },
    /// Nothing to append.
    Rejected(RejectReason),
}

impl JoinOutcome {
    /// The change to append, if any.
    pub fn change(&self) -> Option<ChangeType> {
        match self {
            JoinOutcome::AutoAdded { identity, role } => {
                Some(ChangeType::AddMember { identity: *identity, role: *role })
            },
            JoinOutcome::InviteCreated { invite_id, identity, role } => Some(ChangeType::AddInvite {
                invite_id: *invite_id,
                target: InviteTarget::Direct(*identity),
                role: *role,
            }),
            JoinOutcome::Rejected(_) => None,
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            JoinOutcome::AutoAdded { .. } => "auto_added",
            JoinOutcome::InviteCreated { .. } => "invite_created",
            JoinOutcome::Rejected(reason) => reason.as_str(),
        }
    }
}

/// Applies the open-team join policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenTeamJoinCoordinator;

impl OpenTeamJoinCoordinator {
    /// Decides `request` against `state`.
    ///
    /// `resolved` is the requester's identity as the directory reports it now.
    /// Order: not open, banned, already a member, invite pending, then
    /// `AddMember` when key material exists and `AddInvite` otherwise. New
    /// invites take the team's next free invite ID.
    pub fn handle(
        &self,
        state: &TeamState,
        request: &AccessRequest,
        resolved: &ResolvedIdentity,
    ) -> JoinOutcome {
        let settings = state.settings();
        if !settings.open {
            return JoinOutcome::Rejected(RejectReason::NotOpen);
        }
        if state.is_banned(request.requester) {
            return JoinOutcome::Rejected(RejectReason::Banned);
        }

        let identity = resolved.identity();
        if state.role_of(&identity).is_member() {
            return JoinOutcome::Rejected(RejectReason::AlreadyMember);
        }
        if state.active_invite_for(&InviteTarget::Direct(identity)).is_some() {
            return JoinOutcome::Rejected(RejectReason::InvitePending);
        }

        if resolved.has_key_material {
            JoinOutcome::AutoAdded { identity, role: settings.join_as }
        } else {
            JoinOutcome::InviteCreated {
                invite_id: state.next_invite_id(),
                identity,
                role: settings.join_as,
            }
        }
    }
}
