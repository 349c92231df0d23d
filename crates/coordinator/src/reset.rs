//! Reset reconciliation.
//!
//! A principal that reset its account comes back at a higher epoch. Its old
//! identities stay members until reconciled: each stale identity is
//! removed and the new identity gets a direct invite at the highest role the
//! stale ones held. Invite resolution then restores the membership once the
//! new epoch has key material.

use teamchain_state::TeamState;
use teamchain_types::{
    ChangeType, InviteTarget, MemberIdentity, PrincipalId, ResolvedIdentity, Role,
};

/// A principal whose team memberships lag behind its current epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetDetection {
    /// The reset principal.
    pub principal: PrincipalId,
    /// What the directory reports now.
    pub current: ResolvedIdentity,
    /// Member identities at older epochs, with their roles.
    pub stale: Vec<(MemberIdentity, Role)>,
}

impl ResetDetection {
    /// Highest role held by any stale identity.
    pub fn preserved_role(&self) -> Role {
        self.stale.iter().map(|(_, role)| *role).max().unwrap_or_default()
    }
}

/// Detects resets and plans their reconciliation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetReconciler;

impl ResetReconciler {
    /// Returns the stale memberships of `resolved.principal`, if any.
    pub fn detect(&self, state: &TeamState, resolved: &ResolvedIdentity) -> Option<ResetDetection> {
        let stale: Vec<_> = state
            .identities_of(resolved.principal)
            .filter(|(identity, _)| identity.epoch < resolved.current_epoch)
            .collect();
        if stale.is_empty() {
            return None;
        }
        Some(ResetDetection { principal: resolved.principal, current: *resolved, stale })
    }

    /// Changes that reconcile `detection` against `state`.
    ///
    /// Stale identities are always removed, never banned. The new identity
    /// then ends up with at least the preserved role:
    ///
    /// - already a member at or above it: nothing more
    /// - member below it: promoted
    /// - active invite at or above it: nothing more
    /// - active invite below it: cancelled and re-issued at the preserved role
    /// - otherwise: a new direct invite
    ///
    /// A banned principal only loses its stale identities.
    pub fn plan(&self, state: &TeamState, detection: &ResetDetection) -> Vec<ChangeType> {
        let mut changes: Vec<ChangeType> = detection
            .stale
            .iter()
            .map(|(identity, _)| ChangeType::RemoveMember { identity: *identity, ban: false })
            .collect();
        if state.is_banned(detection.principal) {
            return changes;
        }

        let preserved = detection.preserved_role();
        let fresh = detection.current.identity();
        let held = state.role_of(&fresh);
        if held >= preserved {
            return changes;
        }
        if held.is_member() {
            changes.push(ChangeType::ChangeRole { identity: fresh, role: preserved });
            return changes;
        }

        let target = InviteTarget::Direct(fresh);
        if let Some(invite) = state.active_invite_for(&target) {
            if invite.role >= preserved {
                return changes;
            }
            changes.push(ChangeType::CancelInvite { invite_id: invite.id });
        }
        changes.push(ChangeType::AddInvite { invite_id: state.next_invite_id(), target, role: preserved });
        changes
    }
}
