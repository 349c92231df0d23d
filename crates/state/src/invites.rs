//! Invite registry.
//!
//! A read-only view of a team's invites. Resolution never mutates anything:
//! it returns the `CompleteInvite` change that the rekey path must append.

use teamchain_types::{ChangeType, Invite, InviteTarget, ResolvedIdentity};

use crate::team_state::TeamState;

/// Invite queries over a replayed [`TeamState`].
#[derive(Debug, Clone, Copy)]
pub struct InviteRegistry<'a> {
    state: &'a TeamState,
}

impl<'a> InviteRegistry<'a> {
    /// Creates a view over `state`.
    pub fn new(state: &'a TeamState) -> Self {
        Self { state }
    }

    /// Whether an active invite exists for `target`.
    pub fn has_active_invite(&self, target: &InviteTarget) -> bool {
        self.state.active_invite_for(target).is_some()
    }

    /// Active invites ordered by ID.
    pub fn active_invites(&self) -> Vec<&'a Invite> {
        self.state.invites().values().filter(|invite| invite.is_active()).collect()
    }

    /// The `CompleteInvite` change for `target`, if its invite can resolve now.
    ///
    /// `resolved` is what the identity directory reports for the invite's
    /// principal (direct invites) or external name (external invites).
    ///
    /// - A direct invite resolves once its exact (principal, epoch) has key material.
    /// - An external invite resolves once the name maps to a principal with key material.
    ///
    /// Banned principals never resolve.
    pub fn resolve(
        &self,
        target: &InviteTarget,
        resolved: Option<&ResolvedIdentity>,
    ) -> Option<ChangeType> {
        let invite = self.state.active_invite_for(target)?;
        let resolved = resolved.filter(|resolved| resolved.has_key_material)?;
        if self.state.is_banned(resolved.principal) {
            return None;
        }
        let identity = match &invite.target {
            InviteTarget::Direct(identity) => {
                if resolved.identity() != *identity {
                    return None;
                }
                *identity
            },
            InviteTarget::External(_) => resolved.identity(),
        };
        Some(ChangeType::CompleteInvite { invite_id: invite.id, identity })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::sync::Arc;

    use teamchain_test_utils::DigestSigner;
    use teamchain_types::{InviteId, MemberIdentity, PrincipalId, Role, TeamId, TeamSettings};

    use super::*;
    use crate::validator::ChainValidator;

    fn id(principal: u64, epoch: u64) -> MemberIdentity {
        MemberIdentity::new(PrincipalId::new(principal), epoch)
    }

    fn resolved(principal: u64, epoch: u64, has_key_material: bool) -> ResolvedIdentity {
        ResolvedIdentity {
            principal: PrincipalId::new(principal),
            current_epoch: epoch,
            has_key_material,
        }
    }

    fn state_with(changes: Vec<ChangeType>) -> TeamState {
        let signer = DigestSigner::default();
        let validator = ChainValidator::new(Arc::new(signer.clone()));
        let team = TeamId::new(1);
        let mut state = TeamState::empty(team);
        let create =
            ChangeType::CreateTeam { name: "inv".to_string(), settings: TeamSettings::closed() };
        for change in std::iter::once(create).chain(changes) {
            let link =
                signer.link(team, state.last_seqno() + 1, state.last_hash(), id(1, 0), change);
            state = validator.validate(&link, &state).unwrap().into_parts().1;
        }
        state
    }

    fn direct_invite(invite: u64, principal: u64, epoch: u64, role: Role) -> ChangeType {
        ChangeType::AddInvite {
            invite_id: InviteId::new(invite),
            target: InviteTarget::Direct(id(principal, epoch)),
            role,
        }
    }

    #[test]
    fn test_active_invites_and_lookup() {
        let state = state_with(vec![
            direct_invite(1, 2, 0, Role::Reader),
            direct_invite(2, 3, 0, Role::Writer),
            ChangeType::CancelInvite { invite_id: InviteId::new(1) },
        ]);
        let registry = InviteRegistry::new(&state);

        let active = registry.active_invites();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, InviteId::new(2));
        assert!(registry.has_active_invite(&InviteTarget::Direct(id(3, 0))));
        assert!(!registry.has_active_invite(&InviteTarget::Direct(id(2, 0))));
        assert!(!registry.has_active_invite(&InviteTarget::Direct(id(3, 1))));
    }

    #[test]
    fn test_direct_invite_waits_for_key_material() {
        let state = state_with(vec![direct_invite(1, 2, 1, Role::Writer)]);
        let registry = InviteRegistry::new(&state);
        let target = InviteTarget::Direct(id(2, 1));

        assert_eq!(registry.resolve(&target, None), None);
        assert_eq!(registry.resolve(&target, Some(&resolved(2, 1, false))), None);
        assert_eq!(
            registry.resolve(&target, Some(&resolved(2, 1, true))),
            Some(ChangeType::CompleteInvite { invite_id: InviteId::new(1), identity: id(2, 1) })
        );
    }

    #[test]
    fn test_direct_invite_ignores_other_epochs() {
        let state = state_with(vec![direct_invite(1, 2, 1, Role::Writer)]);
        let registry = InviteRegistry::new(&state);
        let target = InviteTarget::Direct(id(2, 1));

        // principal reset again before provisioning
        assert_eq!(registry.resolve(&target, Some(&resolved(2, 2, true))), None);
    }

    #[test]
    fn test_external_invite_binds_resolved_identity() {
        let target = InviteTarget::External("carol@social".to_string());
        let state = state_with(vec![ChangeType::AddInvite {
            invite_id: InviteId::new(4),
            target: target.clone(),
            role: Role::Reader,
        }]);
        let registry = InviteRegistry::new(&state);

        assert_eq!(registry.resolve(&target, Some(&resolved(7, 3, false))), None);
        assert_eq!(
            registry.resolve(&target, Some(&resolved(7, 3, true))),
            Some(ChangeType::CompleteInvite { invite_id: InviteId::new(4), identity: id(7, 3) })
        );
    }

    #[test]
    fn test_banned_principal_never_resolves() {
        let target = InviteTarget::External("mallory@social".to_string());
        let state = state_with(vec![
            ChangeType::AddInvite { invite_id: InviteId::new(1), target: target.clone(), role: Role::Reader },
            ChangeType::AddMember { identity: id(9, 0), role: Role::Reader },
            ChangeType::RemoveMember { identity: id(9, 0), ban: true },
        ]);
        let registry = InviteRegistry::new(&state);
        assert_eq!(registry.resolve(&target, Some(&resolved(9, 0, true))), None);
    }

    #[test]
    fn test_unknown_target_does_not_resolve() {
        let state = state_with(vec![]);
        let registry = InviteRegistry::new(&state);
        let target = InviteTarget::Direct(id(2, 0));
        assert_eq!(registry.resolve(&target, Some(&resolved(2, 0, true))), None);
    }
}
