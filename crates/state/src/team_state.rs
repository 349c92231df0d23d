//! Replayed team state.
//!
//! A [`TeamState`] is the fold of a chain prefix. It is never authoritative:
//! it can always be rebuilt from the links, and it only changes by applying
//! a link that the validator accepted.

use std::collections::{BTreeMap, BTreeSet};

use snafu::ensure;
use teamchain_types::{
    ChangeType, Hash, Invite, InviteId, InviteStatus, InviteTarget, MemberIdentity, PrincipalId,
    ROOT_HASH, Role, Seqno, TeamId, TeamSettings, ValidationError,
    error::InvalidChangeSnafu,
};

/// Membership, settings, invites and bans of a team at a seqno.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamState {
    team_id: TeamId,
    name: String,
    last_seqno: Seqno,
    last_hash: Hash,
    members: BTreeMap<MemberIdentity, Role>,
    settings: TeamSettings,
    invites: BTreeMap<InviteId, Invite>,
    banned: BTreeSet<PrincipalId>,
}

impl TeamState {
    /// State of a team with no links.
    pub fn empty(team_id: TeamId) -> Self {
        Self {
            team_id,
            name: String::new(),
            last_seqno: 0,
            last_hash: ROOT_HASH,
            members: BTreeMap::new(),
            settings: TeamSettings::default(),
            invites: BTreeMap::new(),
            banned: BTreeSet::new(),
        }
    }

    /// Team identifier.
    pub fn team_id(&self) -> TeamId {
        self.team_id
    }

    /// Team name, set by the creation link.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seqno of the last applied link, 0 before creation.
    pub fn last_seqno(&self) -> Seqno {
        self.last_seqno
    }

    /// Hash of the last applied link, [`ROOT_HASH`] before creation.
    pub fn last_hash(&self) -> Hash {
        self.last_hash
    }

    /// Returns true if no link has been applied.
    pub fn is_empty(&self) -> bool {
        self.last_seqno == 0
    }

    /// Current settings.
    pub fn settings(&self) -> TeamSettings {
        self.settings
    }

    /// Current members and their roles.
    pub fn members(&self) -> &BTreeMap<MemberIdentity, Role> {
        &self.members
    }

    /// Role of `identity`, [`Role::None`] if not a member.
    pub fn role_of(&self, identity: &MemberIdentity) -> Role {
        self.members.get(identity).copied().unwrap_or_default()
    }

    /// Every member identity of a principal, across epochs.
    pub fn identities_of(
        &self,
        principal: PrincipalId,
    ) -> impl Iterator<Item = (MemberIdentity, Role)> + '_ {
        self.members
            .iter()
            .filter(move |(identity, _)| identity.principal == principal)
            .map(|(identity, role)| (*identity, *role))
    }

    /// Number of owners.
    pub fn owner_count(&self) -> usize {
        self.members.values().filter(|role| **role == Role::Owner).count()
    }

    /// Whether the principal is on the ban list.
    pub fn is_banned(&self, principal: PrincipalId) -> bool {
        self.banned.contains(&principal)
    }

    /// The ban list.
    pub fn banned(&self) -> &BTreeSet<PrincipalId> {
        &self.banned
    }

    /// Every invite ever recorded, keyed by ID.
    pub fn invites(&self) -> &BTreeMap<InviteId, Invite> {
        &self.invites
    }

    /// The active invite for `target`, if any.
    pub fn active_invite_for(&self, target: &InviteTarget) -> Option<&Invite> {
        self.invites.values().find(|invite| invite.is_active() && invite.target == *target)
    }

    /// Smallest invite ID not yet used.
    pub fn next_invite_id(&self) -> InviteId {
        let next = self.invites.keys().next_back().map_or(1, |id| id.value() + 1);
        InviteId::new(next)
    }

    /// Records the position of the link just applied.
    pub(crate) fn advance(&mut self, seqno: Seqno, hash: Hash) {
        self.last_seqno = seqno;
        self.last_hash = hash;
    }

    /// Applies one atomic change.
    ///
    /// Permissions and bans are the validator's concern; this only enforces
    /// that the change makes sense against the current state.
    pub(crate) fn apply_change(
        &mut self,
        signer: MemberIdentity,
        change: &ChangeType,
    ) -> Result<(), ValidationError> {
        match change {
            ChangeType::CreateTeam { name, settings } => {
                ensure!(
                    self.is_empty(),
                    InvalidChangeSnafu { reason: "team already created".to_string() }
                );
                ensure!(
                    !name.is_empty(),
                    InvalidChangeSnafu { reason: "team name must not be empty".to_string() }
                );
                settings.validate()?;
                self.name.clone_from(name);
                self.settings = *settings;
                self.members.insert(signer, Role::Owner);
            },
            ChangeType::AddMember { identity, role } => {
                ensure!(
                    role.is_member(),
                    InvalidChangeSnafu { reason: format!("cannot add {identity} with no role") }
                );
                self.members.insert(*identity, *role);
            },
            ChangeType::RemoveMember { identity, ban } => {
                ensure!(
                    self.members.remove(identity).is_some(),
                    InvalidChangeSnafu { reason: format!("{identity} is not a member") }
                );
                if *ban {
                    self.ban(identity.principal);
                }
            },
            ChangeType::ChangeRole { identity, role } => {
                ensure!(
                    role.is_member(),
                    InvalidChangeSnafu {
                        reason: "use remove_member to clear a membership".to_string()
                    }
                );
                let Some(current) = self.members.get_mut(identity) else {
                    return InvalidChangeSnafu { reason: format!("{identity} is not a member") }
                        .fail();
                };
                *current = *role;
            },
            ChangeType::ChangeSettings { settings } => {
                settings.validate()?;
                self.settings = *settings;
            },
            ChangeType::AddInvite { invite_id, target, role } => {
                ensure!(
                    role.is_member(),
                    InvalidChangeSnafu { reason: "invite must grant a role".to_string() }
                );
                ensure!(
                    !self.invites.contains_key(invite_id),
                    InvalidChangeSnafu { reason: format!("{invite_id} already exists") }
                );
                ensure!(
                    self.active_invite_for(target).is_none(),
                    InvalidChangeSnafu { reason: format!("active invite for {target} exists") }
                );
                if let InviteTarget::Direct(identity) = target {
                    ensure!(
                        !self.members.contains_key(identity),
                        InvalidChangeSnafu { reason: format!("{identity} is already a member") }
                    );
                }
                self.invites.insert(
                    *invite_id,
                    Invite {
                        id: *invite_id,
                        target: target.clone(),
                        role: *role,
                        status: InviteStatus::Active,
                    },
                );
            },
            ChangeType::CancelInvite { invite_id } => {
                let invite = self.active_invite_mut(*invite_id)?;
                invite.status = InviteStatus::Cancelled;
            },
            ChangeType::CompleteInvite { invite_id, identity } => {
                let invite = self.active_invite_mut(*invite_id)?;
                if let InviteTarget::Direct(target) = &invite.target {
                    ensure!(
                        target == identity,
                        InvalidChangeSnafu {
                            reason: format!("{invite_id} is for {target}, not {identity}")
                        }
                    );
                }
                invite.status = InviteStatus::Completed;
                let granted = invite.role;
                let role = self.members.entry(*identity).or_default();
                *role = (*role).max(granted);
            },
            ChangeType::Batch(_) => {
                return InvalidChangeSnafu { reason: "batches cannot be nested".to_string() }
                    .fail();
            },
        }
        Ok(())
    }

    fn active_invite_mut(&mut self, invite_id: InviteId) -> Result<&mut Invite, ValidationError> {
        match self.invites.get_mut(&invite_id) {
            Some(invite) if invite.is_active() => Ok(invite),
            Some(_) => InvalidChangeSnafu { reason: format!("{invite_id} is not active") }.fail(),
            None => InvalidChangeSnafu { reason: format!("{invite_id} does not exist") }.fail(),
        }
    }

    /// Bans a principal and cancels its pending direct invites.
    fn ban(&mut self, principal: PrincipalId) {
        self.banned.insert(principal);
        for invite in self.invites.values_mut() {
            if invite.is_active() && invite.target.principal() == Some(principal) {
                invite.status = InviteStatus::Cancelled;
            }
        }
    }
}
