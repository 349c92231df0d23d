//! Core type definitions for team membership chains.
//!
//! - Identifier types (TeamId, PrincipalId, InviteId)
//! - Roles, member identities and team settings
//! - Invites and identity resolution results
//! - Membership changes and the signed links that carry them

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{InvalidChangeSnafu, ValidationError},
    hash::{Hash, link_hash, link_signing_payload},
};

// ============================================================================
// Identifier Types
// ============================================================================

/// Generates a newtype wrapper around a numeric type for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]`
/// - `From<inner>` and `Into<inner>` conversions
/// - `Display` with a semantic prefix (e.g., `team:42`)
/// - `new()` constructor and `value()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = <$inner as std::str::FromStr>::Err;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse::<$inner>().map(Self)
            }
        }
    };
}

define_id!(
    /// Stable identifier for a team. Never reused.
    ///
    /// # Display
    ///
    /// Formats with `team:` prefix: `team:42`.
    TeamId, u64, "team"
);

define_id!(
    /// Persistent identifier of a principal (a person or bot account).
    ///
    /// Survives account resets; the [`Epoch`] distinguishes the key generations.
    ///
    /// # Display
    ///
    /// Formats with `uid:` prefix: `uid:7`.
    PrincipalId, u64, "uid"
);

define_id!(
    /// Identifier of an invite within a team chain.
    ///
    /// # Display
    ///
    /// Formats with `invite:` prefix: `invite:3`.
    InviteId, u64, "invite"
);

/// Position of a link in a team chain. The first link has seqno 1.
pub type Seqno = u64;

/// Key generation of a principal. Incremented once per account reset.
pub type Epoch = u64;

// ============================================================================
// Roles and Identities
// ============================================================================

/// Team role, ordered by ascending privilege.
///
/// `None` is the absence of membership; it is never stored in a membership map.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Not a member.
    #[default]
    None,
    /// Restricted bot with access to selected conversations only.
    Restricted,
    /// Bot member.
    Bot,
    /// Read-only member.
    Reader,
    /// Member with write access.
    Writer,
    /// Administrator.
    Admin,
    /// Owner. A team always keeps at least one.
    Owner,
}

impl Role {
    /// Highest role an open team may hand out to self-joining principals.
    pub const MAX_OPEN_JOIN: Role = Role::Writer;

    /// All roles in ascending order.
    pub const ALL: [Role; 7] = [
        Role::None,
        Role::Restricted,
        Role::Bot,
        Role::Reader,
        Role::Writer,
        Role::Admin,
        Role::Owner,
    ];

    /// Returns true for any role other than [`Role::None`].
    #[inline]
    pub fn is_member(self) -> bool {
        self != Role::None
    }

    /// Returns true for `Admin` and `Owner`.
    #[inline]
    pub fn is_admin_or_above(self) -> bool {
        self >= Role::Admin
    }

    /// Stable single-byte encoding used in link hashing.
    pub const fn type_byte(self) -> u8 {
        match self {
            Role::None => 0x00,
            Role::Restricted => 0x01,
            Role::Bot => 0x02,
            Role::Reader => 0x03,
            Role::Writer => 0x04,
            Role::Admin => 0x05,
            Role::Owner => 0x06,
        }
    }

    /// Lowercase name of the role.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::None => "none",
            Role::Restricted => "restricted",
            Role::Bot => "bot",
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A principal at a specific key epoch.
///
/// Two identities with the same principal but different epochs are distinct
/// members: a reset principal is never merged with its pre-reset self.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberIdentity {
    /// Persistent principal identifier.
    pub principal: PrincipalId,
    /// Key epoch of the principal.
    pub epoch: Epoch,
}

impl MemberIdentity {
    /// Creates an identity from a principal and epoch.
    #[inline]
    pub const fn new(principal: PrincipalId, epoch: Epoch) -> Self {
        Self { principal, epoch }
    }

    /// Invite slot name for this identity: `{principal}%{epoch}`.
    pub fn invite_name(&self) -> String {
        format!("{}%{}", self.principal.value(), self.epoch)
    }
}

impl fmt::Display for MemberIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%{}", self.principal, self.epoch)
    }
}

/// What the identity directory currently knows about a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// Persistent principal identifier.
    pub principal: PrincipalId,
    /// Latest epoch of the principal.
    pub current_epoch: Epoch,
    /// Whether keys exist for `current_epoch`. False between a reset and re-provisioning.
    pub has_key_material: bool,
}

impl ResolvedIdentity {
    /// The member identity at the current epoch.
    #[inline]
    pub fn identity(&self) -> MemberIdentity {
        MemberIdentity::new(self.principal, self.current_epoch)
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Team-wide settings controlling self-service joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSettings {
    /// Whether outsiders may join without per-request approval.
    pub open: bool,
    /// Role granted to self-joining principals. Meaningful only while `open`.
    pub join_as: Role,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self::closed()
    }
}

impl TeamSettings {
    /// Settings of a closed team.
    pub const fn closed() -> Self {
        Self { open: false, join_as: Role::Reader }
    }

    /// Settings of an open team granting `join_as` to joiners.
    pub const fn open(join_as: Role) -> Self {
        Self { open: true, join_as }
    }

    /// Checks that an open team never grants more than [`Role::MAX_OPEN_JOIN`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidChange`] if the team is open and
    /// `join_as` is `None` or above `Writer`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.open {
            return Ok(());
        }
        snafu::ensure!(
            self.join_as.is_member(),
            InvalidChangeSnafu { reason: "open team must grant a role to joiners".to_string() }
        );
        snafu::ensure!(
            self.join_as <= Role::MAX_OPEN_JOIN,
            InvalidChangeSnafu {
                reason: format!("open team may not grant {} to joiners", self.join_as),
            }
        );
        Ok(())
    }
}

// ============================================================================
// Invites
// ============================================================================

/// Who an invite is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InviteTarget {
    /// A known principal at a specific epoch, waiting for key material.
    Direct(MemberIdentity),
    /// An out-of-band identity (e.g. `alice@social`) not yet bound to a principal.
    External(String),
}

impl InviteTarget {
    /// The principal an invite is bound to, for direct invites.
    pub fn principal(&self) -> Option<PrincipalId> {
        match self {
            InviteTarget::Direct(identity) => Some(identity.principal),
            InviteTarget::External(_) => None,
        }
    }
}

impl fmt::Display for InviteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InviteTarget::Direct(identity) => f.write_str(&identity.invite_name()),
            InviteTarget::External(name) => f.write_str(name),
        }
    }
}

/// Lifecycle state of an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InviteStatus {
    /// Waiting to be completed.
    Active,
    /// Converted into a membership.
    Completed,
    /// Cancelled by an administrator or by a ban.
    Cancelled,
}

/// A pending (or resolved) membership grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    /// Invite identifier, unique within the team.
    pub id: InviteId,
    /// Who the invite is for.
    pub target: InviteTarget,
    /// Role granted on completion.
    pub role: Role,
    /// Current status.
    pub status: InviteStatus,
}

impl Invite {
    /// Returns true while the invite awaits completion.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == InviteStatus::Active
    }
}

// ============================================================================
// Changes and Links
// ============================================================================

/// A membership-affecting change carried by a link.
///
/// Every variant has a total, deterministic effect when replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// Creates the team. Only valid at seqno 1; the signer becomes its first owner.
    CreateTeam {
        /// Unique team name.
        name: String,
        /// Initial settings.
        settings: TeamSettings,
    },
    /// Grants `role` to `identity`.
    AddMember {
        /// Member being added.
        identity: MemberIdentity,
        /// Granted role.
        role: Role,
    },
    /// Clears the membership of `identity`. With `ban`, bars its principal from the team.
    RemoveMember {
        /// Member being removed.
        identity: MemberIdentity,
        /// Whether the principal is added to the ban list.
        ban: bool,
    },
    /// Overwrites the role of an existing member.
    ChangeRole {
        /// Member whose role changes.
        identity: MemberIdentity,
        /// New role.
        role: Role,
    },
    /// Replaces the team settings.
    ChangeSettings {
        /// New settings.
        settings: TeamSettings,
    },
    /// Records a new active invite.
    AddInvite {
        /// Invite identifier.
        invite_id: InviteId,
        /// Invite addressee.
        target: InviteTarget,
        /// Role granted on completion.
        role: Role,
    },
    /// Cancels an active invite.
    CancelInvite {
        /// Invite being cancelled.
        invite_id: InviteId,
    },
    /// Converts an active invite into a membership of `identity`.
    CompleteInvite {
        /// Invite being completed.
        invite_id: InviteId,
        /// Identity that becomes a member.
        identity: MemberIdentity,
    },
    /// Several changes applied atomically by one link. Never nested.
    Batch(Vec<ChangeType>),
}

impl ChangeType {
    /// Combines changes into one. A single change is returned as-is.
    pub fn batch(mut changes: Vec<ChangeType>) -> ChangeType {
        if changes.len() == 1
            && let Some(change) = changes.pop()
        {
            return change;
        }
        ChangeType::Batch(changes)
    }

    /// The atomic changes carried, in application order.
    pub fn atomic_changes(&self) -> &[ChangeType] {
        match self {
            ChangeType::Batch(changes) => changes,
            other => std::slice::from_ref(other),
        }
    }

    /// Stable single-byte encoding used in link hashing.
    pub const fn type_byte(&self) -> u8 {
        match self {
            ChangeType::CreateTeam { .. } => 0x01,
            ChangeType::AddMember { .. } => 0x02,
            ChangeType::RemoveMember { .. } => 0x03,
            ChangeType::ChangeRole { .. } => 0x04,
            ChangeType::ChangeSettings { .. } => 0x05,
            ChangeType::AddInvite { .. } => 0x06,
            ChangeType::CancelInvite { .. } => 0x07,
            ChangeType::CompleteInvite { .. } => 0x08,
            ChangeType::Batch(_) => 0x09,
        }
    }

    /// Short name of the variant for logs and errors.
    pub const fn kind(&self) -> &'static str {
        match self {
            ChangeType::CreateTeam { .. } => "create_team",
            ChangeType::AddMember { .. } => "add_member",
            ChangeType::RemoveMember { .. } => "remove_member",
            ChangeType::ChangeRole { .. } => "change_role",
            ChangeType::ChangeSettings { .. } => "change_settings",
            ChangeType::AddInvite { .. } => "add_invite",
            ChangeType::CancelInvite { .. } => "cancel_invite",
            ChangeType::CompleteInvite { .. } => "complete_invite",
            ChangeType::Batch(_) => "batch",
        }
    }
}

/// One signed, hash-linked record in a team chain.
///
/// Links are immutable once appended. `prev_hash` is the hash of the link at
/// `seqno - 1`, or [`crate::hash::ROOT_HASH`] for the first link.
///
/// ```no_run
/// # use teamchain_types::{ChangeType, MemberIdentity, PrincipalId, TeamId, TeamLink, TeamSettings};
/// # use teamchain_types::hash::ROOT_HASH;
/// let owner = MemberIdentity::new(PrincipalId::new(1), 0);
/// let link = TeamLink::builder()
///     .team_id(TeamId::new(7))
///     .seqno(1)
///     .prev_hash(ROOT_HASH)
///     .signer(owner)
///     .change(ChangeType::CreateTeam {
///         name: "acme".to_string(),
///         settings: TeamSettings::closed(),
///     })
///     .build();
/// assert!(link.is_root());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct TeamLink {
    /// Team this link belongs to.
    #[builder(into)]
    pub team_id: TeamId,
    /// Position in the chain, starting at 1.
    pub seqno: Seqno,
    /// Hash of the preceding link.
    pub prev_hash: Hash,
    /// Identity that authored and signed the link.
    pub signer: MemberIdentity,
    /// The change carried.
    pub change: ChangeType,
    /// Signature over [`TeamLink::signing_payload`].
    #[builder(default)]
    pub signature: Vec<u8>,
}

impl TeamLink {
    /// Returns true for the first link of a chain.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.seqno == 1
    }

    /// Canonical bytes covered by the signature (everything except the signature).
    pub fn signing_payload(&self) -> Vec<u8> {
        link_signing_payload(self)
    }

    /// Hash of the link including its signature; the next link's `prev_hash`.
    pub fn hash(&self) -> Hash {
        link_hash(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::hash::ROOT_HASH;

    fn alice() -> MemberIdentity {
        MemberIdentity::new(PrincipalId::new(1), 0)
    }

    #[test]
    fn test_role_total_order() {
        for pair in Role::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should rank below {}", pair[0], pair[1]);
        }
        assert!(Role::Owner.is_admin_or_above());
        assert!(Role::Admin.is_admin_or_above());
        assert!(!Role::Writer.is_admin_or_above());
        assert!(!Role::None.is_member());
    }

    #[test]
    fn test_role_serde_snake_case() {
        let json = serde_json::to_string(&Role::Writer).unwrap();
        assert_eq!(json, "\"writer\"");
        let role: Role = serde_json::from_str("\"restricted\"").unwrap();
        assert_eq!(role, Role::Restricted);
    }

    #[test]
    fn test_identity_display_and_invite_name() {
        let id = MemberIdentity::new(PrincipalId::new(9), 3);
        assert_eq!(id.to_string(), "uid:9%3");
        assert_eq!(id.invite_name(), "9%3");
        assert_eq!(InviteTarget::Direct(id).to_string(), "9%3");
    }

    #[test]
    fn test_epochs_are_distinct_identities() {
        let before = MemberIdentity::new(PrincipalId::new(5), 0);
        let after = MemberIdentity::new(PrincipalId::new(5), 1);
        assert_ne!(before, after);
        assert_eq!(
            InviteTarget::Direct(before).principal(),
            InviteTarget::Direct(after).principal()
        );
    }

    #[test]
    fn test_settings_validate_limits_join_role() {
        assert!(TeamSettings::open(Role::Reader).validate().is_ok());
        assert!(TeamSettings::open(Role::Writer).validate().is_ok());
        assert!(TeamSettings::open(Role::Admin).validate().is_err());
        assert!(TeamSettings::open(Role::Owner).validate().is_err());
        assert!(TeamSettings::open(Role::None).validate().is_err());
        // join_as is ignored while closed
        let closed = TeamSettings { open: false, join_as: Role::Owner };
        assert!(closed.validate().is_ok());
    }

    #[test]
    fn test_batch_of_one_is_unwrapped() {
        let change = ChangeType::ChangeSettings { settings: TeamSettings::closed() };
        assert_eq!(ChangeType::batch(vec![change.clone()]), change);
        assert_eq!(change.atomic_changes().len(), 1);

        let batch = ChangeType::batch(vec![change.clone(), change]);
        assert_eq!(batch.kind(), "batch");
        assert_eq!(batch.atomic_changes().len(), 2);
    }

    #[test]
    fn test_link_builder_and_root() {
        let link = TeamLink::builder()
            .team_id(TeamId::new(3))
            .seqno(1)
            .prev_hash(ROOT_HASH)
            .signer(alice())
            .change(ChangeType::CreateTeam {
                name: "acme".to_string(),
                settings: TeamSettings::closed(),
            })
            .build();
        assert!(link.is_root());
        assert_eq!(link.team_id, TeamId::new(3));
        assert!(link.signature.is_empty());
    }

    #[test]
    fn test_id_display_and_parse() {
        assert_eq!(TeamId::new(42).to_string(), "team:42");
        assert_eq!(InviteId::new(3).to_string(), "invite:3");
        let parsed: PrincipalId = "17".parse().unwrap();
        assert_eq!(parsed, PrincipalId::new(17));
    }
}
