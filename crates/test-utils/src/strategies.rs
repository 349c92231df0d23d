//! Proptest strategies for teamchain domain types.
//!
//! Generators draw principals from a small pool so that random changes
//! collide often enough to exercise conflicts, bans and role floors.
//!
//! # Usage
//!
//! ```no_run
//! use proptest::prelude::*;
//! use teamchain_test_utils::strategies;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(changes in strategies::arb_changes(16)) {
//!         // fold changes and check an invariant
//!     }
//! }
//! ```

use proptest::prelude::*;
use teamchain_types::{
    ChangeType, InviteId, InviteTarget, MemberIdentity, PrincipalId, Role, TeamSettings,
};

/// Number of distinct principals generated.
pub const PRINCIPAL_POOL: u64 = 6;

/// Generates any [`Role`], including `None`.
pub fn arb_role() -> impl Strategy<Value = Role> {
    prop::sample::select(Role::ALL.to_vec())
}

/// Generates a membership role (`Restricted` through `Owner`).
pub fn arb_member_role() -> impl Strategy<Value = Role> {
    prop::sample::select(Role::ALL[1..].to_vec())
}

/// Generates a role an open team may grant (`Restricted` through `Writer`).
pub fn arb_join_role() -> impl Strategy<Value = Role> {
    prop::sample::select(vec![Role::Restricted, Role::Bot, Role::Reader, Role::Writer])
}

/// Generates a principal from the shared pool.
pub fn arb_principal() -> impl Strategy<Value = PrincipalId> {
    (1..=PRINCIPAL_POOL).prop_map(PrincipalId::new)
}

/// Generates a member identity with epoch 0-2.
pub fn arb_identity() -> impl Strategy<Value = MemberIdentity> {
    (arb_principal(), 0u64..3).prop_map(|(principal, epoch)| MemberIdentity::new(principal, epoch))
}

/// Generates valid team settings.
pub fn arb_settings() -> impl Strategy<Value = TeamSettings> {
    prop_oneof![Just(TeamSettings::closed()), arb_join_role().prop_map(TeamSettings::open),]
}

/// Generates an invite target, mostly direct.
pub fn arb_invite_target() -> impl Strategy<Value = InviteTarget> {
    prop_oneof![
        4 => arb_identity().prop_map(InviteTarget::Direct),
        1 => "[a-z]{3,8}@social".prop_map(InviteTarget::External),
    ]
}

/// Generates one atomic change (never `CreateTeam` or `Batch`).
///
/// Invite IDs are drawn from 1-8, so generated cancels and completions may
/// refer to invites that do not exist.
pub fn arb_change() -> impl Strategy<Value = ChangeType> {
    let invite_id = (1u64..=8).prop_map(InviteId::new);
    prop_oneof![
        3 => (arb_identity(), arb_member_role())
            .prop_map(|(identity, role)| ChangeType::AddMember { identity, role }),
        2 => (arb_identity(), any::<bool>())
            .prop_map(|(identity, ban)| ChangeType::RemoveMember { identity, ban }),
        2 => (arb_identity(), arb_member_role())
            .prop_map(|(identity, role)| ChangeType::ChangeRole { identity, role }),
        1 => arb_settings().prop_map(|settings| ChangeType::ChangeSettings { settings }),
        2 => (invite_id.clone(), arb_invite_target(), arb_member_role())
            .prop_map(|(invite_id, target, role)| ChangeType::AddInvite { invite_id, target, role }),
        1 => invite_id.clone().prop_map(|invite_id| ChangeType::CancelInvite { invite_id }),
        1 => (invite_id, arb_identity())
            .prop_map(|(invite_id, identity)| ChangeType::CompleteInvite { invite_id, identity }),
    ]
}

/// Generates up to `max` changes, occasionally grouped into batches.
pub fn arb_changes(max: usize) -> impl Strategy<Value = Vec<ChangeType>> {
    let entry = prop_oneof![
        4 => arb_change(),
        1 => prop::collection::vec(arb_change(), 2..4).prop_map(ChangeType::Batch),
    ];
    prop::collection::vec(entry, 0..=max)
}
