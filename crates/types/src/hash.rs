//! Hashing for team chain links.
//!
//! All hashing uses SHA-256 over a canonical binary encoding:
//! - integers are big-endian
//! - strings and byte fields are length-prefixed with a u32 LE length
//! - enum variants are tagged with a stable type byte
//!
//! The signing payload covers every link field except the signature. The link
//! hash covers the payload plus the signature, so a re-signed link never
//! collides with the original.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::types::{ChangeType, InviteTarget, MemberIdentity, TeamId, TeamLink, TeamSettings};

/// SHA-256 hash output (32 bytes).
pub type Hash = [u8; 32];

/// Zero hash: 32 zero bytes.
/// Used ONLY as `prev_hash` of the first link of a chain.
pub const ROOT_HASH: Hash = [0u8; 32];

/// Domain separation tag prefixed to every signing payload.
const LINK_DOMAIN: &[u8] = b"teamchain.link.v1";

/// Domain separation tag for team ID derivation.
const TEAM_ID_DOMAIN: &[u8] = b"teamchain.team-id.v1";

/// Compute SHA-256 hash of arbitrary data.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Constant-time hash comparison.
///
/// Use this for every `prev_hash` check.
#[inline]
pub fn hash_eq(a: &Hash, b: &Hash) -> bool {
    a.ct_eq(b).into()
}

/// First eight hex characters of a hash, for log fields.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}

/// Team ID for a team name: the first 8 bytes of SHA-256(domain || name), big-endian.
///
/// Names are unique per store, so IDs derived this way never collide in practice
/// and every writer computes the same ID without coordination.
pub fn team_id_for_name(name: &str) -> TeamId {
    let mut buf = Vec::with_capacity(TEAM_ID_DOMAIN.len() + name.len() + 8);
    put_length_prefixed(&mut buf, TEAM_ID_DOMAIN);
    put_length_prefixed(&mut buf, name.as_bytes());
    let digest = sha256(&buf);
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    TeamId::new(u64::from_be_bytes(id))
}

/// Canonical bytes a link signer signs.
///
/// Encoding:
/// - domain tag (length-prefixed)
/// - team_id: u64 BE
/// - seqno: u64 BE
/// - prev_hash: 32 bytes
/// - signer: principal u64 BE + epoch u64 BE
/// - change (type byte + encoded fields)
pub fn link_signing_payload(link: &TeamLink) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    put_length_prefixed(&mut buf, LINK_DOMAIN);
    buf.extend_from_slice(&link.team_id.value().to_be_bytes());
    buf.extend_from_slice(&link.seqno.to_be_bytes());
    buf.extend_from_slice(&link.prev_hash);
    put_identity(&mut buf, &link.signer);
    put_change(&mut buf, &link.change);
    buf
}

/// Hash of a link: SHA-256(signing_payload || len(signature) || signature).
pub fn link_hash(link: &TeamLink) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(link_signing_payload(link));
    hasher.update((link.signature.len() as u32).to_le_bytes());
    hasher.update(&link.signature);
    hasher.finalize().into()
}

fn put_change(buf: &mut Vec<u8>, change: &ChangeType) {
    buf.push(change.type_byte());
    match change {
        ChangeType::CreateTeam { name, settings } => {
            put_length_prefixed(buf, name.as_bytes());
            put_settings(buf, settings);
        },
        ChangeType::AddMember { identity, role } | ChangeType::ChangeRole { identity, role } => {
            put_identity(buf, identity);
            buf.push(role.type_byte());
        },
        ChangeType::RemoveMember { identity, ban } => {
            put_identity(buf, identity);
            buf.push(u8::from(*ban));
        },
        ChangeType::ChangeSettings { settings } => put_settings(buf, settings),
        ChangeType::AddInvite { invite_id, target, role } => {
            buf.extend_from_slice(&invite_id.value().to_be_bytes());
            put_target(buf, target);
            buf.push(role.type_byte());
        },
        ChangeType::CancelInvite { invite_id } => {
            buf.extend_from_slice(&invite_id.value().to_be_bytes());
        },
        ChangeType::CompleteInvite { invite_id, identity } => {
            buf.extend_from_slice(&invite_id.value().to_be_bytes());
            put_identity(buf, identity);
        },
        ChangeType::Batch(changes) => {
            buf.extend_from_slice(&(changes.len() as u32).to_le_bytes());
            for inner in changes {
                put_change(buf, inner);
            }
        },
    }
}

#[inline]
fn put_identity(buf: &mut Vec<u8>, identity: &MemberIdentity) {
    buf.extend_from_slice(&identity.principal.value().to_be_bytes());
    buf.extend_from_slice(&identity.epoch.to_be_bytes());
}

#[inline]
fn put_settings(buf: &mut Vec<u8>, settings: &TeamSettings) {
    buf.push(u8::from(settings.open));
    buf.push(settings.join_as.type_byte());
}

fn put_target(buf: &mut Vec<u8>, target: &InviteTarget) {
    match target {
        InviteTarget::Direct(identity) => {
            buf.push(0x01);
            put_identity(buf, identity);
        },
        InviteTarget::External(name) => {
            buf.push(0x02);
            put_length_prefixed(buf, name.as_bytes());
        },
    }
}

#[inline]
fn put_length_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::types::{InviteId, PrincipalId, Role, TeamId};

    fn link(change: ChangeType) -> TeamLink {
        TeamLink::builder()
            .team_id(TeamId::new(1))
            .seqno(2)
            .prev_hash([7u8; 32])
            .signer(MemberIdentity::new(PrincipalId::new(1), 0))
            .change(change)
            .build()
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_eq() {
        assert!(hash_eq(&ROOT_HASH, &[0u8; 32]));
        assert!(!hash_eq(&ROOT_HASH, &[1u8; 32]));
    }

    #[test]
    fn test_signature_changes_hash_not_payload() {
        let unsigned = link(ChangeType::CancelInvite { invite_id: InviteId::new(4) });
        let mut signed = unsigned.clone();
        signed.signature = vec![1, 2, 3];

        assert_eq!(unsigned.signing_payload(), signed.signing_payload());
        assert_ne!(unsigned.hash(), signed.hash());
    }

    #[test]
    fn test_distinct_changes_distinct_payloads() {
        let identity = MemberIdentity::new(PrincipalId::new(2), 0);
        let add = link(ChangeType::AddMember { identity, role: Role::Reader });
        let change = link(ChangeType::ChangeRole { identity, role: Role::Reader });
        let remove = link(ChangeType::RemoveMember { identity, ban: false });
        let ban = link(ChangeType::RemoveMember { identity, ban: true });

        assert_ne!(add.hash(), change.hash());
        assert_ne!(remove.hash(), ban.hash());
    }

    #[test]
    fn test_epoch_is_covered() {
        let a = link(ChangeType::AddMember {
            identity: MemberIdentity::new(PrincipalId::new(2), 0),
            role: Role::Reader,
        });
        let b = link(ChangeType::AddMember {
            identity: MemberIdentity::new(PrincipalId::new(2), 1),
            role: Role::Reader,
        });
        assert_ne!(a.signing_payload(), b.signing_payload());
    }

    #[test]
    fn test_batch_order_is_covered() {
        let first = ChangeType::CancelInvite { invite_id: InviteId::new(1) };
        let second = ChangeType::CancelInvite { invite_id: InviteId::new(2) };
        let ab = link(ChangeType::Batch(vec![first.clone(), second.clone()]));
        let ba = link(ChangeType::Batch(vec![second, first]));
        assert_ne!(ab.hash(), ba.hash());
    }

    #[test]
    fn test_team_id_for_name_is_stable() {
        assert_eq!(team_id_for_name("acme"), team_id_for_name("acme"));
        assert_ne!(team_id_for_name("acme"), team_id_for_name("acme2"));
    }

    #[test]
    fn test_short_hex() {
        assert_eq!(short_hex(&[0xab; 32]), "abababab");
    }
}
