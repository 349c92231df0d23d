//! Deterministic link signer for tests.
//!
//! Signatures are `SHA-256(seed || principal || epoch || payload)`. This is
//! not a signature scheme; it only lets state tests exercise the signature
//! check without real key material.

use sha2::{Digest, Sha256};
use teamchain_types::{
    ChangeType, Hash, LinkSigner, MemberIdentity, Seqno, SignatureVerifier, SigningError, TeamId,
    TeamLink,
};

/// Keyed-digest signer that signs for any identity.
#[derive(Debug, Clone)]
pub struct DigestSigner {
    seed: [u8; 32],
}

impl DigestSigner {
    /// Creates a signer. Signers with different seeds reject each other's signatures.
    pub fn new(seed: u8) -> Self {
        Self { seed: [seed; 32] }
    }

    fn digest(&self, signer: &MemberIdentity, payload: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(signer.principal.value().to_be_bytes());
        hasher.update(signer.epoch.to_be_bytes());
        hasher.update(payload);
        hasher.finalize().to_vec()
    }

    /// Builds and signs a link.
    pub fn link(
        &self,
        team_id: TeamId,
        seqno: Seqno,
        prev_hash: Hash,
        signer: MemberIdentity,
        change: ChangeType,
    ) -> TeamLink {
        let mut link = TeamLink::builder()
            .team_id(team_id)
            .seqno(seqno)
            .prev_hash(prev_hash)
            .signer(signer)
            .change(change)
            .build();
        link.signature = self.digest(&signer, &link.signing_payload());
        link
    }
}

impl Default for DigestSigner {
    fn default() -> Self {
        Self::new(0x42)
    }
}

impl LinkSigner for DigestSigner {
    fn sign(&self, signer: &MemberIdentity, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        Ok(self.digest(signer, payload))
    }
}

impl SignatureVerifier for DigestSigner {
    fn verify(&self, signer: &MemberIdentity, payload: &[u8], signature: &[u8]) -> bool {
        self.digest(signer, payload) == signature
    }
}
