//! Ed25519 key ring.
//!
//! Holds one signing key per [`MemberIdentity`]. Revoking an identity drops
//! its signing key but keeps the verifying key, so links it authored before
//! a reset still verify during replay.

use std::{collections::HashMap, fmt};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rand::RngCore;
use teamchain_types::{LinkSigner, MemberIdentity, SignatureVerifier, SigningError};
use tracing::debug;

/// Signing and verifying keys indexed by identity.
#[derive(Default)]
pub struct KeyRing {
    signing: RwLock<HashMap<MemberIdentity, SigningKey>>,
    verifying: RwLock<HashMap<MemberIdentity, VerifyingKey>>,
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("signing", &"[REDACTED]")
            .field("verifying", &self.verifying.read().len())
            .finish()
    }
}

impl KeyRing {
    /// Creates an empty key ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh key pair for `identity`, replacing any existing one.
    pub fn provision(&self, identity: MemberIdentity) -> VerifyingKey {
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        let signing_key = SigningKey::from_bytes(&secret);
        let verifying_key = signing_key.verifying_key();

        self.signing.write().insert(identity, signing_key);
        self.verifying.write().insert(identity, verifying_key);
        debug!(identity = %identity, "Provisioned key pair");
        verifying_key
    }

    /// Drops the signing key of `identity`. Returns whether one existed.
    pub fn revoke(&self, identity: &MemberIdentity) -> bool {
        self.signing.write().remove(identity).is_some()
    }

    /// Whether `identity` can currently sign.
    pub fn has_key(&self, identity: &MemberIdentity) -> bool {
        self.signing.read().contains_key(identity)
    }

    /// The verifying key registered for `identity`.
    pub fn verifying_key(&self, identity: &MemberIdentity) -> Option<VerifyingKey> {
        self.verifying.read().get(identity).copied()
    }
}

impl LinkSigner for KeyRing {
    fn sign(&self, signer: &MemberIdentity, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        let keys = self.signing.read();
        let key = keys.get(signer).ok_or(SigningError::MissingKey { identity: *signer })?;
        let signature: Signature = key.sign(payload);
        Ok(signature.to_bytes().to_vec())
    }
}

impl SignatureVerifier for KeyRing {
    fn verify(&self, signer: &MemberIdentity, payload: &[u8], signature: &[u8]) -> bool {
        let Some(key) = self.verifying_key(signer) else {
            return false;
        };
        match Signature::from_slice(signature) {
            Ok(signature) => key.verify(payload, &signature).is_ok(),
            Err(_) => false,
        }
    }
}
