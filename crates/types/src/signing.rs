//! Signing seams for team links.
//!
//! Key lifecycle and the signature scheme live behind these traits. Keys are
//! addressed by [`MemberIdentity`], so a key is valid only for the epoch it
//! was issued at.

use snafu::Snafu;

use crate::types::{MemberIdentity, TeamLink};

/// Errors from a [`LinkSigner`].
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SigningError {
    /// No key is held for the identity.
    #[snafu(display("No key material for {identity}"))]
    MissingKey {
        /// Identity without a key.
        identity: MemberIdentity,
    },
    /// The signing backend refused.
    #[snafu(display("Signing backend error: {message}"))]
    Backend {
        /// Error description.
        message: String,
    },
}

/// Produces signatures on behalf of identities.
pub trait LinkSigner: Send + Sync {
    /// Signs `payload` with the key of `signer`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::MissingKey`] if no key exists for `signer`.
    fn sign(&self, signer: &MemberIdentity, payload: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// Verifies signatures against the key of an identity.
pub trait SignatureVerifier: Send + Sync {
    /// Returns true if `signature` is valid for `payload` under `signer`'s key.
    fn verify(&self, signer: &MemberIdentity, payload: &[u8], signature: &[u8]) -> bool;
}

impl TeamLink {
    /// Signs the link in place with the key of its `signer`.
    ///
    /// # Errors
    ///
    /// Propagates the signer's error.
    pub fn sign_with(mut self, signer: &dyn LinkSigner) -> Result<Self, SigningError> {
        self.signature = signer.sign(&self.signer, &self.signing_payload())?;
        Ok(self)
    }

    /// Verifies the link signature.
    pub fn verify_with(&self, verifier: &dyn SignatureVerifier) -> bool {
        !self.signature.is_empty()
            && verifier.verify(&self.signer, &self.signing_payload(), &self.signature)
    }
}
