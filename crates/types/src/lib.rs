//! Core types, errors, hashing and configuration for teamchain.
//!
//! This crate provides the foundational types shared by every other crate:
//! - Identifiers (TeamId, PrincipalId, InviteId), roles and member identities
//! - Membership changes and the signed, hash-linked links that carry them
//! - SHA-256 link hashing and the signing seams
//! - Error types using snafu, with a numeric [`ErrorCode`] catalog
//! - Configuration structs

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod hash;
pub mod signing;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ErrorCode, Result, TeamError, ValidationError};
pub use hash::{Hash, ROOT_HASH, hash_eq, sha256, team_id_for_name};
pub use signing::{LinkSigner, SignatureVerifier, SigningError};
pub use types::*;
