//! Shared test utilities for teamchain crates.
//!
//! - [`assert_eventually`] / [`assert_eventually_async`] - poll until a condition holds
//! - [`DigestSigner`] - deterministic signer and verifier without key material
//! - [`strategies`] - proptest generators for roles, identities and changes
//! - [`test_rekey_config`], [`test_poll_config`], [`test_teams_config`] - fast configs

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod assertions;
pub use assertions::{assert_eventually, assert_eventually_async};

mod config;
pub use config::{test_poll_config, test_rekey_config, test_teams_config};

mod signer;
pub use signer::DigestSigner;

pub mod strategies;
