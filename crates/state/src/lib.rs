//! Chain validation and deterministic membership replay for teamchain.
//!
//! This crate turns an ordered team chain into current state:
//!
//! - [`TeamState`]: membership, settings, invites and bans at a seqno
//! - [`ChainValidator`]: checks one candidate link against a state
//! - [`MembershipEngine`]: full and incremental replay
//! - [`InviteRegistry`]: invite queries and resolution
//!
//! Nothing here performs I/O. Fetching and appending links is the
//! coordinator's job.

#![deny(unsafe_code)]

mod engine;
mod invites;
pub mod metrics;
mod team_state;
mod validator;

pub use engine::MembershipEngine;
pub use invites::InviteRegistry;
pub use team_state::TeamState;
pub use validator::{ChainValidator, ValidatedLink};
