//! Write coordination for teamchain team chains.
//!
//! Every chain append goes through one [`RekeyCoordinator`] per process,
//! which serializes writers per team and coalesces queued events into as
//! few links as possible:
//!
//! - [`OpenTeamJoinCoordinator`]: self-service joins for open teams
//! - [`ResetReconciler`]: moves reset members to invites at their old role
//! - invite resolution through [`teamchain_state::InviteRegistry`]
//! - [`wait_for_seqno`]: bounded polling for chain growth
//!
//! [`TeamService`] is the caller-facing facade. The external systems a
//! deployment plugs in are [`ChainStore`], [`IdentityResolver`] and a
//! [`teamchain_types::LinkSigner`]; in-memory versions of each ship here.

#![deny(unsafe_code)]

mod config_loader;
mod identity;
mod join;
mod keys;
mod loader;
mod logging;
pub mod metrics;
mod poll;
mod rekey;
mod reset;
mod service;
mod store;

pub use config_loader::{ENV_PREFIX, load_config, parse_config};
pub use identity::{IdentityResolver, InMemoryIdentityDirectory};
pub use join::{AccessRequest, JoinOutcome, OpenTeamJoinCoordinator, RejectReason};
pub use keys::KeyRing;
pub use loader::{TeamLoader, TeamRef};
pub use logging::{try_init_logging, use_json};
pub use poll::wait_for_seqno;
pub use rekey::{PendingEvent, RejectedEvent, RekeyCoordinator, RekeyReport};
pub use reset::{ResetDetection, ResetReconciler};
pub use service::{RequestAccessAck, TeamService};
pub use store::{AppendError, AppendReceipt, ChainStore, InMemoryChainStore};
