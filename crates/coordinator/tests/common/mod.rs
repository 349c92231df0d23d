//! Test harness for team service integration tests.
//!
//! `TestTeams` wires a [`TeamService`] to an in-memory store, identity
//! directory and Ed25519 key ring, the same way a deployment wires real
//! backends. Several services can share one backend to play separate
//! writer processes.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::sync::Arc;

use teamchain_coordinator::{InMemoryChainStore, InMemoryIdentityDirectory, KeyRing, TeamService};
use teamchain_test_utils::test_teams_config;
use teamchain_types::{
    MemberIdentity, PrincipalId, Role, TeamId, TeamSettings, config::TeamsConfig,
};

/// Shared store, directory and keys.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<InMemoryChainStore>,
    pub directory: Arc<InMemoryIdentityDirectory>,
    pub keys: Arc<KeyRing>,
}

impl Backend {
    pub fn new() -> Self {
        let keys = Arc::new(KeyRing::new());
        let store = Arc::new(InMemoryChainStore::new(keys.clone()));
        let directory = Arc::new(InMemoryIdentityDirectory::new(Arc::clone(&keys)));
        Self { store, directory, keys }
    }

    /// A service over this backend.
    pub fn service(&self, config: TeamsConfig) -> TeamService {
        TeamService::builder()
            .store(self.store.clone())
            .resolver(self.directory.clone())
            .signer(self.keys.clone())
            .verifier(self.keys.clone())
            .config(config)
            .build()
    }
}

/// A service plus direct access to its backend.
pub struct TestTeams {
    pub service: TeamService,
    pub backend: Backend,
}

impl TestTeams {
    pub fn new() -> Self {
        Self::with_config(test_teams_config())
    }

    pub fn with_config(config: TeamsConfig) -> Self {
        let backend = Backend::new();
        let service = backend.service(config);
        Self { service, backend }
    }

    /// Registers a principal that already holds key material.
    pub fn user(&self, handle: &str) -> MemberIdentity {
        self.backend.directory.register_provisioned(handle)
    }

    /// Registers a principal without key material.
    pub fn keyless_user(&self, handle: &str) -> PrincipalId {
        self.backend.directory.register(handle)
    }

    /// Creates a team owned by `owner`.
    pub async fn create(&self, name: &str, owner: MemberIdentity, settings: TeamSettings) -> TeamId {
        self.service.create_team(name, owner, settings).await.expect("create team")
    }

    /// Links stored for the team.
    pub fn chain_len(&self, team_id: TeamId) -> usize {
        self.backend.store.len(team_id)
    }

    /// Role of `identity` after a forced reload.
    pub async fn role(&self, team_id: TeamId, identity: MemberIdentity) -> Role {
        let members = self.service.load_membership(team_id, true).await.expect("load membership");
        members.get(&identity).copied().unwrap_or_default()
    }
}
