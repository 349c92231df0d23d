//! Identity resolution.
//!
//! [`IdentityResolver`] answers "which epoch is this principal at, and can
//! it sign yet". [`InMemoryIdentityDirectory`] is the reference directory
//! backed by a [`KeyRing`]: provisioning a principal generates its key,
//! resetting one bumps the epoch and revokes the old key.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use teamchain_types::{Epoch, MemberIdentity, PrincipalId, ResolvedIdentity, TeamError};
use tracing::info;

use crate::keys::KeyRing;

/// Maps handles and principals to their current identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolves a handle or external identity string.
    async fn resolve(&self, handle: &str) -> Result<Option<ResolvedIdentity>, TeamError>;

    /// Resolves a known principal.
    async fn resolve_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<Option<ResolvedIdentity>, TeamError>;
}

/// In-memory identity directory.
#[derive(Debug)]
pub struct InMemoryIdentityDirectory {
    keys: Arc<KeyRing>,
    epochs: DashMap<PrincipalId, Epoch>,
    handles: DashMap<String, PrincipalId>,
    next_principal: AtomicU64,
}

impl InMemoryIdentityDirectory {
    /// Creates a directory whose principals sign through `keys`.
    pub fn new(keys: Arc<KeyRing>) -> Self {
        Self {
            keys,
            epochs: DashMap::new(),
            handles: DashMap::new(),
            next_principal: AtomicU64::new(1),
        }
    }

    /// The key ring backing this directory.
    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Registers `handle` at epoch 0 without key material.
    ///
    /// Registering a known handle returns its existing principal.
    pub fn register(&self, handle: &str) -> PrincipalId {
        *self.handles.entry(handle.to_string()).or_insert_with(|| {
            let principal = PrincipalId::new(self.next_principal.fetch_add(1, Ordering::Relaxed));
            self.epochs.insert(principal, 0);
            principal
        })
    }

    /// Registers `handle` and provisions its key in one step.
    pub fn register_provisioned(&self, handle: &str) -> MemberIdentity {
        let principal = self.register(handle);
        // registered above, so the principal is known
        self.provision(principal).unwrap_or(MemberIdentity::new(principal, 0))
    }

    /// Maps an additional handle (e.g. an external identity) onto `principal`.
    pub fn link_handle(&self, handle: &str, principal: PrincipalId) {
        self.handles.insert(handle.to_string(), principal);
    }

    /// Generates key material for the principal's current epoch.
    ///
    /// Returns `None` for an unknown principal.
    pub fn provision(&self, principal: PrincipalId) -> Option<MemberIdentity> {
        let epoch = *self.epochs.get(&principal)?;
        let identity = MemberIdentity::new(principal, epoch);
        self.keys.provision(identity);
        Some(identity)
    }

    /// Resets the principal: revokes the current key and bumps the epoch.
    ///
    /// The new epoch has no key material until [`provision`](Self::provision).
    pub fn reset(&self, principal: PrincipalId) -> Option<MemberIdentity> {
        let mut epoch = self.epochs.get_mut(&principal)?;
        self.keys.revoke(&MemberIdentity::new(principal, *epoch));
        *epoch += 1;
        let identity = MemberIdentity::new(principal, *epoch);
        info!(identity = %identity, "Principal reset");
        Some(identity)
    }

    /// Current identity of `principal`.
    pub fn current(&self, principal: PrincipalId) -> Option<MemberIdentity> {
        self.epochs.get(&principal).map(|epoch| MemberIdentity::new(principal, *epoch))
    }

    fn lookup(&self, principal: PrincipalId) -> Option<ResolvedIdentity> {
        let identity = self.current(principal)?;
        Some(ResolvedIdentity {
            principal,
            current_epoch: identity.epoch,
            has_key_material: self.keys.has_key(&identity),
        })
    }
}

#[async_trait]
impl IdentityResolver for InMemoryIdentityDirectory {
    async fn resolve(&self, handle: &str) -> Result<Option<ResolvedIdentity>, TeamError> {
        let Some(principal) = self.handles.get(handle).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.lookup(principal))
    }

    async fn resolve_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<Option<ResolvedIdentity>, TeamError> {
        Ok(self.lookup(principal))
    }
}
