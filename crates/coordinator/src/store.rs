//! Chain store interface and the in-memory reference store.
//!
//! The store is the only durable component. It accepts a link only if it
//! extends the current tail, so two writers racing on the same team see
//! exactly one success and one [`AppendError::StaleBase`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use snafu::Snafu;
use teamchain_state::{ChainValidator, TeamState};
use teamchain_types::{
    ChangeType, Hash, MemberIdentity, Seqno, SignatureVerifier, TeamError, TeamId, TeamLink,
    ValidationError,
};
use tracing::debug;

/// Position of a freshly appended link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Seqno the link landed at.
    pub seqno: Seqno,
    /// Hash of the appended link, the new chain tail.
    pub hash: Hash,
}

/// Reasons a store refuses an append.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum AppendError {
    /// The link does not extend the current tail. Rebuild on the new tail.
    #[snafu(display("Stale base for {team_id}: link at {seqno}, tail at {tail}"))]
    StaleBase {
        /// Team appended to.
        team_id: TeamId,
        /// Seqno the link claimed.
        seqno: Seqno,
        /// Seqno of the stored tail.
        tail: Seqno,
    },

    /// The signature does not verify for the signer.
    #[snafu(display("Signature from {signer} does not verify"))]
    SignatureInvalid {
        /// Claimed signer.
        signer: MemberIdentity,
    },

    /// Authorization or structural rule refused the change.
    #[snafu(display("Append refused: {source}"))]
    PermissionDenied {
        /// The first violated rule.
        source: ValidationError,
    },

    /// Another team already uses the name.
    #[snafu(display("Team name {name:?} is taken"))]
    NameTaken {
        /// Requested name.
        name: String,
    },

    /// Backend failure.
    #[snafu(display("Store unavailable: {message}"))]
    Unavailable {
        /// Error description.
        message: String,
    },
}

impl From<AppendError> for TeamError {
    fn from(err: AppendError) -> Self {
        match err {
            AppendError::StaleBase { seqno, tail, .. } => {
                ValidationError::StaleBase { seqno, tail }.into()
            },
            AppendError::SignatureInvalid { signer } => {
                ValidationError::BadSignature { signer }.into()
            },
            AppendError::PermissionDenied { source } => source.into(),
            AppendError::NameTaken { name } => TeamError::TeamNameTaken { name },
            AppendError::Unavailable { message } => TeamError::StoreUnavailable { message },
        }
    }
}

/// Durable, ordered, append-only log of links per team.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Appends `link` if it extends the tail of `team_id`.
    async fn append(&self, team_id: TeamId, link: TeamLink) -> Result<AppendReceipt, AppendError>;

    /// Links with seqno greater than `since`, in seqno order.
    ///
    /// An unknown team yields an empty sequence.
    async fn fetch(&self, team_id: TeamId, since: Seqno) -> Result<Vec<TeamLink>, TeamError>;

    /// Seqno and hash of the tail, or `None` for an unknown team.
    async fn latest(&self, team_id: TeamId) -> Result<Option<(Seqno, Hash)>, TeamError>;

    /// Resolves a team name to its ID.
    async fn team_by_name(&self, name: &str) -> Result<Option<TeamId>, TeamError>;
}

#[derive(Debug, Clone)]
struct StoredChain {
    links: Vec<TeamLink>,
    state: TeamState,
}

/// In-memory [`ChainStore`].
///
/// Every append is validated against the stored tail state, so the store
/// never holds a chain that fails replay. The per-team map entry lock makes
/// check-and-append atomic.
#[derive(Debug)]
pub struct InMemoryChainStore {
    validator: ChainValidator,
    chains: DashMap<TeamId, StoredChain>,
    names: DashMap<String, TeamId>,
}

impl InMemoryChainStore {
    /// Creates an empty store verifying signatures with `verifier`.
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { validator: ChainValidator::new(verifier), chains: DashMap::new(), names: DashMap::new() }
    }

    /// Number of links stored for `team_id`.
    pub fn len(&self, team_id: TeamId) -> usize {
        self.chains.get(&team_id).map_or(0, |chain| chain.links.len())
    }

    /// Whether the store holds no teams.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    fn reserve_name(&self, team_id: TeamId, link: &TeamLink) -> Result<Option<String>, AppendError> {
        let ChangeType::CreateTeam { name, .. } = &link.change else {
            return Ok(None);
        };
        match self.names.entry(name.clone()) {
            Entry::Occupied(_) => NameTakenSnafu { name: name.clone() }.fail(),
            Entry::Vacant(slot) => {
                slot.insert(team_id);
                Ok(Some(name.clone()))
            },
        }
    }

    /// Validates `link` against `chain` and pushes it on success.
    fn extend(
        &self,
        team_id: TeamId,
        chain: &mut StoredChain,
        link: TeamLink,
    ) -> Result<AppendReceipt, AppendError> {
        let validated = match self.validator.validate(&link, &chain.state) {
            Ok(validated) => validated,
            Err(ValidationError::StaleBase { seqno, tail }) => {
                return StaleBaseSnafu { team_id, seqno, tail }.fail();
            },
            Err(ValidationError::BadSignature { signer }) => {
                return SignatureInvalidSnafu { signer }.fail();
            },
            Err(source) => return Err(AppendError::PermissionDenied { source }),
        };

        let reserved = self.reserve_name(team_id, &link)?;
        let (link, state) = validated.into_parts();
        let receipt = AppendReceipt { seqno: state.last_seqno(), hash: state.last_hash() };
        chain.links.push(link);
        chain.state = state;

        debug!(
            team_id = %team_id,
            seqno = receipt.seqno,
            created = reserved.is_some(),
            "Appended link"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn append(&self, team_id: TeamId, link: TeamLink) -> Result<AppendReceipt, AppendError> {
        // the vacant entry keeps the shard locked, so an unknown team is only
        // inserted once its root link is accepted
        match self.chains.entry(team_id) {
            Entry::Occupied(mut slot) => self.extend(team_id, slot.get_mut(), link),
            Entry::Vacant(slot) => {
                let mut chain =
                    StoredChain { links: Vec::new(), state: TeamState::empty(team_id) };
                let receipt = self.extend(team_id, &mut chain, link)?;
                slot.insert(chain);
                Ok(receipt)
            },
        }
    }

    async fn fetch(&self, team_id: TeamId, since: Seqno) -> Result<Vec<TeamLink>, TeamError> {
        let Some(chain) = self.chains.get(&team_id) else {
            return Ok(Vec::new());
        };
        // seqno n lives at index n - 1
        let start = usize::try_from(since).unwrap_or(usize::MAX).min(chain.links.len());
        Ok(chain.links[start..].to_vec())
    }

    async fn latest(&self, team_id: TeamId) -> Result<Option<(Seqno, Hash)>, TeamError> {
        Ok(self
            .chains
            .get(&team_id)
            .filter(|chain| !chain.links.is_empty())
            .map(|chain| (chain.state.last_seqno(), chain.state.last_hash())))
    }

    async fn team_by_name(&self, name: &str) -> Result<Option<TeamId>, TeamError> {
        Ok(self.names.get(name).map(|entry| *entry.value()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use teamchain_test_utils::DigestSigner;
    use teamchain_types::{ErrorCode, PrincipalId, ROOT_HASH, Role, TeamSettings, team_id_for_name};

    use super::*;

    fn owner() -> MemberIdentity {
        MemberIdentity::new(PrincipalId::new(1), 0)
    }

    fn create(signer: &DigestSigner, name: &str) -> (TeamId, TeamLink) {
        let team_id = team_id_for_name(name);
        let change =
            ChangeType::CreateTeam { name: name.to_string(), settings: TeamSettings::closed() };
        (team_id, signer.link(team_id, 1, ROOT_HASH, owner(), change))
    }

    #[tokio::test]
    async fn test_append_and_fetch() {
        let signer = DigestSigner::default();
        let store = InMemoryChainStore::new(Arc::new(signer.clone()));
        let (team_id, root) = create(&signer, "core");

        let first = store.append(team_id, root).await.unwrap();
        assert_eq!(first.seqno, 1);

        let add = signer.link(team_id, 2, first.hash, owner(), ChangeType::AddMember {
            identity: MemberIdentity::new(PrincipalId::new(2), 0),
            role: Role::Reader,
        });
        let second = store.append(team_id, add).await.unwrap();
        assert_eq!(second.seqno, 2);

        assert_eq!(store.fetch(team_id, 0).await.unwrap().len(), 2);
        let suffix = store.fetch(team_id, 1).await.unwrap();
        assert_eq!(suffix.len(), 1);
        assert_eq!(suffix[0].seqno, 2);
        assert!(store.fetch(team_id, 2).await.unwrap().is_empty());
        assert!(store.fetch(team_id, 40).await.unwrap().is_empty());
        assert_eq!(store.latest(team_id).await.unwrap(), Some((2, second.hash)));
        assert_eq!(store.team_by_name("core").await.unwrap(), Some(team_id));
    }

    #[tokio::test]
    async fn test_unknown_team_is_empty() {
        let store = InMemoryChainStore::new(Arc::new(DigestSigner::default()));
        assert!(store.fetch(TeamId::new(3), 0).await.unwrap().is_empty());
        assert_eq!(store.latest(TeamId::new(3)).await.unwrap(), None);
        assert_eq!(store.team_by_name("nope").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_losing_writer_gets_stale_base() {
        let signer = DigestSigner::default();
        let store = InMemoryChainStore::new(Arc::new(signer.clone()));
        let (team_id, root) = create(&signer, "race");
        let tail = store.append(team_id, root).await.unwrap();

        let settings = |open| {
            let settings =
                if open { TeamSettings::open(Role::Reader) } else { TeamSettings::closed() };
            signer.link(team_id, 2, tail.hash, owner(), ChangeType::ChangeSettings { settings })
        };
        store.append(team_id, settings(true)).await.unwrap();

        let err = store.append(team_id, settings(false)).await.unwrap_err();
        assert_eq!(err, AppendError::StaleBase { team_id, seqno: 2, tail: 2 });
        assert_eq!(TeamError::from(err).code(), ErrorCode::StaleBase);
        assert_eq!(store.len(team_id), 2);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let signer = DigestSigner::default();
        let store = InMemoryChainStore::new(Arc::new(signer.clone()));
        let (team_id, _) = create(&signer, "forged");
        let (_, forged) = create(&DigestSigner::new(7), "forged");

        let err = store.append(team_id, forged).await.unwrap_err();
        assert_eq!(err, AppendError::SignatureInvalid { signer: owner() });
        assert_eq!(store.len(team_id), 0);
        assert!(store.is_empty());
        assert_eq!(store.team_by_name("forged").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refused_first_link_leaves_no_chain() {
        let signer = DigestSigner::default();
        let store = InMemoryChainStore::new(Arc::new(signer.clone()));
        let team_id = TeamId::new(5);

        let orphan = signer.link(team_id, 2, ROOT_HASH, owner(), ChangeType::ChangeSettings {
            settings: TeamSettings::open(Role::Reader),
        });
        assert!(store.append(team_id, orphan).await.is_err());
        assert!(store.is_empty());
        assert_eq!(store.latest(team_id).await.unwrap(), None);

        let (team_id, root) = create(&signer, "after");
        store.append(team_id, root).await.unwrap();
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_permission_rejection_carries_rule() {
        let signer = DigestSigner::default();
        let store = InMemoryChainStore::new(Arc::new(signer.clone()));
        let (team_id, root) = create(&signer, "perm");
        let tail = store.append(team_id, root).await.unwrap();

        let outsider = MemberIdentity::new(PrincipalId::new(9), 0);
        let link = signer.link(team_id, 2, tail.hash, outsider, ChangeType::ChangeSettings {
            settings: TeamSettings::open(Role::Reader),
        });
        let err = store.append(team_id, link).await.unwrap_err();
        assert!(matches!(
            err,
            AppendError::PermissionDenied { source: ValidationError::PermissionDenied { .. } }
        ));
        assert_eq!(TeamError::from(err).code(), ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_names_are_unique() {
        let signer = DigestSigner::default();
        let store = InMemoryChainStore::new(Arc::new(signer.clone()));
        let (team_id, root) = create(&signer, "dup");
        store.append(team_id, root).await.unwrap();

        // same name under a different ID still collides
        let other = TeamId::new(77);
        let link = signer.link(other, 1, ROOT_HASH, owner(), ChangeType::CreateTeam {
            name: "dup".to_string(),
            settings: TeamSettings::closed(),
        });
        let err = store.append(other, link).await.unwrap_err();
        assert_eq!(err, AppendError::NameTaken { name: "dup".to_string() });
        assert_eq!(TeamError::from(err).code(), ErrorCode::TeamNameTaken);
    }
}
