//! Team loading with an incremental snapshot cache.
//!
//! Snapshots are keyed by team and carry their own `(seqno, hash)`. A load
//! fetches only the links past the cached seqno and folds them on top; if
//! the fetched suffix does not chain onto the cached hash the snapshot is
//! discarded and the chain replayed from seqno 1.

use std::{fmt, sync::Arc};

use dashmap::DashMap;
use teamchain_state::{MembershipEngine, TeamState};
use teamchain_types::{TeamError, TeamId, error::TeamNotFoundSnafu, hash_eq};
use tracing::{debug, instrument, warn};

use crate::{metrics, store::ChainStore};

/// A team addressed by ID or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TeamRef {
    /// Team ID.
    Id(TeamId),
    /// Unique team name.
    Name(String),
}

impl From<TeamId> for TeamRef {
    fn from(team_id: TeamId) -> Self {
        TeamRef::Id(team_id)
    }
}

impl From<&str> for TeamRef {
    fn from(name: &str) -> Self {
        TeamRef::Name(name.to_string())
    }
}

impl From<String> for TeamRef {
    fn from(name: String) -> Self {
        TeamRef::Name(name)
    }
}

impl fmt::Display for TeamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamRef::Id(team_id) => write!(f, "{team_id}"),
            TeamRef::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// Loads [`TeamState`] from a [`ChainStore`], caching snapshots.
pub struct TeamLoader {
    store: Arc<dyn ChainStore>,
    engine: MembershipEngine,
    cache: DashMap<TeamId, TeamState>,
}

impl fmt::Debug for TeamLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamLoader").field("cached", &self.cache.len()).finish_non_exhaustive()
    }
}

impl TeamLoader {
    /// Creates a loader with an empty cache.
    pub fn new(store: Arc<dyn ChainStore>, engine: MembershipEngine) -> Self {
        Self { store, engine, cache: DashMap::new() }
    }

    /// The replay engine.
    pub fn engine(&self) -> &MembershipEngine {
        &self.engine
    }

    /// Resolves a [`TeamRef`] to an ID.
    ///
    /// IDs pass through unchecked; [`load`](Self::load) reports unknown teams.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNotFound`] for an unknown name.
    pub async fn resolve(&self, team: &TeamRef) -> Result<TeamId, TeamError> {
        match team {
            TeamRef::Id(team_id) => Ok(*team_id),
            TeamRef::Name(name) => match self.store.team_by_name(name).await? {
                Some(team_id) => Ok(team_id),
                None => TeamNotFoundSnafu { team: team.to_string() }.fail(),
            },
        }
    }

    /// Current state of `team_id`.
    ///
    /// With `force_repoll` the cached snapshot is discarded and the whole
    /// chain is fetched and replayed.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNotFound`] if the team has no links, and
    /// [`TeamError::ReplayInvariantViolation`] if the fetched chain does not replay.
    #[instrument(skip(self))]
    pub async fn load(&self, team_id: TeamId, force_repoll: bool) -> Result<TeamState, TeamError> {
        let cached =
            if force_repoll { None } else { self.cache.get(&team_id).map(|entry| entry.clone()) };

        let state = match cached {
            Some(snapshot) => self.refresh(team_id, snapshot).await?,
            None => {
                metrics::record_loader_cache(false);
                self.full_replay(team_id).await?
            },
        };

        if state.is_empty() {
            self.cache.remove(&team_id);
            return TeamNotFoundSnafu { team: team_id.to_string() }.fail();
        }
        self.cache.insert(team_id, state.clone());
        Ok(state)
    }

    /// The cached snapshot of `team_id`, without touching the store.
    pub fn cached(&self, team_id: TeamId) -> Option<TeamState> {
        self.cache.get(&team_id).map(|entry| entry.clone())
    }

    /// IDs of all teams with a cached snapshot.
    pub fn cached_teams(&self) -> Vec<TeamId> {
        self.cache.iter().map(|entry| *entry.key()).collect()
    }

    /// Drops the cached snapshot of `team_id`.
    pub fn invalidate(&self, team_id: TeamId) {
        self.cache.remove(&team_id);
    }

    async fn refresh(&self, team_id: TeamId, snapshot: TeamState) -> Result<TeamState, TeamError> {
        let suffix = self.store.fetch(team_id, snapshot.last_seqno()).await?;
        let Some(first) = suffix.first() else {
            let unchanged = match self.store.latest(team_id).await? {
                Some((seqno, hash)) => {
                    seqno == snapshot.last_seqno() && hash_eq(&hash, &snapshot.last_hash())
                },
                None => false,
            };
            metrics::record_loader_cache(unchanged);
            if unchanged {
                return Ok(snapshot);
            }
            warn!(team_id = %team_id, seqno = snapshot.last_seqno(), "Cached tail diverged from store");
            return self.full_replay(team_id).await;
        };

        if !hash_eq(&first.prev_hash, &snapshot.last_hash()) {
            metrics::record_loader_cache(false);
            warn!(
                team_id = %team_id,
                seqno = first.seqno,
                "Fetched suffix does not chain onto cached snapshot"
            );
            return self.full_replay(team_id).await;
        }

        metrics::record_loader_cache(true);
        debug!(team_id = %team_id, from = snapshot.last_seqno(), links = suffix.len(), "Incremental load");
        self.engine.replay(team_id, &suffix, Some(&snapshot))
    }

    async fn full_replay(&self, team_id: TeamId) -> Result<TeamState, TeamError> {
        let links = self.store.fetch(team_id, 0).await?;
        self.engine.replay(team_id, &links, None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use teamchain_test_utils::DigestSigner;
    use teamchain_types::{
        ChangeType, ErrorCode, MemberIdentity, PrincipalId, ROOT_HASH, Role, TeamSettings,
        team_id_for_name,
    };

    use super::*;
    use crate::store::InMemoryChainStore;

    fn owner() -> MemberIdentity {
        MemberIdentity::new(PrincipalId::new(1), 0)
    }

    struct Fixture {
        signer: DigestSigner,
        store: Arc<InMemoryChainStore>,
        loader: TeamLoader,
        team_id: TeamId,
    }

    async fn fixture() -> Fixture {
        let signer = DigestSigner::default();
        let store = Arc::new(InMemoryChainStore::new(Arc::new(signer.clone())));
        let loader = TeamLoader::new(store.clone(), MembershipEngine::new(Arc::new(signer.clone())));
        let team_id = team_id_for_name("loader");
        let root = signer.link(team_id, 1, ROOT_HASH, owner(), ChangeType::CreateTeam {
            name: "loader".to_string(),
            settings: TeamSettings::closed(),
        });
        store.append(team_id, root).await.unwrap();
        Fixture { signer, store, loader, team_id }
    }

    async fn add_member(fx: &Fixture, principal: u64) {
        let (seqno, hash) = fx.store.latest(fx.team_id).await.unwrap().unwrap();
        let link = fx.signer.link(fx.team_id, seqno + 1, hash, owner(), ChangeType::AddMember {
            identity: MemberIdentity::new(PrincipalId::new(principal), 0),
            role: Role::Reader,
        });
        fx.store.append(fx.team_id, link).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_caches_and_refreshes() {
        let fx = fixture().await;
        let first = fx.loader.load(fx.team_id, false).await.unwrap();
        assert_eq!(first.last_seqno(), 1);
        assert_eq!(fx.loader.cached_teams(), vec![fx.team_id]);

        add_member(&fx, 2).await;
        add_member(&fx, 3).await;
        let refreshed = fx.loader.load(fx.team_id, false).await.unwrap();
        assert_eq!(refreshed.last_seqno(), 3);

        let forced = fx.loader.load(fx.team_id, true).await.unwrap();
        assert_eq!(forced, refreshed);
    }

    #[tokio::test]
    async fn test_unchanged_tail_returns_snapshot() {
        let fx = fixture().await;
        let first = fx.loader.load(fx.team_id, false).await.unwrap();
        let second = fx.loader.load(fx.team_id, false).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_team_not_found() {
        let fx = fixture().await;
        let err = fx.loader.load(TeamId::new(12345), false).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TeamNotFound);
        assert!(fx.loader.cached(TeamId::new(12345)).is_none());

        let err = fx.loader.resolve(&TeamRef::from("missing")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TeamNotFound);
    }

    #[tokio::test]
    async fn test_resolve_by_name() {
        let fx = fixture().await;
        assert_eq!(fx.loader.resolve(&"loader".into()).await.unwrap(), fx.team_id);
        assert_eq!(fx.loader.resolve(&fx.team_id.into()).await.unwrap(), fx.team_id);
    }

    #[tokio::test]
    async fn test_diverged_snapshot_triggers_full_replay() {
        let fx = fixture().await;
        add_member(&fx, 2).await;

        // a seqno 1 snapshot from another history
        let other_id = team_id_for_name("elsewhere");
        let root = fx.signer.link(other_id, 1, ROOT_HASH, owner(), ChangeType::CreateTeam {
            name: "elsewhere".to_string(),
            settings: TeamSettings::closed(),
        });
        fx.store.append(other_id, root).await.unwrap();
        let foreign = fx.loader.load(other_id, false).await.unwrap();
        fx.loader.cache.insert(fx.team_id, foreign);

        add_member(&fx, 3).await;
        let state = fx.loader.load(fx.team_id, false).await.unwrap();
        assert_eq!(state.team_id(), fx.team_id);
        assert_eq!(state.last_seqno(), 3);
        assert!(state.role_of(&MemberIdentity::new(PrincipalId::new(2), 0)).is_member());
        assert!(state.role_of(&MemberIdentity::new(PrincipalId::new(3), 0)).is_member());
    }

    #[tokio::test]
    async fn test_invalidate_drops_snapshot() {
        let fx = fixture().await;
        fx.loader.load(fx.team_id, false).await.unwrap();
        fx.loader.invalidate(fx.team_id);
        assert!(fx.loader.cached(fx.team_id).is_none());
    }
}
