//! The team service facade.
//!
//! [`TeamService`] is the surface callers use: it resolves team references,
//! answers queries from the snapshot cache, rejects what can be rejected
//! synchronously, and hands everything that changes a chain to the
//! [`RekeyCoordinator`].

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use teamchain_state::{MembershipEngine, TeamState};
use teamchain_types::{
    ChangeType, Epoch, Invite, InviteId, InviteTarget, LinkSigner, MemberIdentity, PrincipalId, Role,
    Seqno, SignatureVerifier, TeamError, TeamId, TeamSettings,
    config::{PollConfig, TeamsConfig},
    error::{BannedSnafu, InviteNotFoundSnafu, TeamNotOpenSnafu},
    team_id_for_name,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    identity::IdentityResolver,
    join::AccessRequest,
    loader::{TeamLoader, TeamRef},
    poll,
    rekey::{RekeyCoordinator, RekeyReport},
    store::{AppendReceipt, ChainStore},
};

/// Acknowledgement of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestAccessAck {
    /// The request waits for the next trigger.
    pub queued: bool,
    /// Whether the team was open when the request arrived.
    pub is_open: bool,
}

/// Team membership operations over a chain store.
pub struct TeamService {
    config: TeamsConfig,
    store: Arc<dyn ChainStore>,
    loader: Arc<TeamLoader>,
    coordinator: Arc<RekeyCoordinator>,
}

impl fmt::Debug for TeamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamService")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl TeamService {
    /// Wires a service over `store`.
    ///
    /// `signer` signs every link the service appends; `verifier` checks
    /// signatures during replay.
    #[builder]
    pub fn new(
        store: Arc<dyn ChainStore>,
        resolver: Arc<dyn IdentityResolver>,
        signer: Arc<dyn LinkSigner>,
        verifier: Arc<dyn SignatureVerifier>,
        #[builder(default)] config: TeamsConfig,
    ) -> Self {
        let loader = Arc::new(TeamLoader::new(Arc::clone(&store), MembershipEngine::new(verifier)));
        let coordinator = Arc::new(
            RekeyCoordinator::builder()
                .store(Arc::clone(&store))
                .loader(Arc::clone(&loader))
                .resolver(resolver)
                .signer(signer)
                .config(config.rekey.clone())
                .join_config(config.join.clone())
                .build(),
        );
        Self { config, store, loader, coordinator }
    }
}

impl TeamService {
    /// The service configuration.
    pub fn config(&self) -> &TeamsConfig {
        &self.config
    }

    /// The coordinator appending this service's links.
    pub fn coordinator(&self) -> &Arc<RekeyCoordinator> {
        &self.coordinator
    }

    /// Creates a team owned by `owner`. The ID is derived from `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNameTaken`] if the name is in use, or the
    /// validation error of illegal settings.
    pub async fn create_team(
        &self,
        name: &str,
        owner: MemberIdentity,
        settings: TeamSettings,
    ) -> Result<TeamId, TeamError> {
        let team_id = team_id_for_name(name);
        self.coordinator.create_team(team_id, name, owner, settings).await?;
        Ok(team_id)
    }

    /// Queues a settings change for the next trigger.
    ///
    /// Permission and settings rules are checked now against the current
    /// state and again when the change is planned.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNotFound`], or the validation error the
    /// change would fail with.
    #[instrument(skip(self, team))]
    pub async fn change_settings(
        &self,
        team: impl Into<TeamRef>,
        author: MemberIdentity,
        settings: TeamSettings,
    ) -> Result<(), TeamError> {
        let (team_id, state) = self.load_ref(team.into(), false).await?;
        self.loader.engine().validator().preview(
            &state,
            author,
            &ChangeType::ChangeSettings { settings },
        )?;
        self.coordinator.enqueue_settings(team_id, author, settings);
        debug!(team_id = %team_id, open = settings.open, join_as = %settings.join_as, "Queued settings change");
        Ok(())
    }

    /// Requests self-service membership.
    ///
    /// The decision is made at the next trigger. A full queue triggers
    /// right away.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNotFound`] and [`TeamError::Banned`]
    /// synchronously, and [`TeamError::TeamNotOpen`] for a closed team
    /// unless closed teams queue requests.
    #[instrument(skip(self, team))]
    pub async fn request_access(
        &self,
        team: impl Into<TeamRef>,
        requester: PrincipalId,
    ) -> Result<RequestAccessAck, TeamError> {
        let (team_id, state) = self.load_ref(team.into(), false).await?;
        if state.is_banned(requester) {
            return BannedSnafu { team_id, principal: requester }.fail();
        }
        let is_open = state.settings().open;
        if !is_open && !self.config.join.queue_requests_while_closed {
            return TeamNotOpenSnafu { team_id }.fail();
        }

        if self.coordinator.enqueue_access(AccessRequest::new(team_id, requester))
            && let Err(err) = self.coordinator.trigger(team_id).await
        {
            warn!(team_id = %team_id, error = %err, "Eager trigger failed, requests stay queued");
        }
        debug!(team_id = %team_id, requester = %requester, is_open, "Queued access request");
        Ok(RequestAccessAck { queued: true, is_open })
    }

    /// Queues an authored change for the next trigger.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNotFound`], or the validation error the
    /// change fails with against the current state.
    pub async fn queue_change(
        &self,
        team: impl Into<TeamRef>,
        author: MemberIdentity,
        change: ChangeType,
    ) -> Result<(), TeamError> {
        let (team_id, state) = self.load_ref(team.into(), false).await?;
        self.loader.engine().validator().preview(&state, author, &change)?;
        self.coordinator.enqueue_change(team_id, author, change);
        Ok(())
    }

    /// Appends `change` signed by `author` right away.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the change, or
    /// [`TeamError::ConcurrentAppendRace`] once retries run out.
    pub async fn submit_change(
        &self,
        team: impl Into<TeamRef>,
        author: MemberIdentity,
        change: ChangeType,
    ) -> Result<AppendReceipt, TeamError> {
        let team_id = self.loader.resolve(&team.into()).await?;
        self.coordinator.submit(team_id, author, change).await
    }

    /// Removes `target` from the team.
    ///
    /// Removing someone else from an open team also bans their principal.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the removal.
    pub async fn remove_member(
        &self,
        team: impl Into<TeamRef>,
        author: MemberIdentity,
        target: MemberIdentity,
    ) -> Result<AppendReceipt, TeamError> {
        let team_id = self.loader.resolve(&team.into()).await?;
        self.coordinator
            .submit_with(team_id, author, |state| {
                let ban = state.settings().open && target != author;
                Ok(ChangeType::RemoveMember { identity: target, ban })
            })
            .await
    }

    /// Invites an out-of-band identity such as `alice@social`.
    ///
    /// The invite completes once the resolver maps `handle` to a principal
    /// with key material.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the invite, for instance when one is
    /// already active for `handle`.
    pub async fn invite_external(
        &self,
        team: impl Into<TeamRef>,
        author: MemberIdentity,
        handle: &str,
        role: Role,
    ) -> Result<AppendReceipt, TeamError> {
        let team_id = self.loader.resolve(&team.into()).await?;
        let target = InviteTarget::External(handle.to_string());
        self.coordinator
            .submit_with(team_id, author, |state| {
                Ok(ChangeType::AddInvite { invite_id: state.next_invite_id(), target: target.clone(), role })
            })
            .await
    }

    /// Cancels an active invite.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::InviteNotFound`] if no active invite has that ID.
    pub async fn cancel_invite(
        &self,
        team: impl Into<TeamRef>,
        author: MemberIdentity,
        invite_id: InviteId,
    ) -> Result<AppendReceipt, TeamError> {
        let team_id = self.loader.resolve(&team.into()).await?;
        self.coordinator
            .submit_with(team_id, author, |state| match state.invites().get(&invite_id) {
                Some(invite) if invite.is_active() => Ok(ChangeType::CancelInvite { invite_id }),
                _ => InviteNotFoundSnafu { team_id, invite_id }.fail(),
            })
            .await
    }

    /// Signals that `principal` holds key material at `epoch`.
    ///
    /// Cached teams that know the principal, or hold external invites, are
    /// flagged for the next background tick. Returns the flagged teams.
    /// Teams this service has never loaded are not flagged; their next
    /// [`trigger`](Self::trigger) picks the signal up.
    pub fn notify_key_material_ready(&self, principal: PrincipalId, epoch: Epoch) -> Vec<TeamId> {
        self.coordinator.mark_key_material_ready(principal, epoch);
        let flagged = self.flag_teams(|state| {
            knows_principal(state, principal)
                || state.invites().values().any(|invite| {
                    invite.is_active() && matches!(invite.target, InviteTarget::External(_))
                })
        });
        info!(principal = %principal, epoch, teams = flagged.len(), "Key material ready");
        flagged
    }

    /// Signals that `principal` reset its account.
    ///
    /// Cached teams with a membership or invite for the principal are
    /// flagged for reconciliation. Returns the flagged teams. Every trigger
    /// checks all members for resets, so teams outside the cache reconcile
    /// on their next explicit [`trigger`](Self::trigger).
    pub fn notify_identity_reset(&self, principal: PrincipalId) -> Vec<TeamId> {
        let flagged = self.flag_teams(|state| knows_principal(state, principal));
        info!(principal = %principal, teams = flagged.len(), "Identity reset");
        flagged
    }

    // the store has no principal index, so only loaded teams can be matched
    fn flag_teams(&self, affected: impl Fn(&TeamState) -> bool) -> Vec<TeamId> {
        let mut flagged = Vec::new();
        for team_id in self.loader.cached_teams() {
            if let Some(state) = self.loader.cached(team_id)
                && affected(&state)
            {
                self.coordinator.mark_dirty(team_id);
                flagged.push(team_id);
            }
        }
        flagged
    }

    /// Current membership of the team.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNotFound`], or a store or replay error.
    pub async fn load_membership(
        &self,
        team: impl Into<TeamRef>,
        force_repoll: bool,
    ) -> Result<BTreeMap<MemberIdentity, Role>, TeamError> {
        let (_, state) = self.load_ref(team.into(), force_repoll).await?;
        Ok(state.members().clone())
    }

    /// The full replayed state of the team.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNotFound`], or a store or replay error.
    pub async fn load_team(
        &self,
        team: impl Into<TeamRef>,
        force_repoll: bool,
    ) -> Result<TeamState, TeamError> {
        let (_, state) = self.load_ref(team.into(), force_repoll).await?;
        Ok(state)
    }

    /// Active invites of the team, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNotFound`], or a store or replay error.
    pub async fn active_invites(&self, team: impl Into<TeamRef>) -> Result<Vec<Invite>, TeamError> {
        let (_, state) = self.load_ref(team.into(), false).await?;
        Ok(state.invites().values().filter(|invite| invite.is_active()).cloned().collect())
    }

    /// Waits until the team's chain reaches `target`.
    ///
    /// `timeout` overrides the configured poll bound.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::PollExceeded`] when the bound elapses first.
    pub async fn wait_for_seqno(
        &self,
        team_id: TeamId,
        target: Seqno,
        timeout: Option<Duration>,
    ) -> Result<Seqno, TeamError> {
        let config =
            PollConfig { timeout: timeout.unwrap_or(self.config.poll.timeout), ..self.config.poll.clone() };
        poll::wait_for_seqno(self.store.as_ref(), team_id, target, &config).await
    }

    /// Runs a rekey cycle for the team now.
    ///
    /// # Errors
    ///
    /// See [`RekeyCoordinator::trigger`].
    pub async fn trigger(&self, team: impl Into<TeamRef>) -> Result<RekeyReport, TeamError> {
        let team_id = self.loader.resolve(&team.into()).await?;
        self.coordinator.trigger(team_id).await
    }

    /// Spawns the background trigger loop.
    pub fn start(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        Arc::clone(&self.coordinator).start(cancel)
    }

    async fn load_ref(
        &self,
        team: TeamRef,
        force_repoll: bool,
    ) -> Result<(TeamId, TeamState), TeamError> {
        let team_id = self.loader.resolve(&team).await?;
        let state = self.loader.load(team_id, force_repoll).await?;
        Ok((team_id, state))
    }
}

fn knows_principal(state: &TeamState, principal: PrincipalId) -> bool {
    state.identities_of(principal).next().is_some()
        || state.invites().values().any(|invite| {
            invite.is_active() && invite.target.principal() == Some(principal)
        })
}
