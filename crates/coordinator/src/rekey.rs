//! Write coalescing ("rekey") coordinator.
//!
//! The coordinator is the only writer of team chains. Callers enqueue
//! events and are acknowledged immediately; [`RekeyCoordinator::trigger`]
//! later turns everything pending for a team into as few links as possible.
//!
//! # Cycle
//!
//! Each trigger holds the team's write lock for its whole duration, so at
//! most one cycle (or direct submission) runs per team. Teams never share a
//! lock. A cycle:
//!
//! 1. Drains the pending queue and loads the team state.
//! 2. Plans changes in a fixed order: settings, queued admin changes, reset
//!    reconciliation, invite resolution, access requests. Every change is
//!    checked against the state produced by the ones before it; a refused
//!    event is reported and dropped without affecting the rest.
//! 3. Groups consecutive changes of the same signer into links of at most
//!    `max_changes_per_link` changes, signs and appends them.
//!
//! Losing an append race re-plans the unconsumed events against a forced
//! reload, backing off between attempts. After `max_append_attempts` lost
//! races the cycle fails with [`TeamError::ConcurrentAppendRace`] and the
//! unconsumed events go back to the queue.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    ops::Range,
    sync::Arc,
    time::{Duration, Instant},
};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use dashmap::DashMap;
use teamchain_state::{ChainValidator, InviteRegistry, TeamState};
use teamchain_types::{
    ChangeType, Epoch, Hash, InviteId, InviteTarget, LinkSigner, MemberIdentity, PrincipalId,
    ROOT_HASH, ResolvedIdentity, Seqno, TeamError, TeamId, TeamLink, TeamSettings, ValidationError,
    config::{JoinConfig, RekeyConfig},
    error::{ConcurrentAppendRaceSnafu, StoreUnavailableSnafu, TeamNameTakenSnafu},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    identity::IdentityResolver,
    join::{AccessRequest, JoinOutcome, OpenTeamJoinCoordinator},
    loader::TeamLoader,
    metrics,
    reset::ResetReconciler,
    store::{AppendError, AppendReceipt, ChainStore},
};

/// An event waiting for the next trigger of its team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEvent {
    /// Settings change authored by an administrator.
    Settings {
        /// Author and signer.
        author: MemberIdentity,
        /// New settings.
        settings: TeamSettings,
    },
    /// Any other authored change.
    Change {
        /// Author and signer.
        author: MemberIdentity,
        /// The change.
        change: ChangeType,
    },
    /// Self-service join request, signed by the team operator.
    Access(AccessRequest),
}

impl PendingEvent {
    /// Planning stage: lower stages are planned first.
    fn stage(&self) -> u8 {
        match self {
            PendingEvent::Settings { .. } => 0,
            PendingEvent::Change { .. } => 1,
            PendingEvent::Access(_) => 2,
        }
    }

    /// Authored change, for settings and admin events.
    fn authored(&self) -> Option<(MemberIdentity, ChangeType)> {
        match self {
            PendingEvent::Settings { author, settings } => {
                Some((*author, ChangeType::ChangeSettings { settings: *settings }))
            },
            PendingEvent::Change { author, change } => Some((*author, change.clone())),
            PendingEvent::Access(_) => None,
        }
    }
}

impl fmt::Display for PendingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingEvent::Settings { author, .. } => write!(f, "change_settings by {author}"),
            PendingEvent::Change { author, change } => write!(f, "{} by {author}", change.kind()),
            PendingEvent::Access(request) => write!(f, "access request from {}", request.requester),
        }
    }
}

/// A queued event or planned change that was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEvent {
    /// What was refused.
    pub description: String,
    /// The first rule it broke.
    pub error: ValidationError,
}

/// What one trigger cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RekeyReport {
    /// Team triggered.
    pub team_id: TeamId,
    /// Appended links, in order.
    pub links: Vec<AppendReceipt>,
    /// Join policy decisions for the access requests processed.
    pub join_outcomes: Vec<(PrincipalId, JoinOutcome)>,
    /// Refused events and reconciliations.
    pub rejected: Vec<RejectedEvent>,
    /// Principals whose reset was reconciled.
    pub resets: Vec<PrincipalId>,
    /// Invites completed.
    pub invites_resolved: Vec<InviteId>,
}

impl RekeyReport {
    fn new(team_id: TeamId) -> Self {
        Self {
            team_id,
            links: Vec::new(),
            join_outcomes: Vec::new(),
            rejected: Vec::new(),
            resets: Vec::new(),
            invites_resolved: Vec::new(),
        }
    }

    /// Seqno of the last appended link.
    pub fn last_seqno(&self) -> Option<Seqno> {
        self.links.last().map(|receipt| receipt.seqno)
    }

    /// Outcome of the access request from `principal`, if one was processed.
    pub fn outcome_for(&self, principal: PrincipalId) -> Option<&JoinOutcome> {
        self.join_outcomes
            .iter()
            .find(|(requester, _)| *requester == principal)
            .map(|(_, outcome)| outcome)
    }

    fn record_link(&mut self, receipt: AppendReceipt, items: &[PlannedItem]) {
        self.links.push(receipt);
        for item in items {
            match &item.source {
                ItemSource::Event { outcome: Some((principal, outcome)), .. } => {
                    metrics::record_join_outcome(outcome.kind());
                    self.join_outcomes.push((*principal, outcome.clone()));
                },
                ItemSource::Event { outcome: None, .. } => {},
                ItemSource::Reset { principal } => {
                    if !self.resets.contains(principal) {
                        metrics::record_reset_detected();
                        self.resets.push(*principal);
                    }
                },
                ItemSource::Invite { invite_id } => {
                    metrics::record_invite_resolved();
                    self.invites_resolved.push(*invite_id);
                },
            }
        }
    }
}

#[derive(Debug, Clone)]
enum ItemSource {
    Event { index: usize, outcome: Option<(PrincipalId, JoinOutcome)> },
    Reset { principal: PrincipalId },
    Invite { invite_id: InviteId },
}

#[derive(Debug, Clone)]
struct PlannedItem {
    signer: MemberIdentity,
    change: ChangeType,
    source: ItemSource,
}

impl PlannedItem {
    fn event_index(&self) -> Option<usize> {
        match self.source {
            ItemSource::Event { index, .. } => Some(index),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Plan {
    items: Vec<PlannedItem>,
    rejected: Vec<RejectedEvent>,
    refused: Vec<(PrincipalId, JoinOutcome)>,
}

impl Plan {
    fn reject(&mut self, description: String, error: ValidationError) {
        debug!(description = %description, error = %error, "Refused planned change");
        self.rejected.push(RejectedEvent { description, error });
    }
}

#[derive(Debug, Default)]
struct PendingQueue {
    events: Vec<PendingEvent>,
    dirty: bool,
}

#[derive(Debug, Default)]
struct TeamSlot {
    write_lock: tokio::sync::Mutex<()>,
    pending: parking_lot::Mutex<PendingQueue>,
}

impl TeamSlot {
    fn take(&self) -> Vec<PendingEvent> {
        let mut pending = self.pending.lock();
        pending.dirty = false;
        std::mem::take(&mut pending.events)
    }

    /// Puts unconsumed events back ahead of anything queued meanwhile.
    fn requeue(&self, mut events: Vec<PendingEvent>) {
        let mut pending = self.pending.lock();
        events.append(&mut pending.events);
        pending.events = events;
        pending.dirty = true;
    }
}

fn no_operator() -> ValidationError {
    ValidationError::InvalidChange { reason: "no admin or owner available to sign".to_string() }
}

/// The single writer of team chains.
pub struct RekeyCoordinator {
    store: Arc<dyn ChainStore>,
    loader: Arc<TeamLoader>,
    resolver: Arc<dyn IdentityResolver>,
    signer: Arc<dyn LinkSigner>,
    config: RekeyConfig,
    join_config: JoinConfig,
    join: OpenTeamJoinCoordinator,
    reset: ResetReconciler,
    slots: DashMap<TeamId, Arc<TeamSlot>>,
    operators: DashMap<TeamId, MemberIdentity>,
    ready: DashMap<PrincipalId, Epoch>,
}

impl fmt::Debug for RekeyCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RekeyCoordinator")
            .field("config", &self.config)
            .field("teams", &self.slots.len())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl RekeyCoordinator {
    /// Creates a coordinator.
    #[builder]
    pub fn new(
        store: Arc<dyn ChainStore>,
        loader: Arc<TeamLoader>,
        resolver: Arc<dyn IdentityResolver>,
        signer: Arc<dyn LinkSigner>,
        #[builder(default)] config: RekeyConfig,
        #[builder(default)] join_config: JoinConfig,
    ) -> Self {
        Self {
            store,
            loader,
            resolver,
            signer,
            config,
            join_config,
            join: OpenTeamJoinCoordinator,
            reset: ResetReconciler,
            slots: DashMap::new(),
            operators: DashMap::new(),
            ready: DashMap::new(),
        }
    }
}

impl RekeyCoordinator {
    /// The rekey configuration.
    pub fn config(&self) -> &RekeyConfig {
        &self.config
    }

    fn validator(&self) -> &ChainValidator {
        self.loader.engine().validator()
    }

    fn slot(&self, team_id: TeamId) -> Arc<TeamSlot> {
        Arc::clone(&self.slots.entry(team_id).or_default())
    }

    /// Records the identity that signs system changes for `team_id`.
    ///
    /// Without one, the highest-ranked current admin or owner signs.
    pub fn register_operator(&self, team_id: TeamId, operator: MemberIdentity) {
        self.operators.insert(team_id, operator);
    }

    /// Records that `principal` holds key material at `epoch`.
    ///
    /// Takes effect even if the identity resolver has not caught up yet.
    pub fn mark_key_material_ready(&self, principal: PrincipalId, epoch: Epoch) {
        self.ready
            .entry(principal)
            .and_modify(|known| *known = (*known).max(epoch))
            .or_insert(epoch);
    }

    /// Queues a settings change.
    pub fn enqueue_settings(&self, team_id: TeamId, author: MemberIdentity, settings: TeamSettings) {
        self.enqueue(team_id, PendingEvent::Settings { author, settings });
    }

    /// Queues an authored change.
    pub fn enqueue_change(&self, team_id: TeamId, author: MemberIdentity, change: ChangeType) {
        self.enqueue(team_id, PendingEvent::Change { author, change });
    }

    /// Queues an access request.
    ///
    /// Returns true once the team's queued requests reach
    /// `max_pending_requests`; the caller should trigger right away.
    pub fn enqueue_access(&self, request: AccessRequest) -> bool {
        let team_id = request.team_id;
        let queued = self.enqueue(team_id, PendingEvent::Access(request));
        let flush = queued >= self.join_config.max_pending_requests;
        if flush {
            metrics::record_eager_flush();
            debug!(team_id = %team_id, queued, "Access request threshold reached");
        }
        flush
    }

    /// Returns the number of access requests now queued for the team.
    fn enqueue(&self, team_id: TeamId, event: PendingEvent) -> usize {
        let slot = self.slot(team_id);
        let mut pending = slot.pending.lock();
        pending.events.push(event);
        pending.events.iter().filter(|event| matches!(event, PendingEvent::Access(_))).count()
    }

    /// Flags a team for the next background tick even without queued events.
    pub fn mark_dirty(&self, team_id: TeamId) {
        self.slot(team_id).pending.lock().dirty = true;
    }

    /// Number of events queued for `team_id`.
    pub fn pending_len(&self, team_id: TeamId) -> usize {
        self.slots.get(&team_id).map_or(0, |slot| slot.pending.lock().events.len())
    }

    /// Teams with queued events or a dirty flag.
    pub fn pending_teams(&self) -> Vec<TeamId> {
        self.slots
            .iter()
            .filter(|slot| {
                let pending = slot.pending.lock();
                pending.dirty || !pending.events.is_empty()
            })
            .map(|slot| *slot.key())
            .collect()
    }

    /// Appends the root link of a new team.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::TeamNameTaken`] if the name or derived ID exists,
    /// or any validation, signing or store error.
    #[instrument(skip(self, settings))]
    pub async fn create_team(
        &self,
        team_id: TeamId,
        name: &str,
        owner: MemberIdentity,
        settings: TeamSettings,
    ) -> Result<AppendReceipt, TeamError> {
        let slot = self.slot(team_id);
        let _guard = slot.write_lock.lock().await;

        let change = ChangeType::CreateTeam { name: name.to_string(), settings };
        self.validator().preview(&TeamState::empty(team_id), owner, &change)?;
        let link = self.build_link(team_id, 1, ROOT_HASH, owner, change)?;
        let receipt = match self.store.append(team_id, link).await {
            Ok(receipt) => receipt,
            Err(AppendError::StaleBase { .. } | AppendError::NameTaken { .. }) => {
                return TeamNameTakenSnafu { name }.fail();
            },
            Err(err) => return Err(err.into()),
        };

        self.register_operator(team_id, owner);
        metrics::record_direct_append();
        info!(team_id = %team_id, owner = %owner, open = settings.open, "Created team");
        Ok(receipt)
    }

    /// Appends one authored change under the team's write lock.
    ///
    /// Lost races are retried like trigger cycles; every other refusal is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] of the change, or
    /// [`TeamError::ConcurrentAppendRace`] once attempts run out.
    pub async fn submit(
        &self,
        team_id: TeamId,
        author: MemberIdentity,
        change: ChangeType,
    ) -> Result<AppendReceipt, TeamError> {
        self.submit_with(team_id, author, |_| Ok(change.clone())).await
    }

    /// Like [`submit`](Self::submit), but builds the change from the state
    /// it will be appended on top of.
    ///
    /// `build` runs again after every lost race, so IDs it derives from the
    /// state stay fresh.
    ///
    /// # Errors
    ///
    /// Returns the error of `build`, the [`ValidationError`] of the change,
    /// or [`TeamError::ConcurrentAppendRace`] once attempts run out.
    #[instrument(skip(self, build))]
    pub async fn submit_with<F>(
        &self,
        team_id: TeamId,
        author: MemberIdentity,
        build: F,
    ) -> Result<AppendReceipt, TeamError>
    where
        F: Fn(&TeamState) -> Result<ChangeType, TeamError> + Send + Sync,
    {
        let slot = self.slot(team_id);
        let _guard = slot.write_lock.lock().await;

        let mut delays = self.conflict_backoff();
        let mut conflicts = 0;
        let mut force_repoll = false;
        loop {
            let state = self.loader.load(team_id, force_repoll).await?;
            let change = build(&state)?;
            self.validator().preview(&state, author, &change)?;
            let kind = change.kind();
            let link =
                self.build_link(team_id, state.last_seqno() + 1, state.last_hash(), author, change)?;
            match self.store.append(team_id, link).await {
                Ok(receipt) => {
                    metrics::record_direct_append();
                    info!(team_id = %team_id, seqno = receipt.seqno, kind, "Submitted change");
                    return Ok(receipt);
                },
                Err(AppendError::StaleBase { .. }) => {
                    conflicts += 1;
                    self.back_off(team_id, &mut delays, conflicts).await?;
                    force_repoll = true;
                },
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Runs one rekey cycle for `team_id`.
    ///
    /// Waits for any cycle already running on the team. Returns once every
    /// resulting link is appended.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::ConcurrentAppendRace`] when attempts run out,
    /// and load, signing and store errors. Unconsumed events are requeued.
    #[instrument(skip(self))]
    pub async fn trigger(&self, team_id: TeamId) -> Result<RekeyReport, TeamError> {
        let slot = self.slot(team_id);
        let _guard = slot.write_lock.lock().await;
        let start = Instant::now();

        let events = slot.take();
        let mut done = vec![false; events.len()];
        let mut report = RekeyReport::new(team_id);
        let result = self.run_cycle(team_id, &events, &mut done, &mut report).await;
        metrics::record_rekey_cycle(result.is_ok(), report.links.len(), start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                if !report.links.is_empty() || !report.rejected.is_empty() {
                    info!(
                        team_id = %team_id,
                        events = events.len(),
                        links = report.links.len(),
                        seqno = report.last_seqno(),
                        rejected = report.rejected.len(),
                        "Rekey cycle complete"
                    );
                }
                Ok(report)
            },
            Err(err) => {
                let remaining: Vec<_> = events
                    .into_iter()
                    .zip(done)
                    .filter(|(_, done)| !done)
                    .map(|(event, _)| event)
                    .collect();
                warn!(
                    team_id = %team_id,
                    requeued = remaining.len(),
                    links = report.links.len(),
                    error = %err,
                    "Rekey cycle failed"
                );
                slot.requeue(remaining);
                Err(err)
            },
        }
    }

    /// Triggers every pending team each `tick_interval` until `cancel` fires.
    pub async fn run(&self, tick_interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_ms = tick_interval.as_millis() as u64, "Rekey loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Rekey loop stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            for team_id in self.pending_teams() {
                if let Err(err) = self.trigger(team_id).await {
                    warn!(team_id = %team_id, error = %err, "Background trigger failed");
                }
            }
        }
    }

    /// Spawns [`run`](Self::run) at the configured tick interval.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let tick = self.config.tick_interval;
            self.run(tick, cancel).await;
        })
    }

    async fn run_cycle(
        &self,
        team_id: TeamId,
        events: &[PendingEvent],
        done: &mut [bool],
        report: &mut RekeyReport,
    ) -> Result<(), TeamError> {
        let mut delays = self.conflict_backoff();
        let mut conflicts = 0;
        let mut force_repoll = false;
        let mut per_link = self.config.max_changes_per_link;

        loop {
            let state = self.loader.load(team_id, force_repoll).await?;
            let plan = self.plan(team_id, &state, events, done).await?;
            let links = self.build_links(team_id, &state, &plan.items, per_link)?;

            let mut failure = None;
            for (link, range) in links {
                match self.store.append(team_id, link).await {
                    Ok(receipt) => {
                        metrics::record_batch_changes(range.len());
                        for index in plan.items[range.clone()].iter().filter_map(PlannedItem::event_index) {
                            done[index] = true;
                        }
                        report.record_link(receipt, &plan.items[range]);
                    },
                    Err(err) => {
                        failure = Some((err, range));
                        break;
                    },
                }
            }

            let Some((err, range)) = failure else {
                for (principal, outcome) in plan.refused {
                    metrics::record_join_outcome(outcome.kind());
                    report.join_outcomes.push((principal, outcome));
                }
                for rejected in plan.rejected {
                    metrics::record_rejected_event(rejected.error.code().as_u16());
                    report.rejected.push(rejected);
                }
                done.fill(true);
                return Ok(());
            };

            force_repoll = true;
            match err {
                AppendError::StaleBase { .. } => {
                    conflicts += 1;
                    self.back_off(team_id, &mut delays, conflicts).await?;
                },
                AppendError::Unavailable { message } => {
                    return StoreUnavailableSnafu { message }.fail();
                },
                refused if per_link > 1 => {
                    warn!(team_id = %team_id, error = %refused, "Coalesced link refused, appending one change per link");
                    per_link = 1;
                },
                refused => {
                    let item = &plan.items[range.start];
                    let Some(index) = item.event_index() else {
                        return Err(refused.into());
                    };
                    let error = match refused {
                        AppendError::SignatureInvalid { signer } => ValidationError::BadSignature { signer },
                        AppendError::PermissionDenied { source } => source,
                        other => ValidationError::InvalidChange { reason: other.to_string() },
                    };
                    metrics::record_rejected_event(error.code().as_u16());
                    report.rejected.push(RejectedEvent { description: events[index].to_string(), error });
                    done[index] = true;
                },
            }
        }
    }

    /// Plans every live event against `state`, in stage order.
    async fn plan(
        &self,
        team_id: TeamId,
        state: &TeamState,
        events: &[PendingEvent],
        done: &[bool],
    ) -> Result<Plan, TeamError> {
        let validator = self.validator();
        let mut work = state.clone();
        let mut plan = Plan::default();
        let live = |stage: u8| {
            events
                .iter()
                .enumerate()
                .filter(move |(index, event)| !done[*index] && event.stage() == stage)
        };

        for stage in [0, 1] {
            for (index, event) in live(stage) {
                let Some((author, change)) = event.authored() else {
                    continue;
                };
                match validator.preview(&work, author, &change) {
                    Ok(next) => {
                        work = next;
                        plan.items.push(PlannedItem {
                            signer: author,
                            change,
                            source: ItemSource::Event { index, outcome: None },
                        });
                    },
                    Err(error) => plan.reject(event.to_string(), error),
                }
            }
        }

        let mut resolved = HashMap::new();
        let principals: BTreeSet<PrincipalId> =
            work.members().keys().map(|identity| identity.principal).collect();
        let mut detections = Vec::new();
        for principal in principals {
            let current = self.resolve_principal(principal).await?;
            if let Some(current) = current
                && let Some(detection) = self.reset.detect(&work, &current)
            {
                detections.push(detection);
            }
            resolved.insert(principal, current);
        }
        let stale: BTreeSet<MemberIdentity> = detections
            .iter()
            .flat_map(|detection| detection.stale.iter().map(|(identity, _)| *identity))
            .collect();
        let operator = self.operator(team_id, &work, &stale);

        for detection in detections {
            let description = format!("reset of {}", detection.principal);
            let Some(operator) = operator else {
                plan.reject(description, no_operator());
                continue;
            };
            let changes = self.reset.plan(&work, &detection);
            match validator.preview(&work, operator, &ChangeType::batch(changes.clone())) {
                Ok(next) => {
                    debug!(
                        team_id = %team_id,
                        principal = %detection.principal,
                        epoch = detection.current.current_epoch,
                        role = %detection.preserved_role(),
                        "Reconciling reset"
                    );
                    work = next;
                    plan.items.extend(changes.into_iter().map(|change| PlannedItem {
                        signer: operator,
                        change,
                        source: ItemSource::Reset { principal: detection.principal },
                    }));
                },
                Err(error) => plan.reject(description, error),
            }
        }

        if let Some(operator) = operator {
            let invites: Vec<_> =
                InviteRegistry::new(&work).active_invites().into_iter().cloned().collect();
            for invite in invites {
                let current = match &invite.target {
                    InviteTarget::Direct(identity) => match resolved.get(&identity.principal) {
                        Some(current) => *current,
                        None => self.resolve_principal(identity.principal).await?,
                    },
                    InviteTarget::External(handle) => self.resolve_handle(handle).await?,
                };
                let Some(change) = InviteRegistry::new(&work).resolve(&invite.target, current.as_ref())
                else {
                    continue;
                };
                match validator.preview(&work, operator, &change) {
                    Ok(next) => {
                        work = next;
                        plan.items.push(PlannedItem {
                            signer: operator,
                            change,
                            source: ItemSource::Invite { invite_id: invite.id },
                        });
                    },
                    Err(error) => plan.reject(format!("completion of {}", invite.id), error),
                }
            }
        }

        for (index, event) in live(2) {
            let PendingEvent::Access(request) = event else {
                continue;
            };
            let current = match resolved.get(&request.requester) {
                Some(current) => *current,
                None => self.resolve_principal(request.requester).await?,
            };
            let Some(current) = current else {
                plan.reject(event.to_string(), ValidationError::InvalidChange {
                    reason: format!("unknown principal {}", request.requester),
                });
                continue;
            };

            let outcome = self.join.handle(&work, request, &current);
            let Some(change) = outcome.change() else {
                debug!(team_id = %team_id, requester = %request.requester, outcome = outcome.kind(), "Access request refused");
                plan.refused.push((request.requester, outcome));
                continue;
            };
            let Some(operator) = operator else {
                plan.reject(event.to_string(), no_operator());
                continue;
            };
            match validator.preview(&work, operator, &change) {
                Ok(next) => {
                    work = next;
                    plan.items.push(PlannedItem {
                        signer: operator,
                        change,
                        source: ItemSource::Event { index, outcome: Some((request.requester, outcome)) },
                    });
                },
                Err(error) => plan.reject(event.to_string(), error),
            }
        }

        Ok(plan)
    }

    /// Signs planned items into consecutive links on top of `state`.
    ///
    /// Items join the current link while the signer stays the same and the
    /// link holds fewer than `per_link` changes. Batches always get a link
    /// of their own.
    fn build_links(
        &self,
        team_id: TeamId,
        state: &TeamState,
        items: &[PlannedItem],
        per_link: usize,
    ) -> Result<Vec<(TeamLink, Range<usize>)>, TeamError> {
        let is_batch = |item: &PlannedItem| matches!(item.change, ChangeType::Batch(_));
        let mut links = Vec::new();
        let mut seqno = state.last_seqno();
        let mut prev_hash = state.last_hash();
        let mut start = 0;
        while start < items.len() {
            let signer = items[start].signer;
            let mut end = start + 1;
            if !is_batch(&items[start]) {
                while end < items.len()
                    && end - start < per_link
                    && items[end].signer == signer
                    && !is_batch(&items[end])
                {
                    end += 1;
                }
            }
            let change =
                ChangeType::batch(items[start..end].iter().map(|item| item.change.clone()).collect());
            seqno += 1;
            let link = self.build_link(team_id, seqno, prev_hash, signer, change)?;
            prev_hash = link.hash();
            links.push((link, start..end));
            start = end;
        }
        Ok(links)
    }

    fn build_link(
        &self,
        team_id: TeamId,
        seqno: Seqno,
        prev_hash: Hash,
        signer: MemberIdentity,
        change: ChangeType,
    ) -> Result<TeamLink, TeamError> {
        let link = TeamLink::builder()
            .team_id(team_id)
            .seqno(seqno)
            .prev_hash(prev_hash)
            .signer(signer)
            .change(change)
            .build();
        Ok(link.sign_with(self.signer.as_ref())?)
    }

    fn conflict_backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.config.conflict_backoff)
            .with_max_delay(self.config.max_conflict_backoff)
            .with_factor(2.0)
            .with_jitter()
            .with_max_times(self.config.max_append_attempts)
            .build()
    }

    async fn back_off(
        &self,
        team_id: TeamId,
        delays: &mut impl Iterator<Item = Duration>,
        conflicts: usize,
    ) -> Result<(), TeamError> {
        metrics::record_append_conflict();
        if conflicts >= self.config.max_append_attempts {
            return ConcurrentAppendRaceSnafu { team_id, attempts: conflicts }.fail();
        }
        let delay = delays.next().unwrap_or(self.config.max_conflict_backoff);
        debug!(
            team_id = %team_id,
            attempt = conflicts,
            backoff_ms = delay.as_millis() as u64,
            "Lost append race, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Picks the identity that signs system changes.
    ///
    /// Candidates are current admins and owners not made stale by a reset.
    /// Highest role wins; the registered operator wins ties.
    fn operator(
        &self,
        team_id: TeamId,
        state: &TeamState,
        stale: &BTreeSet<MemberIdentity>,
    ) -> Option<MemberIdentity> {
        let registered = self.operators.get(&team_id).map(|entry| *entry.value());
        state
            .members()
            .iter()
            .filter(|(identity, role)| role.is_admin_or_above() && !stale.contains(*identity))
            .max_by_key(|(identity, role)| (**role, Some(**identity) == registered))
            .map(|(identity, _)| *identity)
    }

    async fn resolve_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<Option<ResolvedIdentity>, TeamError> {
        let current = self.resolver.resolve_principal(principal).await?;
        Ok(current.map(|current| self.with_readiness(current)))
    }

    async fn resolve_handle(&self, handle: &str) -> Result<Option<ResolvedIdentity>, TeamError> {
        let current = self.resolver.resolve(handle).await?;
        Ok(current.map(|current| self.with_readiness(current)))
    }

    /// Overlays readiness signals on a resolver answer.
    ///
    /// A signal is dropped once the resolver reports key material at that
    /// epoch itself, or has moved past it.
    fn with_readiness(&self, mut current: ResolvedIdentity) -> ResolvedIdentity {
        self.ready.remove_if(&current.principal, |_, epoch| {
            *epoch < current.current_epoch
                || (*epoch == current.current_epoch && current.has_key_material)
        });
        if let Some(epoch) = self.ready.get(&current.principal)
            && *epoch == current.current_epoch
        {
            current.has_key_material = true;
        }
        current
    }
}
