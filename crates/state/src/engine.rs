//! Deterministic membership replay.
//!
//! [`MembershipEngine::replay`] folds links in seqno order, re-validating
//! each one. Starting from a cached snapshot and folding only the suffix
//! yields exactly the state a full replay from seqno 1 would.

use std::{sync::Arc, time::Instant};

use teamchain_types::{
    SignatureVerifier, TeamError, TeamId, TeamLink, error::ReplayInvariantViolationSnafu,
};
use tracing::{debug, warn};

use crate::{
    metrics::{self, ReplayMode},
    team_state::TeamState,
    validator::ChainValidator,
};

/// Replays team chains into [`TeamState`] snapshots.
#[derive(Debug, Clone)]
pub struct MembershipEngine {
    validator: ChainValidator,
}

impl MembershipEngine {
    /// Creates an engine that verifies signatures with `verifier`.
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { validator: ChainValidator::new(verifier) }
    }

    /// The validator used for every replayed link.
    pub fn validator(&self) -> &ChainValidator {
        &self.validator
    }

    /// Folds `links` onto `cached`, or onto an empty state when no snapshot is given.
    ///
    /// `links` must start right after the snapshot's seqno.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::ReplayInvariantViolation`] if the snapshot belongs
    /// to another team or any link fails validation. Stored chains are
    /// validated on append, so this indicates a corrupt store or a bug.
    pub fn replay(
        &self,
        team_id: TeamId,
        links: &[TeamLink],
        cached: Option<&TeamState>,
    ) -> Result<TeamState, TeamError> {
        let start = Instant::now();
        let (mode, mut state) = match cached {
            Some(snapshot) => {
                if snapshot.team_id() != team_id {
                    return ReplayInvariantViolationSnafu {
                        team_id,
                        message: format!("snapshot belongs to {}", snapshot.team_id()),
                    }
                    .fail();
                }
                (ReplayMode::Incremental, snapshot.clone())
            },
            None => (ReplayMode::Full, TeamState::empty(team_id)),
        };

        for link in links {
            match self.validator.validate(link, &state) {
                Ok(validated) => state = validated.into_parts().1,
                Err(err) => {
                    warn!(
                        team_id = %team_id,
                        seqno = link.seqno,
                        mode = mode.as_str(),
                        error = %err,
                        "Replay hit an invalid link"
                    );
                    metrics::record_replay_failure(mode);
                    return ReplayInvariantViolationSnafu {
                        team_id,
                        message: format!("link {} rejected: {err}", link.seqno),
                    }
                    .fail();
                },
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_replay(mode, links.len(), elapsed);
        debug!(
            team_id = %team_id,
            mode = mode.as_str(),
            links = links.len(),
            seqno = state.last_seqno(),
            "Replayed team chain"
        );
        Ok(state)
    }
}
