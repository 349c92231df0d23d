//! Waiting for a team chain to reach a seqno.
//!
//! Chain growth is observed by polling the store's tail with exponential
//! backoff, bounded by [`PollConfig::timeout`]. Running out of time is a
//! retryable [`TeamError::PollExceeded`], not a failure of the change.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use backon::{ExponentialBuilder, Retryable};
use teamchain_types::{Seqno, TeamError, TeamId, config::PollConfig, error::PollExceededSnafu};
use tracing::debug;

use crate::{metrics, store::ChainStore};

#[derive(Debug)]
enum Probe {
    Behind { tail: Seqno },
    Failed { source: TeamError },
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Behind { tail } => write!(f, "tail at {tail}"),
            Probe::Failed { source } => write!(f, "{source}"),
        }
    }
}

impl Probe {
    fn should_retry(&self) -> bool {
        match self {
            Probe::Behind { .. } => true,
            Probe::Failed { source } => source.is_retryable(),
        }
    }
}

/// Waits until `team_id` has a link at `target` or later.
///
/// Returns the seqno reached.
///
/// # Errors
///
/// Returns [`TeamError::PollExceeded`] with the last seqno seen when
/// `config.timeout` elapses first, or the first non-retryable store error.
pub async fn wait_for_seqno(
    store: &dyn ChainStore,
    team_id: TeamId,
    target: Seqno,
    config: &PollConfig,
) -> Result<Seqno, TeamError> {
    let start = Instant::now();
    let reached = AtomicU64::new(0);
    let backoff = ExponentialBuilder::default()
        .with_min_delay(config.initial_interval)
        .with_max_delay(config.max_interval)
        .with_factor(2.0)
        .with_max_times(usize::MAX);

    let reached_ref = &reached;
    let probe = move || async move {
        let tail = match store.latest(team_id).await {
            Ok(latest) => latest.map_or(0, |(seqno, _)| seqno),
            Err(source) => return Err(Probe::Failed { source }),
        };
        reached_ref.fetch_max(tail, Ordering::Relaxed);
        if tail >= target { Ok(tail) } else { Err(Probe::Behind { tail }) }
    };

    let polled = probe
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(Probe::should_retry)
        .notify(|probe: &Probe, delay: Duration| {
            debug!(team_id = %team_id, target, state = %probe, delay_ms = delay.as_millis() as u64, "Waiting for seqno");
        });

    let outcome = tokio::time::timeout(config.timeout, polled).await;
    let waited = start.elapsed();
    match outcome {
        Ok(Ok(seqno)) => {
            metrics::record_poll(waited.as_secs_f64(), false);
            Ok(seqno)
        },
        Ok(Err(Probe::Failed { source })) => Err(source),
        Ok(Err(Probe::Behind { .. })) | Err(_) => {
            metrics::record_poll(waited.as_secs_f64(), true);
            PollExceededSnafu { team_id, target, reached: reached.load(Ordering::Relaxed), waited }
                .fail()
        },
    }
}
