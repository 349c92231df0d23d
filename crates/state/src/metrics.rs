//! Replay metrics.
//!
//! Names follow `teamchain_{subsystem}_{name}_{unit}`.

use metrics::{counter, histogram};

const REPLAYS_TOTAL: &str = "teamchain_replay_total";
const REPLAY_LINKS_TOTAL: &str = "teamchain_replay_links_total";
const REPLAY_LATENCY: &str = "teamchain_replay_latency_seconds";
const REPLAY_FAILURES_TOTAL: &str = "teamchain_replay_failures_total";

/// How a replay started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// From an empty state.
    Full,
    /// From a cached snapshot.
    Incremental,
}

impl ReplayMode {
    /// Label value.
    pub const fn as_str(self) -> &'static str {
        match self {
            ReplayMode::Full => "full",
            ReplayMode::Incremental => "incremental",
        }
    }
}

/// Records a successful replay.
#[inline]
pub fn record_replay(mode: ReplayMode, links: usize, latency_secs: f64) {
    counter!(REPLAYS_TOTAL, "mode" => mode.as_str()).increment(1);
    counter!(REPLAY_LINKS_TOTAL, "mode" => mode.as_str()).increment(links as u64);
    histogram!(REPLAY_LATENCY, "mode" => mode.as_str()).record(latency_secs);
}

/// Records a replay that hit an invalid link.
#[inline]
pub fn record_replay_failure(mode: ReplayMode) {
    counter!(REPLAY_FAILURES_TOTAL, "mode" => mode.as_str()).increment(1);
}
