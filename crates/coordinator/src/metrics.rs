//! Coordinator metrics using the `metrics` crate.
//!
//! ## Metric Naming Conventions
//!
//! All metrics follow the pattern: `teamchain_{subsystem}_{name}_{unit}`
//!
//! - Counters: `_total` suffix
//! - Histograms: `_seconds` suffix, or a plain count

use metrics::{counter, histogram};

// Rekey metrics
const REKEY_CYCLES_TOTAL: &str = "teamchain_rekey_cycles_total";
const REKEY_CYCLE_LATENCY: &str = "teamchain_rekey_cycle_latency_seconds";
const REKEY_BATCH_CHANGES: &str = "teamchain_rekey_batch_changes";
const REKEY_EAGER_FLUSHES_TOTAL: &str = "teamchain_rekey_eager_flushes_total";
const REKEY_REJECTED_TOTAL: &str = "teamchain_rekey_rejected_events_total";

// Append metrics
const LINKS_APPENDED_TOTAL: &str = "teamchain_links_appended_total";
const APPEND_CONFLICTS_TOTAL: &str = "teamchain_append_conflicts_total";

// Membership flow metrics
const JOIN_OUTCOMES_TOTAL: &str = "teamchain_join_outcomes_total";
const RESETS_DETECTED_TOTAL: &str = "teamchain_reset_detected_total";
const INVITES_RESOLVED_TOTAL: &str = "teamchain_invites_resolved_total";

// Loader metrics
const LOADER_CACHE_HITS: &str = "teamchain_loader_cache_hits_total";
const LOADER_CACHE_MISSES: &str = "teamchain_loader_cache_misses_total";

// Poll metrics
const POLL_WAIT_LATENCY: &str = "teamchain_poll_wait_seconds";
const POLL_TIMEOUTS_TOTAL: &str = "teamchain_poll_timeouts_total";

/// Records a finished rekey cycle.
#[inline]
pub fn record_rekey_cycle(success: bool, links: usize, latency_secs: f64) {
    let status = if success { "success" } else { "error" };
    counter!(REKEY_CYCLES_TOTAL, "status" => status).increment(1);
    histogram!(REKEY_CYCLE_LATENCY).record(latency_secs);
    if links > 0 {
        counter!(LINKS_APPENDED_TOTAL, "path" => "rekey").increment(links as u64);
    }
}

/// Records the number of atomic changes carried by one appended link.
#[inline]
pub fn record_batch_changes(changes: usize) {
    histogram!(REKEY_BATCH_CHANGES).record(changes as f64);
}

/// Records a trigger fired because the pending queue hit its bound.
#[inline]
pub fn record_eager_flush() {
    counter!(REKEY_EAGER_FLUSHES_TOTAL).increment(1);
}

/// Records a queued event dropped because its change was refused.
#[inline]
pub fn record_rejected_event(code: u16) {
    counter!(REKEY_REJECTED_TOTAL, "code" => code.to_string()).increment(1);
}

/// Records a link authored outside the rekey cycle.
#[inline]
pub fn record_direct_append() {
    counter!(LINKS_APPENDED_TOTAL, "path" => "direct").increment(1);
}

/// Records a lost append race.
#[inline]
pub fn record_append_conflict() {
    counter!(APPEND_CONFLICTS_TOTAL).increment(1);
}

/// Records an open-team join outcome.
#[inline]
pub fn record_join_outcome(outcome: &'static str) {
    counter!(JOIN_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}

/// Records a detected principal reset.
#[inline]
pub fn record_reset_detected() {
    counter!(RESETS_DETECTED_TOTAL).increment(1);
}

/// Records an invite converted into a membership.
#[inline]
pub fn record_invite_resolved() {
    counter!(INVITES_RESOLVED_TOTAL).increment(1);
}

/// Records a loader cache lookup.
#[inline]
pub fn record_loader_cache(hit: bool) {
    if hit {
        counter!(LOADER_CACHE_HITS).increment(1);
    } else {
        counter!(LOADER_CACHE_MISSES).increment(1);
    }
}

/// Records how long a seqno wait took and whether it timed out.
#[inline]
pub fn record_poll(latency_secs: f64, timed_out: bool) {
    histogram!(POLL_WAIT_LATENCY).record(latency_secs);
    if timed_out {
        counter!(POLL_TIMEOUTS_TOTAL).increment(1);
    }
}
