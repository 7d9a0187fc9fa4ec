//! Run statistics and the end-of-session summary.

use std::sync::atomic::{AtomicU64, Ordering};

use pendulum_pipeline::{StageStats, TerminationReason};
use serde::{Deserialize, Serialize};

/// Process-wide counters, bumped by both stages.
#[derive(Debug, Default)]
pub struct RunStats {
    tests_replayed: AtomicU64,
    replay_failures: AtomicU64,
    protocol_violations: AtomicU64,
    requests_emitted: AtomicU64,
    requests_filtered: AtomicU64,
    tests_generated: AtomicU64,
    generation_failures: AtomicU64,
}

/// One of the [`RunStats`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    TestsReplayed,
    ReplayFailures,
    ProtocolViolations,
    RequestsEmitted,
    RequestsFiltered,
    TestsGenerated,
    GenerationFailures,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: Counter, n: u64) {
        let cell = match counter {
            Counter::TestsReplayed => &self.tests_replayed,
            Counter::ReplayFailures => &self.replay_failures,
            Counter::ProtocolViolations => &self.protocol_violations,
            Counter::RequestsEmitted => &self.requests_emitted,
            Counter::RequestsFiltered => &self.requests_filtered,
            Counter::TestsGenerated => &self.tests_generated,
            Counter::GenerationFailures => &self.generation_failures,
        };
        cell.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            tests_replayed: get(&self.tests_replayed),
            replay_failures: get(&self.replay_failures),
            protocol_violations: get(&self.protocol_violations),
            requests_emitted: get(&self.requests_emitted),
            requests_filtered: get(&self.requests_filtered),
            tests_generated: get(&self.tests_generated),
            generation_failures: get(&self.generation_failures),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Concrete tests replayed to completion.
    pub tests_replayed: u64,
    /// Replays that failed, protocol violations included.
    pub replay_failures: u64,
    pub protocol_violations: u64,
    /// Exploration requests handed to generation.
    pub requests_emitted: u64,
    /// Frontier states dropped as explored, covered or unsatisfiable.
    pub requests_filtered: u64,
    pub tests_generated: u64,
    pub generation_failures: u64,
}

/// What a finished session reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub target: String,
    pub termination: TerminationReason,
    pub elapsed_secs: f64,
    /// Distinct coverage edges observed.
    pub coverage_edges: usize,
    pub stats: StatsSnapshot,
    pub exploration: StageStats,
    pub generation: StageStats,
}

impl SessionReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
