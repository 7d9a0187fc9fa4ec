//! Work items exchanged between the exploration and generation stages.

use serde::{Deserialize, Serialize};

use crate::signature::{MethodSignature, TestCase};
use crate::state::SymbolicState;

/// Groups requests that can share one generator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub MethodSignature);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Ask the generator for a concrete test reaching `current_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicExplorationRequest {
    /// Method under test.
    pub target: MethodSignature,
    pub initial_state: SymbolicState,
    /// State whose path condition the generated test must satisfy.
    pub current_state: SymbolicState,
    pub final_state: SymbolicState,
    /// Whether `current_state` was cut at a branch frontier.
    pub is_frontier: bool,
    /// Depth at which the state was cut, -1 for seed requests.
    pub depth: i32,
}

/// A generated (or user-supplied) test, ready to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteTestResult {
    pub target: MethodSignature,
    pub test_case: TestCase,
    pub depth: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkItem {
    Exploration(SymbolicExplorationRequest),
    Concrete(ConcreteTestResult),
}

impl WorkItem {
    pub fn target(&self) -> &MethodSignature {
        match self {
            WorkItem::Exploration(r) => &r.target,
            WorkItem::Concrete(r) => &r.target,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(self.target().clone())
    }

    pub fn depth(&self) -> i32 {
        match self {
            WorkItem::Exploration(r) => r.depth,
            WorkItem::Concrete(r) => r.depth,
        }
    }
}

impl SymbolicExplorationRequest {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(self.target.clone())
    }

    /// Seed request for `target`, starting at the method entry.
    pub fn seed(target: MethodSignature, entry: SymbolicState) -> Self {
        Self {
            target,
            initial_state: entry.clone(),
            current_state: entry.clone(),
            final_state: entry,
            is_frontier: false,
            depth: -1,
        }
    }
}

impl From<SymbolicExplorationRequest> for WorkItem {
    fn from(r: SymbolicExplorationRequest) -> Self {
        WorkItem::Exploration(r)
    }
}

impl From<ConcreteTestResult> for WorkItem {
    fn from(r: ConcreteTestResult) -> Self {
        WorkItem::Concrete(r)
    }
}
