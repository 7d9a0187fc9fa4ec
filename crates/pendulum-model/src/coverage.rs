//! Process-wide branch coverage.
//!
//! The record is created once at startup and handed to every component that
//! reports or queries coverage. Updates are set-union, so concurrent merges
//! from several replay jobs commute and re-recording an edge is a no-op.

use std::collections::{BTreeSet, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::signature::MethodSignature;

/// A jump taken inside `method` from `from_pc` to `to_pc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoverageEdge {
    pub method: MethodSignature,
    pub from_pc: u32,
    pub to_pc: u32,
}

impl CoverageEdge {
    pub fn new(method: MethodSignature, from_pc: u32, to_pc: u32) -> Self {
        Self {
            method,
            from_pc,
            to_pc,
        }
    }
}

impl std::fmt::Display for CoverageEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.method, self.from_pc, self.to_pc)
    }
}

/// Append-only set of covered edges.
#[derive(Debug, Default)]
pub struct CoverageRecord {
    edges: Mutex<HashSet<CoverageEdge>>,
}

impl CoverageRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one edge. Returns `true` if it was not covered before.
    pub fn record(&self, edge: CoverageEdge) -> bool {
        self.edges.lock().insert(edge)
    }

    /// Union `edges` into the record, returning how many were new.
    pub fn merge<I>(&self, edges: I) -> usize
    where
        I: IntoIterator<Item = CoverageEdge>,
    {
        let mut guard = self.edges.lock();
        edges.into_iter().filter(|e| guard.insert(e.clone())).count()
    }

    pub fn contains(&self, edge: &CoverageEdge) -> bool {
        self.edges.lock().contains(edge)
    }

    pub fn len(&self) -> usize {
        self.edges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }

    /// Ordered copy of the current contents.
    pub fn snapshot(&self) -> BTreeSet<CoverageEdge> {
        self.edges.lock().iter().cloned().collect()
    }
}
