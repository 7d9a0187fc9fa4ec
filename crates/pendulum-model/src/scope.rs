use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Exploration caps handed to the symbolic engine.
///
/// These only limit which requests get generated; they never stop the
/// pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeLimits {
    /// Maximum decision points per trace, 0 = unlimited.
    pub depth_scope: u32,
    /// Maximum instructions per trace, 0 = unlimited.
    pub count_scope: u32,
    /// Maximum number of instances per class name.
    pub heap_scope: BTreeMap<String, u32>,
}

impl ScopeLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn depth_exceeded(&self, depth: u32) -> bool {
        self.depth_scope > 0 && depth > self.depth_scope
    }

    pub fn count_exceeded(&self, steps: u64) -> bool {
        self.count_scope > 0 && steps > u64::from(self.count_scope)
    }
}
