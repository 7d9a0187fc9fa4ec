use serde::{Deserialize, Serialize};

use crate::clause::PathCondition;
use crate::signature::MethodSignature;

/// Snapshot of a symbolic execution state.
///
/// Produced by a symbolic engine and owned by whoever holds it afterwards;
/// each snapshot carries its own path condition and can be explored onward
/// independently of the engine that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicState {
    /// Position in the engine's state tree (`.1.2` = second successor of the first decision).
    pub identifier: String,
    /// Method of the innermost frame (the last one executed once the stack is empty).
    pub method: MethodSignature,
    /// Program counter inside `method`.
    pub pc: u32,
    /// Number of decision points passed along this trace.
    pub depth: u32,
    pub path_condition: PathCondition,
    /// Whether no instruction remains on this trace.
    pub terminated: bool,
}

impl SymbolicState {
    /// Entry state of `method`: empty path condition, pc 0.
    pub fn entry(method: MethodSignature) -> Self {
        Self {
            identifier: ".1".to_string(),
            method,
            pc: 0,
            depth: 0,
            path_condition: PathCondition::new(),
            terminated: false,
        }
    }
}

impl std::fmt::Display for SymbolicState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state {}[{}@{}] depth {}: {}",
            self.identifier, self.method, self.pc, self.depth, self.path_condition
        )
    }
}
