//! Symbolic engine surface used by guided replay.

use pendulum_model::{Clause, MethodSignature, ScopeLimits, SymbolicState, TestCase};

use crate::error::ReplayError;
use crate::oracle::DecisionOracle;

/// The instruction about to execute (or just executed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionInfo {
    pub method: MethodSignature,
    pub pc: u32,
    /// Conditional or unconditional jump.
    pub is_jump: bool,
}

/// One possible outcome of a symbolic conditional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoicePoint {
    /// Assumption added to the path condition if this outcome is followed.
    pub clause: Option<Clause>,
    /// Where control continues.
    pub target_pc: u32,
    /// Whether the outcome is consistent with the current path condition.
    pub feasible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Follow only this outcome.
    One(usize),
    /// Follow every feasible outcome; the first continues the trace, the rest
    /// are kept for backtracking.
    All,
}

/// Chooses which outcomes of a symbolic conditional the engine follows.
pub trait DecisionResolver {
    fn resolve(
        &mut self,
        at: &InstructionInfo,
        choices: &[ChoicePoint],
    ) -> Result<Resolution, ReplayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub executed: InstructionInfo,
    /// Program counter after the step, `None` once the call stack is empty.
    pub landed_pc: Option<u32>,
    /// Feasible outcomes before resolution (0 for non-conditional steps).
    pub feasible: usize,
    /// Outcomes actually followed.
    pub kept: usize,
}

impl StepOutcome {
    /// A genuine multi-successor decision point.
    pub fn is_decision(&self) -> bool {
        self.feasible >= 2
    }
}

pub trait SymbolicEngine {
    fn initial_state(&self) -> SymbolicState;

    fn current_state(&self) -> SymbolicState;

    /// `None` once the current trace has ended or been stopped.
    fn next_instruction(&self) -> Option<InstructionInfo>;

    /// Whether the innermost frame is an activation of `method`.
    fn in_frame_of(&self, method: &MethodSignature) -> bool;

    fn step(&mut self, resolver: &mut dyn DecisionResolver) -> Result<StepOutcome, ReplayError>;

    /// End the current trace; pending siblings remain available to `backtrack`.
    fn stop_current_trace(&mut self);

    /// Resume the most recent pending sibling. Returns false when none remain.
    fn backtrack(&mut self) -> bool;
}

/// Factory for the engines and oracles guided replay needs.
pub trait ReplayBackend: Send + Sync {
    type Engine: SymbolicEngine;
    type Oracle: DecisionOracle;

    fn symbolic_engine(
        &self,
        target: &MethodSignature,
        scope: &ScopeLimits,
    ) -> Result<Self::Engine, ReplayError>;

    /// Concrete run of `test`, allowed to follow at most `hits` activations of `target`.
    fn oracle(
        &self,
        test: &TestCase,
        target: &MethodSignature,
        hits: u32,
    ) -> Result<Self::Oracle, ReplayError>;

    fn entry_state(&self, target: &MethodSignature) -> Result<SymbolicState, ReplayError>;

    /// Methods of `class_name` that may be chosen as targets.
    fn methods_of(&self, class_name: &str) -> Vec<MethodSignature>;

    fn has_method(&self, method: &MethodSignature) -> bool;
}
