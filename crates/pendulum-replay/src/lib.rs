//! Guided replay: a concrete test steering an independent symbolic execution.
//!
//! [`GuidedReplay`] drives any [`SymbolicEngine`] in lock-step with a
//! [`DecisionOracle`] backed by a concrete run, up to a chosen number of
//! decision points, then lets the engine branch freely one more step to
//! harvest the exploration frontier. Backends plug in through
//! [`ReplayBackend`]; [`program`] is an in-memory reference backend.

pub mod engine;
pub mod error;
pub mod guided;
pub mod oracle;
pub mod program;

pub use engine::{
    ChoicePoint, DecisionResolver, InstructionInfo, ReplayBackend, Resolution, StepOutcome,
    SymbolicEngine,
};
pub use error::ReplayError;
pub use guided::{BranchCounting, FrontierState, GuidedReplay, ReplayOutcome};
pub use oracle::{DecisionOracle, OracleError};
