//! Shared data model for the pendulum test-generation loop.
//!
//! Everything that crosses a stage boundary lives here: method signatures,
//! path conditions, symbolic state snapshots, the two work-item variants,
//! and the process-wide coverage record and id counter.

pub mod clause;
pub mod coverage;
pub mod ids;
pub mod scope;
pub mod signature;
pub mod solver;
pub mod state;
pub mod work;

pub use clause::{Clause, CmpOp, Comparison, PathCondition, Term};
pub use coverage::{CoverageEdge, CoverageRecord};
pub use ids::{IdCounter, IdRange};
pub use scope::ScopeLimits;
pub use signature::{MethodSignature, SignatureError, TestCase};
pub use solver::{IntervalChecker, SatChecker, Satisfiability};
pub use state::SymbolicState;
pub use work::{ConcreteTestResult, Fingerprint, SymbolicExplorationRequest, WorkItem};
