//! The concrete side of guided replay.
//!
//! The symbolic engine only ever asks one question: at this decision, which
//! of these outcomes did the concrete run take? How the answer is obtained
//! (an interpreter, a debugger attached to a live process) is the oracle's
//! business.

use crate::engine::{ChoicePoint, InstructionInfo};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// The concrete run entered more target activations than it was allowed to follow.
    #[error("Oracle exhausted after {hits} target activation(s)")]
    Exhausted { hits: u32 },

    #[error("Concrete run diverged: {0}")]
    Diverged(String),

    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
}

pub trait DecisionOracle {
    /// Index into `choices` of the outcome the concrete run took at `at`.
    fn next_decision(
        &mut self,
        at: &InstructionInfo,
        choices: &[ChoicePoint],
    ) -> Result<usize, OracleError>;
}

impl<O: DecisionOracle + ?Sized> DecisionOracle for Box<O> {
    fn next_decision(
        &mut self,
        at: &InstructionInfo,
        choices: &[ChoicePoint],
    ) -> Result<usize, OracleError> {
        (**self).next_decision(at, choices)
    }
}
