use pendulum_model::MethodSignature;

use crate::oracle::OracleError;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The concrete run took an outcome the symbolic engine had ruled out.
    #[error("Protocol violation at {method}:{pc}: {detail}")]
    ProtocolViolation {
        method: MethodSignature,
        pc: u32,
        detail: String,
    },

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Unknown method: {0}")]
    UnknownMethod(MethodSignature),

    #[error("No concrete inputs for test {0}")]
    MissingTest(String),

    #[error("Symbolic engine error: {0}")]
    Engine(String),

    #[error("Guided run ended without reaching a final state")]
    NoFinalState,
}

impl ReplayError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, ReplayError::ProtocolViolation { .. })
    }
}
