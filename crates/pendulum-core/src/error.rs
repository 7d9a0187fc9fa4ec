use std::path::PathBuf;

use pendulum_generate::GenerationError;
use pendulum_model::SignatureError;
use pendulum_pipeline::StageError;
use pendulum_replay::ReplayError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid signature in config: {0}")]
    Signature(#[from] SignatureError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Failures that stop a session before its pipeline starts.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Missing {what}: {path}")]
    MissingPath { what: &'static str, path: PathBuf },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Target not found: {0}")]
    UnknownTarget(String),

    #[error("Cannot build entry state: {0}")]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Failed to start termination monitor: {0}")]
    Monitor(#[source] std::io::Error),
}
