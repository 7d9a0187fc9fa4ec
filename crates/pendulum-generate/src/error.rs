use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid search path entry: {0}")]
    SearchPath(#[from] std::env::JoinPathsError),

    #[error("Invalid emission pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Batch rejected: {0}")]
    Rejected(String),
}

impl GenerationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GenerationError::Io {
            path: path.into(),
            source,
        }
    }
}
