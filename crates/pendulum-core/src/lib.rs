//! Session orchestration for the pendulum test-generation loop.
//!
//! A [`Session`] validates its [`PendulumConfig`], seeds one of the two
//! stages, runs exploration and generation against each other until the
//! termination monitor calls it done, and reports a [`SessionReport`].

pub mod config;
pub mod error;
pub mod exploration;
pub mod generation;
pub mod invocations;
pub mod logging;
pub mod seed;
pub mod session;
pub mod stats;

pub use config::{
    ExplorationConfig, PathsConfig, PendulumConfig, PipelineConfig, Target, TargetConfig,
};
pub use error::{ConfigError, SetupError};
pub use exploration::{ExplorationPerformer, ExplorationSettings, Skip};
pub use generation::GenerationPerformer;
pub use invocations::InvocationCounter;
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use seed::Seed;
pub use session::Session;
pub use stats::{Counter, RunStats, SessionReport, StatsSnapshot};
