//! External test generation.
//!
//! One [`ExternalProcessJob`] runs one generator process over a batch of
//! exploration requests that share a target method. The process writes its
//! combined output to a per-batch log; a watcher tails that log for
//! emission announcements and turns each verified, built artifact into a
//! follow-up [`ConcreteTestResult`](pendulum_model::ConcreteTestResult).

pub mod artifact;
pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod process;
pub mod protocol;
pub mod watcher;

pub use artifact::{ArtifactLayout, BuildStep, EntryPointProbe, Javac, WrapperEmitter};
pub use command::build_command;
pub use config::{GeneratorConfig, ToolPaths};
pub use error::GenerationError;
pub use job::{ExternalProcessJob, FailureKind, GenerationBatch, GenerationFailure, GenerationReport};
pub use process::SupervisedProcess;
pub use protocol::EmissionScanner;
pub use watcher::LogWatcher;
