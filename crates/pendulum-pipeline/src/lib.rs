//! Two-stage cyclic work pipeline.
//!
//! Each [`Stage`] drains batches from its own bounded [`WorkQueue`] and runs
//! a job per batch; jobs feed the sibling stage's queue. A
//! [`TerminationMonitor`] watches both stages from outside and decides when
//! the cycle has gone quiet or the global deadline has elapsed.

pub mod cancel;
pub mod queue;
pub mod stage;
pub mod termination;

pub use cancel::{CancelToken, HelperGuard};
pub use queue::{QueueError, WorkQueue};
pub use stage::{Job, JobContext, Performer, Stage, StageConfig, StageError, StageStats, Supervised};
pub use termination::{MonitorConfig, MonitorState, TerminationMonitor, TerminationReason};
