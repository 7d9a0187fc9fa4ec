//! Worker pool draining one [`WorkQueue`].
//!
//! A stage owns no knowledge of what its jobs do. Its [`Performer`] turns
//! each batch into a [`Job`]; the job may put follow-up items into whatever
//! queues the performer was built with (normally the sibling stage's input).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cancel::{CancelToken, HelperGuard};
use crate::queue::{QueueError, WorkQueue};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Stage '{0}' already started")]
    AlreadyStarted(String),

    #[error("Stage '{stage}' rejected seed: {reason}")]
    Seed { stage: String, reason: String },

    #[error("Stage '{stage}' rejected batch: {reason}")]
    Rejected { stage: String, reason: String },

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Work produced from one batch; run exactly once on a worker thread.
pub type Job = Box<dyn FnOnce(&JobContext) + Send>;

/// Builds jobs from batches.
///
/// `make_job` runs on the worker thread before the job starts, so anything
/// that must be settled per batch ahead of execution (id reservation,
/// validation) belongs here.
pub trait Performer<T>: Send + Sync {
    fn make_job(&self, batch: Vec<T>) -> Result<Job, StageError>;
}

/// What a running job can see of its stage.
#[derive(Debug, Clone)]
pub struct JobContext {
    stage: Arc<str>,
    cancel: CancelToken,
    helpers: Arc<AtomicUsize>,
}

impl JobContext {
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Register a helper thread; the stage stays busy until the guard drops.
    pub fn track_helper(&self) -> HelperGuard {
        HelperGuard::acquire(&self.helpers)
    }

    /// Context detached from any stage, for driving a job directly.
    pub fn standalone(stage: &str, cancel: CancelToken) -> Self {
        Self {
            stage: Arc::from(stage),
            cancel,
            helpers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn live_helpers(&self) -> usize {
        self.helpers.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    /// Worker threads.
    pub workers: usize,
    /// Largest batch handed to one job.
    pub batch_size: usize,
    /// How long a worker waits to fill a batch before running a partial one.
    pub batch_wait: Duration,
}

impl StageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: "stage".to_string(),
            workers: 1,
            batch_size: 1,
            batch_wait: Duration::from_millis(100),
        }
    }
}

/// Counters kept by a stage over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub jobs_run: u64,
    pub items_taken: u64,
    pub jobs_rejected: u64,
    pub jobs_panicked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    jobs_run: AtomicU64,
    items_taken: AtomicU64,
    jobs_rejected: AtomicU64,
    jobs_panicked: AtomicU64,
}

/// Anything the termination monitor can observe and cancel.
pub trait Supervised: Send + Sync {
    fn name(&self) -> &str;

    /// Input queue empty, no worker inside a job, no live helper.
    fn is_idle(&self) -> bool;

    /// Cancel in-flight jobs and stop accepting work, without joining.
    fn force_cancel(&self);
}

pub struct Stage<T> {
    config: StageConfig,
    queue: Arc<WorkQueue<T>>,
    performer: Arc<dyn Performer<T>>,
    busy: Arc<AtomicUsize>,
    helpers: Arc<AtomicUsize>,
    cancel: CancelToken,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: Mutex<bool>,
}

impl<T> std::fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .field("busy", &self.busy.load(Ordering::SeqCst))
            .field("helpers", &self.helpers.load(Ordering::SeqCst))
            .finish()
    }
}

struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: Send + 'static> Stage<T> {
    pub fn new(config: StageConfig, queue: Arc<WorkQueue<T>>, performer: Arc<dyn Performer<T>>) -> Self {
        Self {
            config,
            queue,
            performer,
            busy: Arc::new(AtomicUsize::new(0)),
            helpers: Arc::new(AtomicUsize::new(0)),
            cancel: CancelToken::new(),
            counters: Arc::new(Counters::default()),
            workers: Mutex::new(Vec::new()),
            started: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn input(&self) -> &Arc<WorkQueue<T>> {
        &self.queue
    }

    /// Pre-populate the input queue. Must happen before [`start`](Self::start).
    pub fn seed<I>(&self, items: I) -> Result<usize, StageError>
    where
        I: IntoIterator<Item = T>,
    {
        if *self.started.lock() {
            return Err(StageError::AlreadyStarted(self.config.name.clone()));
        }
        let mut seeded = 0;
        for item in items {
            self.queue.try_put(item).map_err(|e| StageError::Seed {
                stage: self.config.name.clone(),
                reason: match e {
                    QueueError::Full(_) => format!("queue capacity {} exceeded", self.queue.capacity()),
                    QueueError::Closed(_) => "queue is shut down".to_string(),
                },
            })?;
            seeded += 1;
        }
        info!(stage = %self.config.name, seeded, "stage seeded");
        Ok(seeded)
    }

    /// Launch the worker pool.
    pub fn start(&self) -> Result<(), StageError> {
        let mut started = self.started.lock();
        if *started {
            return Err(StageError::AlreadyStarted(self.config.name.clone()));
        }
        let workers = self.config.workers.max(1);
        let mut handles = self.workers.lock();
        for index in 0..workers {
            let worker = Worker {
                stage: Arc::from(self.config.name.as_str()),
                batch_size: self.config.batch_size.max(1),
                batch_wait: self.config.batch_wait,
                queue: Arc::clone(&self.queue),
                performer: Arc::clone(&self.performer),
                busy: Arc::clone(&self.busy),
                helpers: Arc::clone(&self.helpers),
                cancel: self.cancel.clone(),
                counters: Arc::clone(&self.counters),
            };
            let handle = thread::Builder::new()
                .name(format!("{}-{}", self.config.name, index))
                .spawn(move || worker.run())?;
            handles.push(handle);
        }
        *started = true;
        info!(stage = %self.config.name, workers, "stage started");
        Ok(())
    }

    /// Cancel in-flight jobs, close the input queue and join every worker.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.queue.shutdown();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!(stage = %self.config.name, "worker thread panicked");
            }
        }
        debug!(stage = %self.config.name, "stage stopped");
    }

    pub fn is_idle(&self) -> bool {
        self.busy.load(Ordering::SeqCst) == 0
            && self.helpers.load(Ordering::SeqCst) == 0
            && self.queue.is_empty()
    }

    pub fn stats(&self) -> StageStats {
        StageStats {
            jobs_run: self.counters.jobs_run.load(Ordering::SeqCst),
            items_taken: self.counters.items_taken.load(Ordering::SeqCst),
            jobs_rejected: self.counters.jobs_rejected.load(Ordering::SeqCst),
            jobs_panicked: self.counters.jobs_panicked.load(Ordering::SeqCst),
        }
    }
}

impl<T: Send + 'static> Supervised for Stage<T> {
    fn name(&self) -> &str {
        Stage::name(self)
    }

    fn is_idle(&self) -> bool {
        Stage::is_idle(self)
    }

    fn force_cancel(&self) {
        warn!(stage = %self.config.name, "force-cancelling stage");
        self.cancel.cancel();
        self.queue.shutdown();
    }
}

struct Worker<T> {
    stage: Arc<str>,
    batch_size: usize,
    batch_wait: Duration,
    queue: Arc<WorkQueue<T>>,
    performer: Arc<dyn Performer<T>>,
    busy: Arc<AtomicUsize>,
    helpers: Arc<AtomicUsize>,
    cancel: CancelToken,
    counters: Arc<Counters>,
}

impl<T: Send + 'static> Worker<T> {
    fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            // Busy from the moment an item leaves the queue, not when the batch is full.
            let mut busy = None;
            let batch = self
                .queue
                .take_batch_with(self.batch_size, self.batch_wait, || {
                    busy = Some(BusyGuard::enter(&self.busy));
                });
            if batch.is_empty() {
                if self.queue.is_closed() {
                    break;
                }
                continue;
            }

            let _busy = busy.unwrap_or_else(|| BusyGuard::enter(&self.busy));
            let items = batch.len();
            self.counters
                .items_taken
                .fetch_add(items as u64, Ordering::SeqCst);

            let job = match self.performer.make_job(batch) {
                Ok(job) => job,
                Err(e) => {
                    self.counters.jobs_rejected.fetch_add(1, Ordering::SeqCst);
                    error!(stage = %self.stage, items, error = %e, "batch rejected");
                    continue;
                }
            };

            let ctx = JobContext {
                stage: Arc::clone(&self.stage),
                cancel: self.cancel.clone(),
                helpers: Arc::clone(&self.helpers),
            };
            debug!(stage = %self.stage, items, "job starting");
            match panic::catch_unwind(AssertUnwindSafe(|| job(&ctx))) {
                Ok(()) => {
                    self.counters.jobs_run.fetch_add(1, Ordering::SeqCst);
                }
                Err(payload) => {
                    self.counters.jobs_panicked.fetch_add(1, Ordering::SeqCst);
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(stage = %self.stage, items, panic = %msg, "job panicked");
                }
            }
        }
        debug!(stage = %self.stage, "worker exiting");
    }
}
