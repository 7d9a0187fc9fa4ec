//! One generator invocation over a batch of requests sharing a target.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use pendulum_model::{ConcreteTestResult, MethodSignature, SymbolicExplorationRequest, TestCase};
use pendulum_pipeline::{JobContext, WorkQueue};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactLayout, BuildStep, EntryPointProbe, WrapperEmitter};
use crate::command::build_command;
use crate::config::{GeneratorConfig, ToolPaths};
use crate::error::GenerationError;
use crate::process::SupervisedProcess;
use crate::protocol::EmissionScanner;
use crate::watcher::LogWatcher;

/// Requests for one target, with their ids reserved as `first_id..first_id + len`.
#[derive(Debug, Clone)]
pub struct GenerationBatch {
    pub target: MethodSignature,
    pub first_id: u64,
    pub items: Vec<SymbolicExplorationRequest>,
}

impl GenerationBatch {
    pub fn new(target: MethodSignature, first_id: u64, items: Vec<SymbolicExplorationRequest>) -> Self {
        Self {
            target,
            first_id,
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Range<u64> {
        self.first_id..self.first_id + self.items.len() as u64
    }

    pub fn item(&self, id: u64) -> Option<&SymbolicExplorationRequest> {
        let offset = id.checked_sub(self.first_id)?;
        self.items.get(usize::try_from(offset).ok()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The generator never announced the artifact.
    NotAnnounced,
    /// Announced, but the test or its scaffolding is missing.
    MissingFiles,
    BuildFailed,
    /// Built, but the entry method is not declared.
    MissingEntryPoint,
    /// The sibling queue no longer accepts work.
    QueueClosed,
    Io(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::NotAnnounced => write!(f, "not announced"),
            FailureKind::MissingFiles => write!(f, "generated files missing"),
            FailureKind::BuildFailed => write!(f, "build failed"),
            FailureKind::MissingEntryPoint => write!(f, "entry method missing"),
            FailureKind::QueueClosed => write!(f, "queue closed"),
            FailureKind::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationFailure {
    pub id: u64,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    /// Ids turned into follow-up work, in announcement order.
    pub generated: Vec<u64>,
    pub failures: Vec<GenerationFailure>,
    /// Whether the generator was killed before it exited.
    pub killed: bool,
}

/// Runs the external generator over a [`GenerationBatch`] and feeds every
/// usable artifact back to the exploration queue.
///
/// Two helper threads live for the duration of [`run`](Self::run): one
/// waits for the process, the other tails its log. Both are registered
/// with the stage, and both are joined before `run` returns.
pub struct ExternalProcessJob {
    config: Arc<GeneratorConfig>,
    paths: Arc<ToolPaths>,
    builder: Arc<dyn BuildStep>,
    output: Arc<WorkQueue<ConcreteTestResult>>,
    batch: GenerationBatch,
}

impl std::fmt::Debug for ExternalProcessJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalProcessJob")
            .field("target", &self.batch.target)
            .field("ids", &self.batch.ids())
            .finish()
    }
}

/// Per-artifact checks shared by the watcher callback.
struct Delivery<'a> {
    layout: &'a ArtifactLayout,
    probe: EntryPointProbe,
    search_path: OsString,
}

impl ExternalProcessJob {
    pub fn new(
        config: Arc<GeneratorConfig>,
        paths: Arc<ToolPaths>,
        builder: Arc<dyn BuildStep>,
        output: Arc<WorkQueue<ConcreteTestResult>>,
        batch: GenerationBatch,
    ) -> Self {
        Self {
            config,
            paths,
            builder,
            output,
            batch,
        }
    }

    pub fn batch(&self) -> &GenerationBatch {
        &self.batch
    }

    pub fn run(&self, ctx: &JobContext) -> Result<GenerationReport, GenerationError> {
        let layout = ArtifactLayout::new(&self.config, &self.paths);
        self.emit_wrappers(&layout)?;

        let argv = build_command(
            &self.config,
            &self.paths,
            &self.batch.target,
            self.batch.first_id,
            self.batch.len() as u64,
        )?;
        let log = layout.generator_log(self.batch.first_id);
        let delivery = Delivery {
            layout: &layout,
            probe: EntryPointProbe::new(&self.config.entry_method)?,
            search_path: self.paths.test_search_path()?,
        };
        let watcher = LogWatcher::new(
            &log,
            EmissionScanner::new(&self.config.wrapper_prefix)?,
            self.config.poll_interval(),
        );

        let process = SupervisedProcess::launch(&argv, &log)?;
        info!(
            stage = "generate",
            target = %self.batch.target,
            first_id = self.batch.first_id,
            items = self.batch.len(),
            pid = process.id(),
            log_file = %log.display(),
            "generator launched"
        );

        let ended = AtomicBool::new(false);
        let cancel = ctx.cancel_token();
        let (ended, cancel) = (&ended, &cancel);
        let mut report = GenerationReport::default();
        let mut seen = BTreeSet::new();

        let (exit, watched) = thread::scope(|s| {
            let exit_helper = ctx.track_helper();
            let exit = s.spawn(move || {
                let _helper = exit_helper;
                process.supervise(cancel, ended)
            });

            let watch_helper = ctx.track_helper();
            let report = &mut report;
            let seen = &mut seen;
            let delivery = &delivery;
            let watched = s.spawn(move || {
                let _helper = watch_helper;
                watcher.run(ended, cancel, |id| {
                    if !self.batch.ids().contains(&id) {
                        warn!(stage = "generate", test_id = id, "announced id outside the batch");
                        return;
                    }
                    if !seen.insert(id) {
                        return;
                    }
                    match self.deliver(id, delivery) {
                        Ok(()) => report.generated.push(id),
                        Err(kind) => report.failures.push(GenerationFailure { id, kind }),
                    }
                })
            });

            (join(exit), join(watched))
        });

        match exit {
            Ok(Some(status)) if !status.success() => {
                warn!(stage = "generate", %status, log_file = %log.display(), "generator exited abnormally");
            }
            Ok(Some(_)) => {}
            Ok(None) => report.killed = true,
            Err(e) => error!(stage = "generate", error = %e, "lost track of generator process"),
        }
        watched?;

        for id in self.batch.ids() {
            if seen.contains(&id) {
                continue;
            }
            if let Some(item) = self.batch.item(id) {
                warn!(
                    stage = "generate",
                    test_id = id,
                    wrapper = %layout.wrapper_class(id),
                    path_condition = %item.current_state.path_condition,
                    log_file = %log.display(),
                    "failed to generate a test case"
                );
            }
            report.failures.push(GenerationFailure {
                id,
                kind: FailureKind::NotAnnounced,
            });
        }
        Ok(report)
    }

    fn emit_wrappers(&self, layout: &ArtifactLayout) -> Result<(), GenerationError> {
        let emitter = WrapperEmitter::new(layout.clone());
        let search_path = self.paths.wrapper_search_path()?;
        for (id, item) in self.batch.ids().zip(&self.batch.items) {
            if !emitter.emit_and_build(id, item, self.builder.as_ref(), &search_path)? {
                warn!(
                    stage = "generate",
                    test_id = id,
                    log_file = %layout.wrapper_compile_log(id).display(),
                    "wrapper failed to compile"
                );
            }
        }
        Ok(())
    }

    /// Check, build and enqueue the artifact announced as `id`.
    fn deliver(&self, id: u64, delivery: &Delivery<'_>) -> Result<(), FailureKind> {
        let Some(item) = self.batch.item(id) else {
            return Err(FailureKind::NotAnnounced);
        };
        let class = &self.batch.target.class_name;
        let test_class = ArtifactLayout::test_class(class, id);
        let pc = &item.current_state.path_condition;

        let fail = |kind: FailureKind| {
            warn!(
                stage = "generate",
                test_id = id,
                test_class = %test_class,
                path_condition = %pc,
                reason = %kind,
                "failed to generate a test case"
            );
            kind
        };

        let sources: [PathBuf; 2] = delivery
            .layout
            .existing_sources(class, id)
            .ok_or_else(|| fail(FailureKind::MissingFiles))?;

        let built = self
            .builder
            .build(
                &sources,
                &delivery.search_path,
                delivery.layout.scratch_bin_dir(),
                &delivery.layout.compile_log(id),
            )
            .map_err(|e| fail(FailureKind::Io(e.to_string())))?;
        if !built {
            return Err(fail(FailureKind::BuildFailed));
        }

        let declares = delivery
            .probe
            .declares_entry(&delivery.layout.test_source(class, id))
            .map_err(|e| fail(FailureKind::Io(e.to_string())))?;
        if !declares {
            return Err(fail(FailureKind::MissingEntryPoint));
        }

        let result = ConcreteTestResult {
            target: self.batch.target.clone(),
            test_case: TestCase::generated(class, id, &self.config.entry_method),
            depth: item.depth + 1,
        };
        self.output
            .put(result)
            .map_err(|_| fail(FailureKind::QueueClosed))?;
        info!(
            stage = "generate",
            test_id = id,
            test_class = %test_class,
            depth = item.depth,
            path_condition = %pc,
            "generated test case"
        );
        Ok(())
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
}
