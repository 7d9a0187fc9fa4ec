//! Wiring of the two-stage loop.
//!
//! ```text
//!            ConcreteTestResult                SymbolicExplorationRequest
//!   ┌──────────── tests ◄──────────┐   ┌──────────► requests ───────────┐
//!   ▼                              │   │                                ▼
//! explore ─── GuidedReplay ────────┼───┘          generate ─── ExternalProcessJob
//!                                  └──────────────────────────────────────┘
//! ```
//!
//! Exactly one stage is seeded. The termination monitor watches both and
//! ends the session when they are idle together or the budget runs out.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use pendulum_generate::{BuildStep, Javac};
use pendulum_model::{
    ConcreteTestResult, CoverageRecord, IdCounter, IntervalChecker, SymbolicExplorationRequest,
};
use pendulum_pipeline::{
    Performer, Stage, StageConfig, Supervised, TerminationMonitor, WorkQueue,
};
use pendulum_replay::ReplayBackend;
use tracing::{error, info};

use crate::config::{PendulumConfig, Target};
use crate::error::{ConfigError, SetupError};
use crate::exploration::{ExplorationPerformer, ExplorationSettings};
use crate::generation::GenerationPerformer;
use crate::seed::Seed;
use crate::stats::{RunStats, SessionReport};

pub struct Session<B: ReplayBackend + 'static> {
    config: PendulumConfig,
    backend: Arc<B>,
}

impl<B: ReplayBackend + 'static> Session<B> {
    pub fn new(config: PendulumConfig, backend: B) -> Self {
        Self {
            config,
            backend: Arc::new(backend),
        }
    }

    pub fn config(&self) -> &PendulumConfig {
        &self.config
    }

    /// Validate configuration and filesystem, create working directories and
    /// plan the seed. Nothing is started.
    pub fn prepare(&self) -> Result<(Target, Seed), SetupError> {
        self.config.validate()?;
        let target = self.config.target.resolve()?;
        let initial_test = self.config.target.initial_test()?;

        let tools = &self.config.paths.tools;
        for entry in &tools.classes {
            require(entry, "search path entry")?;
        }
        require(&tools.helper_lib, "helper library")?;
        require(&tools.generator_jar, "generator jar")?;
        for dir in [
            &tools.scratch_dir,
            &tools.scratch_bin_dir,
            &tools.out_dir,
            &self.config.paths.log_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| SetupError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        let seed = Seed::plan(self.backend.as_ref(), &target, initial_test)?;
        Ok((target, seed))
    }

    /// Run the loop to completion. Only setup failures are errors; anything
    /// that goes wrong inside a job is logged and counted.
    pub fn run(self) -> Result<SessionReport, SetupError> {
        let (target, seed) = self.prepare()?;
        let started = Instant::now();
        let cfg = &self.config;

        let coverage = Arc::new(CoverageRecord::new());
        let ids = Arc::new(IdCounter::starting_at(seed.first_free_id()));
        let stats = Arc::new(RunStats::new());
        let tests: Arc<WorkQueue<ConcreteTestResult>> =
            Arc::new(WorkQueue::bounded(cfg.pipeline.queue_capacity));
        let requests: Arc<WorkQueue<SymbolicExplorationRequest>> =
            Arc::new(WorkQueue::bounded(cfg.pipeline.queue_capacity));

        let explorer = ExplorationPerformer::new(
            Arc::clone(&self.backend),
            ExplorationSettings {
                max_depth: cfg.exploration.max_depth,
                scope: cfg.exploration.scope.clone(),
                counting: cfg.exploration.branch_counting,
                test_roots: cfg.paths.test_source_roots(),
            },
            Arc::new(IntervalChecker::new()),
            Arc::clone(&coverage),
            Arc::clone(&requests),
            Arc::clone(&stats),
        )
        .map_err(|e| SetupError::Config(ConfigError::Invalid(e.to_string())))?;
        let builder: Arc<dyn BuildStep> = Arc::new(Javac::new(&cfg.generator.javac));
        let generator = GenerationPerformer::new(
            Arc::new(cfg.generator.clone()),
            Arc::new(cfg.paths.tools.clone()),
            builder,
            Arc::clone(&ids),
            Arc::clone(&tests),
            Arc::clone(&stats),
        );

        let explore_stage = Arc::new(Stage::new(
            StageConfig {
                name: "explore".to_string(),
                workers: cfg.pipeline.exploration_workers,
                batch_size: 1,
                batch_wait: cfg.pipeline.exploration_wait(),
            },
            Arc::clone(&tests),
            Arc::new(explorer) as Arc<dyn Performer<ConcreteTestResult>>,
        ));
        let generate_stage = Arc::new(Stage::new(
            StageConfig {
                name: "generate".to_string(),
                workers: cfg.pipeline.generation_workers,
                batch_size: cfg.generator.batch_size(),
                batch_wait: cfg.generator.batch_wait(),
            },
            Arc::clone(&requests),
            Arc::new(generator) as Arc<dyn Performer<SymbolicExplorationRequest>>,
        ));

        match seed {
            Seed::Exploration(items) => explore_stage.seed(items)?,
            Seed::Generation(items) => generate_stage.seed(items)?,
        };

        info!(stage = "main", %target, "starting");
        let stop_all = || {
            explore_stage.stop();
            generate_stage.stop();
        };
        if let Err(e) = explore_stage.start().and_then(|_| generate_stage.start()) {
            stop_all();
            return Err(e.into());
        }

        let monitor = TerminationMonitor::new(
            vec![
                Arc::clone(&explore_stage) as Arc<dyn Supervised>,
                Arc::clone(&generate_stage) as Arc<dyn Supervised>,
            ],
            cfg.pipeline.monitor(),
        );
        if let Err(e) = monitor.start() {
            stop_all();
            return Err(SetupError::Monitor(e));
        }
        let termination = monitor.wait_termination();
        stop_all();

        let report = SessionReport {
            target: target.to_string(),
            termination,
            elapsed_secs: started.elapsed().as_secs_f64(),
            coverage_edges: coverage.len(),
            stats: stats.snapshot(),
            exploration: explore_stage.stats(),
            generation: generate_stage.stats(),
        };
        info!(
            stage = "main",
            %termination,
            elapsed_secs = report.elapsed_secs,
            coverage_edges = report.coverage_edges,
            tests_generated = report.stats.tests_generated,
            "ending"
        );
        let summary = cfg.paths.summary_file();
        if let Err(e) = write_summary(&summary, &report) {
            error!(stage = "main", path = %summary.display(), error = %e, "failed to write run summary");
        }
        Ok(report)
    }
}

fn require(path: &Path, what: &'static str) -> Result<(), SetupError> {
    if path.exists() {
        Ok(())
    } else {
        error!(stage = "main", path = %path.display(), "missing {what}");
        Err(SetupError::MissingPath {
            what,
            path: path.to_path_buf(),
        })
    }
}

fn write_summary(path: &Path, report: &SessionReport) -> std::io::Result<()> {
    std::fs::write(path, report.to_json()?)
}
