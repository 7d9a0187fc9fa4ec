//! Generation stage: reserve ids for a batch, split it by target and run
//! one external generator per target.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use pendulum_generate::{
    BuildStep, ExternalProcessJob, GenerationBatch, GenerationReport, GeneratorConfig, ToolPaths,
};
use pendulum_model::{ConcreteTestResult, Fingerprint, IdCounter, SymbolicExplorationRequest};
use pendulum_pipeline::{Job, JobContext, Performer, StageError, WorkQueue};
use tracing::{debug, error, info};

use crate::stats::{Counter, RunStats};

#[derive(Clone)]
pub struct GenerationPerformer {
    config: Arc<GeneratorConfig>,
    paths: Arc<ToolPaths>,
    builder: Arc<dyn BuildStep>,
    ids: Arc<IdCounter>,
    output: Arc<WorkQueue<ConcreteTestResult>>,
    stats: Arc<RunStats>,
}

impl GenerationPerformer {
    pub fn new(
        config: Arc<GeneratorConfig>,
        paths: Arc<ToolPaths>,
        builder: Arc<dyn BuildStep>,
        ids: Arc<IdCounter>,
        output: Arc<WorkQueue<ConcreteTestResult>>,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            config,
            paths,
            builder,
            ids,
            output,
            stats,
        }
    }

    /// Group `items` by target and reserve a contiguous id range per group.
    pub fn plan(&self, items: Vec<SymbolicExplorationRequest>) -> Vec<GenerationBatch> {
        let mut groups: BTreeMap<Fingerprint, Vec<SymbolicExplorationRequest>> = BTreeMap::new();
        for item in items {
            groups.entry(item.fingerprint()).or_default().push(item);
        }
        groups
            .into_iter()
            .map(|(Fingerprint(target), items)| {
                let range = self.ids.reserve(items.len() as u64);
                GenerationBatch::new(target, range.start, items)
            })
            .collect()
    }

    fn run(&self, batches: Vec<GenerationBatch>, ctx: &JobContext) {
        thread::scope(|s| {
            let handles: Vec<_> = batches
                .into_iter()
                .map(|batch| {
                    let job = ExternalProcessJob::new(
                        Arc::clone(&self.config),
                        Arc::clone(&self.paths),
                        Arc::clone(&self.builder),
                        Arc::clone(&self.output),
                        batch,
                    );
                    s.spawn(move || {
                        let result = job.run(ctx);
                        (job, result)
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok((job, Ok(report))) => self.record(&job, &report),
                    Ok((job, Err(e))) => {
                        self.stats
                            .add(Counter::GenerationFailures, job.batch().len() as u64);
                        error!(
                            stage = "generate",
                            target = %job.batch().target,
                            first_id = job.batch().first_id,
                            error = %e,
                            "generation job abandoned"
                        );
                    }
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
        });
    }

    fn record(&self, job: &ExternalProcessJob, report: &GenerationReport) {
        self.stats
            .add(Counter::TestsGenerated, report.generated.len() as u64);
        self.stats
            .add(Counter::GenerationFailures, report.failures.len() as u64);
        info!(
            stage = "generate",
            target = %job.batch().target,
            first_id = job.batch().first_id,
            generated = report.generated.len(),
            failed = report.failures.len(),
            killed = report.killed,
            "generation finished"
        );
    }
}

impl Performer<SymbolicExplorationRequest> for GenerationPerformer {
    fn make_job(&self, batch: Vec<SymbolicExplorationRequest>) -> Result<Job, StageError> {
        if !self.config.multi_target && batch.len() != 1 {
            return Err(StageError::Rejected {
                stage: "generate".to_string(),
                reason: format!(
                    "single-target mode takes exactly one request per batch, got {}",
                    batch.len()
                ),
            });
        }
        let batches = self.plan(batch);
        debug!(stage = "generate", invocations = batches.len(), "batch planned");
        let this = self.clone();
        Ok(Box::new(move |ctx: &JobContext| this.run(batches, ctx)))
    }
}
