//! Exploration stage: replay a concrete test and turn its frontiers into
//! generation requests.

use std::path::PathBuf;
use std::sync::Arc;

use pendulum_model::{
    ConcreteTestResult, CoverageRecord, SatChecker, ScopeLimits, SymbolicExplorationRequest,
    SymbolicState,
};
use pendulum_pipeline::{Job, JobContext, Performer, StageError, WorkQueue};
use pendulum_replay::{BranchCounting, FrontierState, GuidedReplay, ReplayBackend, ReplayError};
use tracing::{debug, error, info, warn};

use crate::invocations::InvocationCounter;
use crate::stats::{Counter, RunStats};

#[derive(Debug, Clone)]
pub struct ExplorationSettings {
    pub max_depth: u32,
    pub scope: ScopeLimits,
    pub counting: BranchCounting,
    /// Searched for test sources when counting target invocations.
    pub test_roots: Vec<PathBuf>,
}

/// Why a frontier state produced no request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Lies on the path the test already takes.
    OnTestedPath,
    /// Its entry edge is already covered.
    Covered,
    Unsatisfiable,
}

/// Builds exploration jobs, one per batch of concrete tests.
pub struct ExplorationPerformer<B: ReplayBackend> {
    backend: Arc<B>,
    settings: Arc<ExplorationSettings>,
    counter: Arc<InvocationCounter>,
    checker: Arc<dyn SatChecker>,
    coverage: Arc<CoverageRecord>,
    output: Arc<WorkQueue<SymbolicExplorationRequest>>,
    stats: Arc<RunStats>,
}

impl<B: ReplayBackend> Clone for ExplorationPerformer<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            settings: Arc::clone(&self.settings),
            counter: Arc::clone(&self.counter),
            checker: Arc::clone(&self.checker),
            coverage: Arc::clone(&self.coverage),
            output: Arc::clone(&self.output),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<B: ReplayBackend> ExplorationPerformer<B> {
    pub fn new(
        backend: Arc<B>,
        settings: ExplorationSettings,
        checker: Arc<dyn SatChecker>,
        coverage: Arc<CoverageRecord>,
        output: Arc<WorkQueue<SymbolicExplorationRequest>>,
        stats: Arc<RunStats>,
    ) -> Result<Self, regex::Error> {
        let counter = InvocationCounter::new(settings.test_roots.clone())?;
        Ok(Self {
            backend,
            settings: Arc::new(settings),
            counter: Arc::new(counter),
            checker,
            coverage,
            output,
            stats,
        })
    }

    /// Replay `item` and enqueue a request for every new frontier state.
    /// Returns how many requests were enqueued.
    pub fn explore(&self, item: &ConcreteTestResult, ctx: &JobContext) -> usize {
        let test_class = &item.test_case.class_name;
        let hits = match self.counter.count(&item.test_case, &item.target) {
            0 => {
                debug!(stage = "explore", test_class = %test_class, "no call sites found, following one activation");
                1
            }
            n => n,
        };

        let replay = GuidedReplay::new(
            self.backend.as_ref(),
            item.target.clone(),
            item.test_case.clone(),
            hits,
        )
        .with_scope(self.settings.scope.clone())
        .with_counting(self.settings.counting);

        let (final_state, outcome) = match replay.run() {
            Ok(done) => done,
            Err(e) => {
                self.replay_failed(item, &e);
                return 0;
            }
        };
        let new_edges = self.coverage.merge(outcome.coverage.iter().cloned());
        self.stats.add(Counter::TestsReplayed, 1);
        info!(
            stage = "explore",
            test_class = %test_class,
            depth = item.depth,
            final_depth = final_state.depth,
            branches = outcome.branches,
            new_edges,
            path_condition = %final_state.path_condition,
            "test replayed"
        );

        // Only decisions counted by the replay policy can be cut at.
        let bound = outcome
            .branches
            .min(self.settings.max_depth)
            .try_into()
            .unwrap_or(i32::MAX);
        let mut emitted = 0;
        for depth in item.depth.max(0)..bound {
            if ctx.is_cancelled() {
                debug!(stage = "explore", test_class = %test_class, depth, "cancelled");
                break;
            }
            let outcome = match replay.run_to_depth(depth) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.replay_failed(item, &e);
                    break;
                }
            };

            let mut at_depth = 0;
            for frontier in &outcome.frontier {
                if let Some(skip) = self.skip(frontier, &final_state) {
                    self.stats.add(Counter::RequestsFiltered, 1);
                    debug!(stage = "explore", state = %frontier.state.identifier, ?skip, "frontier state skipped");
                    continue;
                }
                let request = SymbolicExplorationRequest {
                    target: item.target.clone(),
                    initial_state: outcome.initial_state.clone(),
                    current_state: frontier.state.clone(),
                    final_state: final_state.clone(),
                    is_frontier: true,
                    depth,
                };
                if self.output.put(request).is_err() {
                    debug!(stage = "explore", "generation queue closed");
                    return emitted;
                }
                info!(
                    stage = "explore",
                    test_class = %test_class,
                    depth,
                    path_condition = %frontier.state.path_condition,
                    "path condition emitted"
                );
                self.stats.add(Counter::RequestsEmitted, 1);
                at_depth += 1;
                emitted += 1;
            }
            if at_depth == 0 {
                debug!(stage = "explore", test_class = %test_class, depth, "no new path conditions at depth");
            }
        }
        emitted
    }

    fn skip(&self, frontier: &FrontierState, final_state: &SymbolicState) -> Option<Skip> {
        let pc = &frontier.state.path_condition;
        if pc.is_prefix_of(&final_state.path_condition) {
            return Some(Skip::OnTestedPath);
        }
        if frontier
            .entry_edge
            .as_ref()
            .is_some_and(|edge| self.coverage.contains(edge))
        {
            return Some(Skip::Covered);
        }
        if !self.checker.is_satisfiable(pc) {
            return Some(Skip::Unsatisfiable);
        }
        None
    }

    fn replay_failed(&self, item: &ConcreteTestResult, e: &ReplayError) {
        self.stats.add(Counter::ReplayFailures, 1);
        if e.is_protocol_violation() {
            self.stats.add(Counter::ProtocolViolations, 1);
            error!(
                stage = "explore",
                test_class = %item.test_case.class_name,
                depth = item.depth,
                error = %e,
                "replay diverged from the symbolic execution"
            );
        } else {
            warn!(
                stage = "explore",
                test_class = %item.test_case.class_name,
                depth = item.depth,
                error = %e,
                "replay failed"
            );
        }
    }
}

impl<B: ReplayBackend + 'static> Performer<ConcreteTestResult> for ExplorationPerformer<B> {
    fn make_job(&self, batch: Vec<ConcreteTestResult>) -> Result<Job, StageError> {
        let this = self.clone();
        Ok(Box::new(move |ctx: &JobContext| {
            for item in &batch {
                if ctx.is_cancelled() {
                    break;
                }
                this.explore(item, ctx);
            }
        }))
    }
}
