//! Lock-step replay of a concrete test against a symbolic execution.
//!
//! A run to depth `D` proceeds as follows:
//!
//! - at the root, `D == 0` releases guidance straight away and the initial
//!   state becomes the pre-branch state;
//! - while guidance holds every symbolic conditional, in whatever frame, is
//!   resolved by the oracle; once guidance is released every feasible
//!   outcome of a counted decision is followed, and uncounted conditionals
//!   keep following the concrete run for as long as it still matches the
//!   trace (first feasible outcome afterwards);
//! - each decision point (two or more feasible outcomes) bumps the branch
//!   counter; reaching `D` releases guidance and snapshots the pre-branch
//!   state, reaching `D + 1` records the current state and every sibling
//!   reached by backtracking as the frontier, cutting each trace right away;
//! - with `D < 0` guidance never ends and the final state is the only
//!   frontier entry.

use std::collections::BTreeSet;

use pendulum_model::{CoverageEdge, MethodSignature, ScopeLimits, SymbolicState, TestCase};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::engine::{
    ChoicePoint, DecisionResolver, InstructionInfo, ReplayBackend, Resolution, SymbolicEngine,
};
use crate::error::ReplayError;
use crate::oracle::{DecisionOracle, OracleError};

/// Which decision points count towards the replay depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchCounting {
    /// Every decision point, including those in initializers and helpers.
    #[default]
    AllFrames,
    /// Only decision points inside an activation of the target method.
    TargetFrameOnly,
}

/// One state harvested at the frontier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierState {
    pub state: SymbolicState,
    /// Jump edge that led into this state, when the cut instruction was a jump.
    pub entry_edge: Option<CoverageEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub initial_state: SymbolicState,
    /// State at which guidance was released, if that point was reached.
    pub pre_branch_state: Option<SymbolicState>,
    /// Whether guidance was released by a jump instruction.
    pub at_jump: bool,
    /// PC of that jump; meaningful only when `at_jump`.
    pub jump_pc: u32,
    pub coverage: BTreeSet<CoverageEdge>,
    pub frontier: Vec<FrontierState>,
    /// Guidance ended because the oracle ran out of target activations.
    pub oracle_exhausted: bool,
    /// Decision points passed that count under the branch-counting policy.
    pub branches: u32,
    pub steps: u64,
}

impl ReplayOutcome {
    pub fn frontier_states(&self) -> impl Iterator<Item = &SymbolicState> {
        self.frontier.iter().map(|f| &f.state)
    }
}

/// Guided replay of one concrete test against one target method.
pub struct GuidedReplay<'b, B: ReplayBackend> {
    backend: &'b B,
    target: MethodSignature,
    test: TestCase,
    hits: u32,
    scope: ScopeLimits,
    counting: BranchCounting,
}

impl<'b, B: ReplayBackend> GuidedReplay<'b, B> {
    pub fn new(backend: &'b B, target: MethodSignature, test: TestCase, hits: u32) -> Self {
        Self {
            backend,
            target,
            test,
            hits,
            scope: ScopeLimits::default(),
            counting: BranchCounting::default(),
        }
    }

    pub fn with_scope(mut self, scope: ScopeLimits) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_counting(mut self, counting: BranchCounting) -> Self {
        self.counting = counting;
        self
    }

    /// Replay to completion and return the final state.
    pub fn run(&self) -> Result<(SymbolicState, ReplayOutcome), ReplayError> {
        let outcome = self.run_to_depth(-1)?;
        match outcome.frontier.first() {
            Some(last) => Ok((last.state.clone(), outcome)),
            None => Err(ReplayError::NoFinalState),
        }
    }

    /// Replay under guidance through `depth` decision points and harvest the
    /// states one decision further. A negative depth replays to completion.
    pub fn run_to_depth(&self, depth: i32) -> Result<ReplayOutcome, ReplayError> {
        let mut engine = self.backend.symbolic_engine(&self.target, &self.scope)?;
        let mut oracle = self.backend.oracle(&self.test, &self.target, self.hits)?;
        let run = Run {
            target: &self.target,
            depth,
            counting: self.counting,
        };
        let outcome = run.drive(&mut engine, &mut oracle)?;
        debug!(
            stage = "explore",
            test_class = %self.test.class_name,
            depth,
            frontier = outcome.frontier.len(),
            coverage = outcome.coverage.len(),
            exhausted = outcome.oracle_exhausted,
            "guided replay finished"
        );
        Ok(outcome)
    }
}

struct Run<'t> {
    target: &'t MethodSignature,
    depth: i32,
    counting: BranchCounting,
}

impl Run<'_> {
    fn drive<E: SymbolicEngine, O: DecisionOracle>(
        &self,
        engine: &mut E,
        oracle: &mut O,
    ) -> Result<ReplayOutcome, ReplayError> {
        let initial_state = engine.initial_state();
        let mut out = ReplayOutcome {
            initial_state: initial_state.clone(),
            pre_branch_state: None,
            at_jump: false,
            jump_pc: 0,
            coverage: BTreeSet::new(),
            frontier: Vec::new(),
            oracle_exhausted: false,
            branches: 0,
            steps: 0,
        };

        let mut guided = true;
        if self.depth == 0 {
            guided = false;
            out.pre_branch_state = Some(initial_state);
        }

        let mut branches: i64 = 0;
        // Whether the concrete run still sits on the current trace.
        let mut in_sync = true;
        let harvest_at = i64::from(self.depth) + 1;
        // The jump just executed, for edges into states resumed by backtracking.
        let mut last_jump: Option<(MethodSignature, u32)> = None;

        loop {
            let Some(info) = engine.next_instruction() else {
                if self.depth < 0 && !out.oracle_exhausted {
                    out.frontier.push(FrontierState {
                        state: engine.current_state(),
                        entry_edge: None,
                    });
                    break;
                }
                if !engine.backtrack() {
                    break;
                }
                let sibling = engine.current_state();
                let entry_edge = last_jump
                    .as_ref()
                    .map(|(m, from)| CoverageEdge::new(m.clone(), *from, sibling.pc));
                if let Some(edge) = &entry_edge {
                    out.coverage.insert(edge.clone());
                }
                trace!(stage = "explore", state = %sibling.identifier, "frontier sibling");
                out.frontier.push(FrontierState {
                    state: sibling,
                    entry_edge,
                });
                engine.stop_current_trace();
                continue;
            };

            let counted = match self.counting {
                BranchCounting::AllFrames => true,
                BranchCounting::TargetFrameOnly => engine.in_frame_of(self.target),
            };
            let policy = if guided {
                Policy::Oracle
            } else if counted {
                Policy::Branch
            } else {
                Policy::Follow
            };
            let mut resolver = Resolver {
                policy,
                in_sync: &mut in_sync,
                oracle: &mut *oracle,
            };
            let step = match engine.step(&mut resolver) {
                Ok(step) => step,
                Err(ReplayError::Oracle(OracleError::Exhausted { hits })) => {
                    debug!(stage = "explore", hits, "oracle exhausted, ending guided run");
                    out.oracle_exhausted = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            out.steps += 1;

            let mut entry_edge = None;
            last_jump = info.is_jump.then(|| (info.method.clone(), info.pc));
            if info.is_jump {
                if let Some(to) = step.landed_pc {
                    let edge = CoverageEdge::new(info.method.clone(), info.pc, to);
                    out.coverage.insert(edge.clone());
                    entry_edge = Some(edge);
                }
            }

            if !(step.is_decision() && counted) {
                continue;
            }
            branches += 1;
            out.branches = out.branches.saturating_add(1);
            if self.depth >= 0 && branches == i64::from(self.depth) {
                guided = false;
                out.pre_branch_state = Some(engine.current_state());
                out.at_jump = info.is_jump;
                out.jump_pc = info.pc;
            } else if branches == harvest_at && self.depth >= 0 {
                out.frontier.push(FrontierState {
                    state: engine.current_state(),
                    entry_edge,
                });
                engine.stop_current_trace();
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    /// Guidance holds: the oracle decides and must be obeyed.
    Oracle,
    /// Counted decision after release: follow every feasible outcome.
    Branch,
    /// Uncounted conditional after release.
    Follow,
}

struct Resolver<'o, O> {
    policy: Policy,
    in_sync: &'o mut bool,
    oracle: &'o mut O,
}

impl<O: DecisionOracle> Resolver<'_, O> {
    /// The outcome the concrete run took.
    fn concrete(
        &mut self,
        at: &InstructionInfo,
        choices: &[ChoicePoint],
    ) -> Result<Resolution, ReplayError> {
        let chosen = self.oracle.next_decision(at, choices)?;
        match choices.get(chosen) {
            Some(c) if c.feasible => Ok(Resolution::One(chosen)),
            Some(c) => Err(ReplayError::ProtocolViolation {
                method: at.method.clone(),
                pc: at.pc,
                detail: format!(
                    "concrete run continued at pc {} which the path condition rules out",
                    c.target_pc
                ),
            }),
            None => Err(ReplayError::ProtocolViolation {
                method: at.method.clone(),
                pc: at.pc,
                detail: format!("oracle chose outcome {chosen} of {}", choices.len()),
            }),
        }
    }
}

fn first_feasible(at: &InstructionInfo, choices: &[ChoicePoint]) -> Result<Resolution, ReplayError> {
    choices
        .iter()
        .position(|c| c.feasible)
        .map(Resolution::One)
        .ok_or_else(|| ReplayError::Engine(format!("no feasible outcome at {}:{}", at.method, at.pc)))
}

impl<O: DecisionOracle> DecisionResolver for Resolver<'_, O> {
    fn resolve(
        &mut self,
        at: &InstructionInfo,
        choices: &[ChoicePoint],
    ) -> Result<Resolution, ReplayError> {
        let feasible = choices.iter().filter(|c| c.feasible).count();
        match self.policy {
            Policy::Oracle => self.concrete(at, choices),
            Policy::Branch if feasible >= 2 => {
                // The oracle is not told which outcome the trace continues with.
                *self.in_sync = false;
                Ok(Resolution::All)
            }
            Policy::Branch | Policy::Follow => {
                if *self.in_sync {
                    match self.concrete(at, choices) {
                        Ok(resolution) => return Ok(resolution),
                        Err(e) => {
                            debug!(stage = "explore", method = %at.method, pc = at.pc, error = %e, "concrete run no longer followed");
                            *self.in_sync = false;
                        }
                    }
                }
                first_feasible(at, choices)
            }
        }
    }
}
