use std::collections::BTreeMap;
use std::sync::Arc;

use pendulum_model::{
    Clause, Comparison, IntervalChecker, MethodSignature, PathCondition, SatChecker, ScopeLimits,
    SymbolicState, Term,
};

use super::{param_symbol, MethodBody, Op, Operand, Program};
use crate::engine::{
    ChoicePoint, DecisionResolver, InstructionInfo, Resolution, StepOutcome, SymbolicEngine,
};
use crate::error::ReplayError;

#[derive(Debug, Clone)]
struct Frame {
    method: MethodSignature,
    pc: u32,
    params: Vec<Term>,
}

impl Frame {
    fn term(&self, operand: Operand) -> Term {
        match operand {
            Operand::Const(c) => Term::Int(c),
            // Out-of-range parameters read as zero.
            Operand::Param(i) => self.params.get(i).cloned().unwrap_or(Term::Int(0)),
        }
    }
}

/// One trace of the symbolic execution.
#[derive(Debug, Clone)]
struct Trace {
    frames: Vec<Frame>,
    path_condition: PathCondition,
    identifier: String,
    depth: u32,
    steps: u64,
    heap: BTreeMap<String, u32>,
    stopped: bool,
    /// Position after the last frame returned.
    last: (MethodSignature, u32),
}

/// Depth-first symbolic execution of one target method of a [`Program`].
#[derive(Debug)]
pub struct ProgramEngine {
    program: Arc<Program>,
    scope: ScopeLimits,
    checker: IntervalChecker,
    initial: SymbolicState,
    current: Trace,
    /// Sibling traces awaiting backtracking, most recent last.
    pending: Vec<Trace>,
}

impl ProgramEngine {
    pub fn new(program: Arc<Program>, target: &MethodBody, scope: ScopeLimits) -> Self {
        let params = (0..target.params).map(|i| Term::Symbol(param_symbol(i))).collect();
        let current = Trace {
            frames: vec![Frame {
                method: target.signature.clone(),
                pc: 0,
                params,
            }],
            path_condition: PathCondition::new(),
            identifier: ".1".to_string(),
            depth: 0,
            steps: 0,
            heap: BTreeMap::new(),
            stopped: false,
            last: (target.signature.clone(), 0),
        };
        let initial = snapshot(&current);
        Self {
            program,
            scope,
            checker: IntervalChecker,
            initial,
            current,
            pending: Vec::new(),
        }
    }

    fn op_at(&self, frame: &Frame) -> Result<Op, ReplayError> {
        self.program
            .method(&frame.method)
            .map(|body| body.op(frame.pc).clone())
            .ok_or_else(|| ReplayError::UnknownMethod(frame.method.clone()))
    }

    fn advance(trace: &mut Trace) {
        if let Some(top) = trace.frames.last_mut() {
            top.pc += 1;
        }
    }

    fn conditional(
        &mut self,
        executed: &InstructionInfo,
        cmp: Comparison,
        target: u32,
        resolver: &mut dyn DecisionResolver,
    ) -> Result<(usize, usize), ReplayError> {
        let fallthrough = executed.pc + 1;
        if let Some(holds) = cmp.eval_constant() {
            if let Some(top) = self.current.frames.last_mut() {
                top.pc = if holds { target } else { fallthrough };
            }
            return Ok((0, 1));
        }

        let outcomes = [
            (Clause::assume(cmp.clone()), target),
            (Clause::assume_not(cmp), fallthrough),
        ];
        let choices: Vec<ChoicePoint> = outcomes
            .iter()
            .map(|(clause, pc)| ChoicePoint {
                clause: Some(clause.clone()),
                target_pc: *pc,
                feasible: self
                    .checker
                    .is_satisfiable(&self.current.path_condition.clone().with(clause.clone())),
            })
            .collect();
        let feasible = choices.iter().filter(|c| c.feasible).count();
        if feasible == 0 {
            self.current.stopped = true;
            return Ok((0, 0));
        }

        let kept: Vec<usize> = match resolver.resolve(executed, &choices)? {
            Resolution::One(i) => match choices.get(i) {
                Some(c) if c.feasible => vec![i],
                _ => {
                    return Err(ReplayError::Engine(format!(
                        "resolver picked infeasible outcome {i} at {}:{}",
                        executed.method, executed.pc
                    )))
                }
            },
            Resolution::All => (0..choices.len()).filter(|&i| choices[i].feasible).collect(),
        };

        let decision = feasible >= 2;
        let mut successors: Vec<Trace> = kept
            .iter()
            .map(|&i| {
                let mut t = self.current.clone();
                if decision {
                    t.path_condition.push(outcomes[i].0.clone());
                    t.depth += 1;
                    t.identifier = format!("{}.{}", t.identifier, i + 1);
                }
                if let Some(top) = t.frames.last_mut() {
                    top.pc = choices[i].target_pc;
                }
                t
            })
            .collect();

        let kept_count = successors.len();
        let first = successors.remove(0);
        self.current = first;
        while let Some(sibling) = successors.pop() {
            self.pending.push(sibling);
        }
        Ok((feasible, kept_count))
    }

    fn check_scope(&mut self, was_decision: bool) {
        let t = &mut self.current;
        if self.scope.count_exceeded(t.steps) || (was_decision && self.scope.depth_exceeded(t.depth)) {
            t.stopped = true;
        }
    }
}

fn snapshot(trace: &Trace) -> SymbolicState {
    let (method, pc) = match trace.frames.last() {
        Some(top) => (top.method.clone(), top.pc),
        None => trace.last.clone(),
    };
    SymbolicState {
        identifier: trace.identifier.clone(),
        method,
        pc,
        depth: trace.depth,
        path_condition: trace.path_condition.clone(),
        terminated: trace.frames.is_empty(),
    }
}

impl SymbolicEngine for ProgramEngine {
    fn initial_state(&self) -> SymbolicState {
        self.initial.clone()
    }

    fn current_state(&self) -> SymbolicState {
        snapshot(&self.current)
    }

    fn next_instruction(&self) -> Option<InstructionInfo> {
        if self.current.stopped {
            return None;
        }
        let top = self.current.frames.last()?;
        let op = self.op_at(top).ok()?;
        Some(InstructionInfo {
            method: top.method.clone(),
            pc: top.pc,
            is_jump: op.is_jump(),
        })
    }

    fn in_frame_of(&self, method: &MethodSignature) -> bool {
        self.current
            .frames
            .last()
            .is_some_and(|top| &top.method == method)
    }

    fn step(&mut self, resolver: &mut dyn DecisionResolver) -> Result<StepOutcome, ReplayError> {
        let top = match self.current.frames.last() {
            Some(top) if !self.current.stopped => top.clone(),
            _ => return Err(ReplayError::Engine("step past the end of a trace".to_string())),
        };
        let op = self.op_at(&top)?;
        let executed = InstructionInfo {
            method: top.method.clone(),
            pc: top.pc,
            is_jump: op.is_jump(),
        };

        let (feasible, kept) = match op {
            Op::Nop => {
                Self::advance(&mut self.current);
                (0, 1)
            }
            Op::New(class) => {
                let count = self.current.heap.entry(class.clone()).or_insert(0);
                *count += 1;
                if self.scope.heap_scope.get(&class).is_some_and(|&cap| *count > cap) {
                    self.current.stopped = true;
                }
                Self::advance(&mut self.current);
                (0, 1)
            }
            Op::Goto(target) => {
                if let Some(frame) = self.current.frames.last_mut() {
                    frame.pc = target;
                }
                (0, 1)
            }
            Op::If {
                lhs,
                op,
                rhs,
                target,
            } => {
                let cmp = Comparison::new(top.term(lhs), op, top.term(rhs));
                self.conditional(&executed, cmp, target, resolver)?
            }
            Op::Invoke { method, args } => {
                if self.program.method(&method).is_some() {
                    let params = args.iter().map(|&a| top.term(a)).collect();
                    self.current.frames.push(Frame {
                        method,
                        pc: 0,
                        params,
                    });
                } else {
                    Self::advance(&mut self.current);
                }
                (0, 1)
            }
            Op::Return => {
                if let Some(done) = self.current.frames.pop() {
                    self.current.last = (done.method, done.pc);
                }
                Self::advance(&mut self.current);
                (0, 1)
            }
        };

        self.current.steps += 1;
        self.check_scope(feasible >= 2);

        Ok(StepOutcome {
            executed,
            landed_pc: self.current.frames.last().map(|f| f.pc),
            feasible,
            kept,
        })
    }

    fn stop_current_trace(&mut self) {
        self.current.stopped = true;
    }

    fn backtrack(&mut self) -> bool {
        match self.pending.pop() {
            Some(next) => {
                self.current = next;
                true
            }
            None => false,
        }
    }
}
