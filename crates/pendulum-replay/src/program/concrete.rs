use std::sync::Arc;

use pendulum_model::MethodSignature;

use super::{Op, Operand, Program};
use crate::engine::{ChoicePoint, InstructionInfo};
use crate::oracle::{DecisionOracle, OracleError};

/// Upper bound on concrete instructions executed between two decisions.
const MAX_STEPS_BETWEEN_DECISIONS: u64 = 1_000_000;

/// A concrete value and whether it derives from a target input.
#[derive(Debug, Clone, Copy)]
struct Value {
    value: i64,
    symbolic: bool,
}

#[derive(Debug, Clone)]
struct Frame {
    method: MethodSignature,
    pc: u32,
    locals: Vec<Value>,
}

impl Frame {
    fn read(&self, operand: Operand) -> Value {
        match operand {
            Operand::Const(c) => Value {
                value: c,
                symbolic: false,
            },
            Operand::Param(i) => self.locals.get(i).copied().unwrap_or(Value {
                value: 0,
                symbolic: false,
            }),
        }
    }
}

/// Concrete execution of the target with the test's arguments, advanced
/// lazily up to each decision the symbolic side asks about.
///
/// Every conditional that depends on target inputs is reported, whichever
/// frame it sits in; everything else runs straight through. Only activations
/// of the target count against the `hits` budget.
#[derive(Debug)]
pub struct ConcreteRun {
    program: Arc<Program>,
    target: MethodSignature,
    frames: Vec<Frame>,
    hits: u32,
    activations: u32,
}

impl ConcreteRun {
    pub fn new(program: Arc<Program>, target: MethodSignature, args: Vec<i64>, hits: u32) -> Self {
        let locals = args
            .into_iter()
            .map(|value| Value {
                value,
                symbolic: true,
            })
            .collect();
        Self {
            frames: vec![Frame {
                method: target.clone(),
                pc: 0,
                locals,
            }],
            program,
            target,
            hits,
            activations: 1,
        }
    }

    pub fn activations(&self) -> u32 {
        self.activations
    }

    fn exhausted(&self) -> bool {
        self.activations > self.hits
    }

    fn op_at(&self, frame: &Frame) -> Result<Op, OracleError> {
        self.program
            .method(&frame.method)
            .map(|b| b.op(frame.pc).clone())
            .ok_or_else(|| OracleError::Unavailable(format!("no code for {}", frame.method)))
    }
}

impl DecisionOracle for ConcreteRun {
    fn next_decision(
        &mut self,
        at: &InstructionInfo,
        choices: &[ChoicePoint],
    ) -> Result<usize, OracleError> {
        let mut budget = MAX_STEPS_BETWEEN_DECISIONS;
        loop {
            if self.exhausted() {
                return Err(OracleError::Exhausted { hits: self.hits });
            }
            let top = self
                .frames
                .last()
                .cloned()
                .ok_or_else(|| OracleError::Diverged("concrete run already returned".to_string()))?;
            budget = budget.checked_sub(1).ok_or_else(|| {
                OracleError::Diverged("no decision reached within the step bound".to_string())
            })?;

            match self.op_at(&top)? {
                Op::If {
                    lhs,
                    op,
                    rhs,
                    target,
                } => {
                    let (l, r) = (top.read(lhs), top.read(rhs));
                    let next = if op.eval(l.value, r.value) {
                        target
                    } else {
                        top.pc + 1
                    };
                    if let Some(frame) = self.frames.last_mut() {
                        frame.pc = next;
                    }
                    if !(l.symbolic || r.symbolic) {
                        continue;
                    }
                    if at.method != top.method || at.pc != top.pc {
                        return Err(OracleError::Diverged(format!(
                            "symbolic side at {}:{}, concrete side at {}:{}",
                            at.method, at.pc, top.method, top.pc
                        )));
                    }
                    return choices
                        .iter()
                        .position(|c| c.target_pc == next)
                        .ok_or_else(|| {
                            OracleError::Diverged(format!(
                                "concrete run continued at pc {next}, not among the offered outcomes"
                            ))
                        });
                }
                Op::Goto(target) => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.pc = target;
                    }
                }
                Op::Invoke { method, args } => {
                    if self.program.method(&method).is_some() {
                        if method == self.target {
                            self.activations += 1;
                        }
                        let locals = args.iter().map(|&a| top.read(a)).collect();
                        self.frames.push(Frame {
                            method,
                            pc: 0,
                            locals,
                        });
                    } else if let Some(frame) = self.frames.last_mut() {
                        frame.pc += 1;
                    }
                }
                Op::Return => {
                    self.frames.pop();
                    if let Some(frame) = self.frames.last_mut() {
                        frame.pc += 1;
                    }
                }
                Op::Nop | Op::New(_) => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.pc += 1;
                    }
                }
            }
        }
    }
}
