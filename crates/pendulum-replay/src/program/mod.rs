//! In-memory reference program model.
//!
//! A tiny register-free instruction set over integer parameters: enough to
//! express branches, loops, calls (including recursion into the target) and
//! allocations, so that guided replay, frontier harvesting and the scope
//! limits can be exercised without a real bytecode interpreter.

mod concrete;
mod symbolic;

pub use concrete::ConcreteRun;
pub use symbolic::ProgramEngine;

use std::collections::BTreeMap;
use std::sync::Arc;

use pendulum_model::{CmpOp, MethodSignature, ScopeLimits, SymbolicState, TestCase};

use crate::engine::ReplayBackend;
use crate::error::ReplayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Param(usize),
    Const(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Nop,
    /// Allocate one instance of the named class.
    New(String),
    Goto(u32),
    /// Jump to `target` if `lhs op rhs` holds, else fall through.
    If {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
        target: u32,
    },
    Invoke {
        method: MethodSignature,
        args: Vec<Operand>,
    },
    Return,
}

impl Op {
    pub fn is_jump(&self) -> bool {
        matches!(self, Op::Goto(_) | Op::If { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    pub signature: MethodSignature,
    pub params: usize,
    pub code: Vec<Op>,
}

impl MethodBody {
    pub fn new(signature: MethodSignature, params: usize, code: Vec<Op>) -> Self {
        Self {
            signature,
            params,
            code,
        }
    }

    /// Falling off the end of the code behaves as `Return`.
    pub fn op(&self, pc: u32) -> &Op {
        static IMPLICIT_RETURN: Op = Op::Return;
        self.code.get(pc as usize).unwrap_or(&IMPLICIT_RETURN)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    methods: BTreeMap<MethodSignature, MethodBody>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, body: MethodBody) -> Self {
        self.methods.insert(body.signature.clone(), body);
        self
    }

    pub fn method(&self, signature: &MethodSignature) -> Option<&MethodBody> {
        self.methods.get(signature)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodBody> {
        self.methods.values()
    }
}

/// Supplies the concrete arguments a test passes to the target.
pub trait InputSource: Send + Sync {
    fn inputs(&self, test: &TestCase) -> Option<Vec<i64>>;
}

impl<F> InputSource for F
where
    F: Fn(&TestCase) -> Option<Vec<i64>> + Send + Sync,
{
    fn inputs(&self, test: &TestCase) -> Option<Vec<i64>> {
        self(test)
    }
}

/// Fixed table from test class name to arguments.
#[derive(Debug, Clone, Default)]
pub struct InputTable(pub BTreeMap<String, Vec<i64>>);

impl InputTable {
    pub fn with(mut self, test_class: impl Into<String>, args: Vec<i64>) -> Self {
        self.0.insert(test_class.into(), args);
        self
    }
}

impl InputSource for InputTable {
    fn inputs(&self, test: &TestCase) -> Option<Vec<i64>> {
        self.0.get(&test.class_name).cloned()
    }
}

/// [`ReplayBackend`] over a [`Program`].
#[derive(Clone)]
pub struct ProgramBackend {
    program: Arc<Program>,
    inputs: Arc<dyn InputSource>,
}

impl std::fmt::Debug for ProgramBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramBackend")
            .field("methods", &self.program.methods.len())
            .finish()
    }
}

impl ProgramBackend {
    pub fn new(program: Program, inputs: impl InputSource + 'static) -> Self {
        Self {
            program: Arc::new(program),
            inputs: Arc::new(inputs),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    fn body(&self, target: &MethodSignature) -> Result<&MethodBody, ReplayError> {
        self.program
            .method(target)
            .ok_or_else(|| ReplayError::UnknownMethod(target.clone()))
    }
}

impl ReplayBackend for ProgramBackend {
    type Engine = ProgramEngine;
    type Oracle = ConcreteRun;

    fn symbolic_engine(
        &self,
        target: &MethodSignature,
        scope: &ScopeLimits,
    ) -> Result<ProgramEngine, ReplayError> {
        let body = self.body(target)?;
        Ok(ProgramEngine::new(Arc::clone(&self.program), body, scope.clone()))
    }

    fn oracle(
        &self,
        test: &TestCase,
        target: &MethodSignature,
        hits: u32,
    ) -> Result<ConcreteRun, ReplayError> {
        let body = self.body(target)?;
        let args = self
            .inputs
            .inputs(test)
            .ok_or_else(|| ReplayError::MissingTest(test.class_name.clone()))?;
        if args.len() != body.params {
            return Err(ReplayError::Engine(format!(
                "test {} passes {} argument(s), {} expects {}",
                test.class_name,
                args.len(),
                target,
                body.params
            )));
        }
        Ok(ConcreteRun::new(Arc::clone(&self.program), target.clone(), args, hits))
    }

    fn entry_state(&self, target: &MethodSignature) -> Result<SymbolicState, ReplayError> {
        self.body(target)?;
        Ok(SymbolicState::entry(target.clone()))
    }

    fn methods_of(&self, class_name: &str) -> Vec<MethodSignature> {
        self.program
            .methods()
            .map(|m| &m.signature)
            .filter(|s| s.class_name == class_name && !s.name.starts_with('<'))
            .cloned()
            .collect()
    }

    fn has_method(&self, method: &MethodSignature) -> bool {
        self.program.method(method).is_some()
    }
}

/// Symbol naming the `index`-th parameter of the target activation.
pub(crate) fn param_symbol(index: usize) -> String {
    format!("P{index}")
}
