//! Path-condition clauses.
//!
//! A clause is an assumption recorded when a trace commits to one outcome of
//! a decision: a comparison between two terms together with the polarity the
//! trace assumed for it. Sibling states produced at the same decision point
//! carry the same comparison with opposite polarity.

use serde::{Deserialize, Serialize};

/// An operand of a comparison: a symbolic input or an integer constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Symbol(String),
    Int(i64),
}

impl Term {
    pub fn symbol(name: impl Into<String>) -> Self {
        Term::Symbol(name.into())
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Term::Symbol(_))
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Symbol(s) => write!(f, "{{{s}}}"),
            Term::Int(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The operator that holds exactly when `self` does not.
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    /// The operator obtained by swapping the operands (`a < b` iff `b > a`).
    pub fn mirror(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comparison {
    pub lhs: Term,
    pub op: CmpOp,
    pub rhs: Term,
}

impl Comparison {
    pub fn new(lhs: Term, op: CmpOp, rhs: Term) -> Self {
        Self { lhs, op, rhs }
    }

    /// Evaluate when both operands are constants.
    pub fn eval_constant(&self) -> Option<bool> {
        match (&self.lhs, &self.rhs) {
            (Term::Int(a), Term::Int(b)) => Some(self.op.eval(*a, *b)),
            _ => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        self.lhs.is_symbolic() || self.rhs.is_symbolic()
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.symbol(), self.rhs)
    }
}

/// One assumption on a path: `atom` if `holds`, its negation otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clause {
    pub atom: Comparison,
    pub holds: bool,
}

impl Clause {
    pub fn assume(atom: Comparison) -> Self {
        Self { atom, holds: true }
    }

    pub fn assume_not(atom: Comparison) -> Self {
        Self { atom, holds: false }
    }

    pub fn negated(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            holds: !self.holds,
        }
    }

    /// The comparison this clause asserts, with polarity folded into the operator.
    pub fn effective(&self) -> (Term, CmpOp, Term) {
        let op = if self.holds {
            self.atom.op
        } else {
            self.atom.op.negate()
        };
        (self.atom.lhs.clone(), op, self.atom.rhs.clone())
    }
}

impl std::fmt::Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.holds {
            write!(f, "{}", self.atom)
        } else {
            write!(f, "!({})", self.atom)
        }
    }
}

/// Ordered sequence of clauses collected along one trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathCondition {
    clauses: Vec<Clause>,
}

impl PathCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn with(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// True when every clause of `self` appears, in order, at the start of `other`.
    ///
    /// A frontier state whose path condition is a prefix of a test's final
    /// path condition lies on the path that test already exercises.
    pub fn is_prefix_of(&self, other: &PathCondition) -> bool {
        self.clauses.len() <= other.clauses.len()
            && self
                .clauses
                .iter()
                .zip(other.clauses.iter())
                .all(|(a, b)| a == b)
    }
}

impl FromIterator<Clause> for PathCondition {
    fn from_iter<I: IntoIterator<Item = Clause>>(iter: I) -> Self {
        Self {
            clauses: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for PathCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "true");
        }
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " && ")?;
            }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}
