//! Path-condition satisfiability.
//!
//! The exploration stage must not enqueue a request whose path condition is
//! known to be infeasible. Deciding feasibility is delegated to a
//! [`SatChecker`]; the bundled [`IntervalChecker`] handles conjunctions of
//! comparisons between one symbol and a constant, which is what the
//! reference program model produces, and answers `Unknown` for anything
//! relating two different symbols.

use std::collections::{BTreeMap, BTreeSet};

use crate::clause::{CmpOp, PathCondition, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Satisfiability {
    Sat,
    Unsat,
    Unknown,
}

pub trait SatChecker: Send + Sync {
    fn check(&self, pc: &PathCondition) -> Satisfiability;

    /// Only a definite `Unsat` rules a path condition out.
    fn is_satisfiable(&self, pc: &PathCondition) -> bool {
        self.check(pc) != Satisfiability::Unsat
    }
}

/// Per-symbol integer interval with excluded points.
#[derive(Debug, Clone)]
struct Domain {
    lo: i64,
    hi: i64,
    excluded: BTreeSet<i64>,
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            lo: i64::MIN,
            hi: i64::MAX,
            excluded: BTreeSet::new(),
        }
    }
}

impl Domain {
    /// Narrow by `sym op c`. Returns false once the domain is certainly empty.
    fn constrain(&mut self, op: CmpOp, c: i64) -> bool {
        match op {
            CmpOp::Eq => {
                self.lo = self.lo.max(c);
                self.hi = self.hi.min(c);
            }
            CmpOp::Ne => {
                self.excluded.insert(c);
            }
            CmpOp::Lt => match c.checked_sub(1) {
                Some(v) => self.hi = self.hi.min(v),
                None => return false,
            },
            CmpOp::Le => self.hi = self.hi.min(c),
            CmpOp::Gt => match c.checked_add(1) {
                Some(v) => self.lo = self.lo.max(v),
                None => return false,
            },
            CmpOp::Ge => self.lo = self.lo.max(c),
        }
        !self.is_empty()
    }

    fn is_empty(&self) -> bool {
        if self.lo > self.hi {
            return true;
        }
        let width = i128::from(self.hi) - i128::from(self.lo) + 1;
        let holes = self.excluded.range(self.lo..=self.hi).count() as i128;
        holes >= width
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalChecker;

impl IntervalChecker {
    pub fn new() -> Self {
        Self
    }
}

impl SatChecker for IntervalChecker {
    fn check(&self, pc: &PathCondition) -> Satisfiability {
        let mut domains: BTreeMap<&str, Domain> = BTreeMap::new();
        let mut undecided = false;

        for clause in pc.clauses() {
            let atom = &clause.atom;
            let op = if clause.holds { atom.op } else { atom.op.negate() };
            let feasible = match (&atom.lhs, &atom.rhs) {
                (Term::Int(a), Term::Int(b)) => op.eval(*a, *b),
                (Term::Symbol(s), Term::Int(c)) => {
                    domains.entry(s.as_str()).or_default().constrain(op, *c)
                }
                (Term::Int(c), Term::Symbol(s)) => domains
                    .entry(s.as_str())
                    .or_default()
                    .constrain(op.mirror(), *c),
                (Term::Symbol(a), Term::Symbol(b)) if a == b => op.eval(0, 0),
                (Term::Symbol(_), Term::Symbol(_)) => {
                    undecided = true;
                    true
                }
            };
            if !feasible {
                return Satisfiability::Unsat;
            }
        }

        if undecided {
            Satisfiability::Unknown
        } else {
            Satisfiability::Sat
        }
    }
}
