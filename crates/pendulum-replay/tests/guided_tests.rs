use pendulum_model::{
    CmpOp, CoverageRecord, IntervalChecker, MethodSignature, PathCondition, SatChecker,
    ScopeLimits, SymbolicState, Term, TestCase,
};
use pendulum_replay::program::{InputTable, MethodBody, Op, Operand, Program, ProgramBackend, ProgramEngine};
use pendulum_replay::{
    BranchCounting, ChoicePoint, DecisionOracle, GuidedReplay, InstructionInfo, OracleError,
    ReplayBackend, ReplayError,
};

fn m(name: &str, desc: &str) -> MethodSignature {
    MethodSignature::new("demo/Target", desc, name)
}

fn test_case(class: &str) -> TestCase {
    TestCase::new(class, "()V", "test0")
}

fn branch(lhs: Operand, op: CmpOp, rhs: Operand, target: u32) -> Op {
    Op::If {
        lhs,
        op,
        rhs,
        target,
    }
}

/// `sign(x)`: one `if`, two paths.
fn single_branch() -> (Program, MethodSignature) {
    let target = m("sign", "(I)I");
    let body = MethodBody::new(
        target.clone(),
        1,
        vec![
            branch(Operand::Param(0), CmpOp::Gt, Operand::Const(0), 3),
            Op::Nop,
            Op::Return,
            Op::Return,
        ],
    );
    (Program::new().with_method(body), target)
}

/// `classify(x)`: two nested `if`s on the same input.
fn nested_branches() -> (Program, MethodSignature) {
    let target = m("classify", "(I)I");
    let body = MethodBody::new(
        target.clone(),
        1,
        vec![
            branch(Operand::Param(0), CmpOp::Gt, Operand::Const(5), 3),
            Op::Nop,
            Op::Return,
            branch(Operand::Param(0), CmpOp::Gt, Operand::Const(3), 6),
            Op::Nop,
            Op::Return,
            Op::Return,
        ],
    );
    (Program::new().with_method(body), target)
}

fn backend(program: Program, test: &str, args: Vec<i64>) -> ProgramBackend {
    ProgramBackend::new(program, InputTable::default().with(test, args))
}

#[test]
fn test_depth_zero_releases_at_root() {
    let (program, target) = single_branch();
    let backend = backend(program, "T_1_Test", vec![4]);
    let replay = GuidedReplay::new(&backend, target, test_case("T_1_Test"), 1);

    let out = replay.run_to_depth(0).unwrap();
    assert_eq!(out.pre_branch_state.as_ref(), Some(&out.initial_state));
    assert!(!out.at_jump);
    assert!(!out.oracle_exhausted);
}

#[test]
fn test_single_branch_frontier_has_opposite_polarity() {
    let (program, target) = single_branch();
    let backend = backend(program, "T_1_Test", vec![4]);
    let replay = GuidedReplay::new(&backend, target, test_case("T_1_Test"), 1);

    let out = replay.run_to_depth(0).unwrap();
    let states: Vec<&SymbolicState> = out.frontier_states().collect();
    assert_eq!(states.len(), 2);
    for s in &states {
        assert_eq!(s.depth, 1);
        assert_eq!(s.path_condition.len(), 1);
    }
    let (a, b) = (&states[0].path_condition.clauses()[0], &states[1].path_condition.clauses()[0]);
    assert_eq!(a.atom, b.atom);
    assert_ne!(a.holds, b.holds);
    assert_ne!(states[0].identifier, states[1].identifier);

    // Both outcomes of the jump are recorded: one by the step, one on backtrack.
    assert_eq!(out.coverage.len(), 2);
    assert!(out.frontier.iter().all(|f| f.entry_edge.is_some()));
}

#[test]
fn test_negative_depth_yields_true_final_state() {
    let (program, target) = nested_branches();
    let backend = backend(program, "T_2_Test", vec![4]);
    let replay = GuidedReplay::new(&backend, target.clone(), test_case("T_2_Test"), 1);

    let out = replay.run_to_depth(-1).unwrap();
    assert_eq!(out.frontier.len(), 1);

    let (last, _) = replay.run().unwrap();
    assert_eq!(last, out.frontier[0].state);
    assert!(last.terminated);
    assert_eq!(last.depth, 1);
    // 4 > 5 fails: the concrete run takes the fall-through.
    assert_eq!(last.path_condition.to_string(), "!({P0} > 5)");
    assert!(IntervalChecker.is_satisfiable(&last.path_condition));
}

#[test]
fn test_depth_beyond_branches_is_empty_not_error() {
    let (program, target) = nested_branches();
    let backend = backend(program, "T_3_Test", vec![9]);
    let replay = GuidedReplay::new(&backend, target, test_case("T_3_Test"), 1);

    let out = replay.run_to_depth(5).unwrap();
    assert!(out.frontier.is_empty());
    assert!(out.pre_branch_state.is_none());
}

#[test]
fn test_depth_one_cuts_after_first_guided_decision() {
    let (program, target) = nested_branches();
    let backend = backend(program, "T_4_Test", vec![9]);
    let replay = GuidedReplay::new(&backend, target, test_case("T_4_Test"), 1);

    let out = replay.run_to_depth(1).unwrap();
    assert!(out.at_jump);
    assert_eq!(out.jump_pc, 0);
    let pre = out.pre_branch_state.clone().unwrap();
    assert_eq!(pre.path_condition.to_string(), "{P0} > 5");

    // Second decision: P0 > 3 given P0 > 5 has only one feasible side, so
    // it is not a decision point and nothing is harvested.
    assert!(out.frontier.is_empty());
}

#[test]
fn test_coverage_merge_is_idempotent() {
    let (program, target) = single_branch();
    let backend = backend(program, "T_5_Test", vec![-2]);
    let replay = GuidedReplay::new(&backend, target, test_case("T_5_Test"), 1);
    let cov = CoverageRecord::new();

    let first = replay.run_to_depth(-1).unwrap();
    cov.merge(first.coverage.iter().cloned());
    let snapshot = cov.snapshot();
    let second = replay.run_to_depth(-1).unwrap();
    assert_eq!(cov.merge(second.coverage.into_iter()), 0);
    assert_eq!(cov.snapshot(), snapshot);
    assert_eq!(snapshot.len(), 1);
}

/// `walk(x, flag)`: recurses into itself once when `flag == 0 && x > 0`.
fn recursive() -> (Program, MethodSignature) {
    let target = m("walk", "(II)V");
    let body = MethodBody::new(
        target.clone(),
        2,
        vec![
            branch(Operand::Param(1), CmpOp::Ne, Operand::Const(0), 4),
            branch(Operand::Param(0), CmpOp::Gt, Operand::Const(0), 3),
            Op::Return,
            Op::Invoke {
                method: target.clone(),
                args: vec![Operand::Param(0), Operand::Const(1)],
            },
            branch(Operand::Param(0), CmpOp::Gt, Operand::Const(10), 6),
            Op::Return,
            Op::Return,
        ],
    );
    (Program::new().with_method(body), target)
}

#[test]
fn test_oracle_budget_bounds_target_activations() {
    let (program, target) = recursive();
    let backend = backend(program, "T_6_Test", vec![5, 0]);

    let short = GuidedReplay::new(&backend, target.clone(), test_case("T_6_Test"), 1);
    let out = short.run_to_depth(-1).unwrap();
    assert!(out.oracle_exhausted);
    assert!(out.frontier.is_empty());
    assert!(matches!(short.run(), Err(ReplayError::NoFinalState)));

    let enough = GuidedReplay::new(&backend, target, test_case("T_6_Test"), 2);
    let (last, out) = enough.run().unwrap();
    assert!(!out.oracle_exhausted);
    assert_eq!(last.depth, 3);
    assert_eq!(
        last.path_condition.to_string(),
        "!({P1} != 0) && {P0} > 0 && !({P0} > 10)"
    );
}

/// `outer(a, b)`: calls `helper(b)`, which branches, then branches on `a`.
fn with_helper() -> (Program, MethodSignature, MethodSignature) {
    let target = m("outer", "(II)V");
    let helper = m("helper", "(I)V");
    let outer = MethodBody::new(
        target.clone(),
        2,
        vec![
            Op::Invoke {
                method: helper.clone(),
                args: vec![Operand::Param(1)],
            },
            branch(Operand::Param(0), CmpOp::Gt, Operand::Const(100), 3),
            Op::Return,
            Op::Return,
        ],
    );
    let inner = MethodBody::new(
        helper.clone(),
        1,
        vec![
            branch(Operand::Param(0), CmpOp::Lt, Operand::Const(0), 2),
            Op::Return,
            Op::Return,
        ],
    );
    (
        Program::new().with_method(outer).with_method(inner),
        target,
        helper,
    )
}

#[test]
fn test_branch_counting_policies() {
    let (program, target, helper) = with_helper();
    let backend = backend(program, "T_7_Test", vec![5, 5]);

    let all = GuidedReplay::new(&backend, target.clone(), test_case("T_7_Test"), 1)
        .with_counting(BranchCounting::AllFrames)
        .run_to_depth(0)
        .unwrap();
    assert_eq!(all.frontier.len(), 2);
    assert!(all.frontier_states().all(|s| s.method == helper));

    let own = GuidedReplay::new(&backend, target.clone(), test_case("T_7_Test"), 1)
        .with_counting(BranchCounting::TargetFrameOnly)
        .run_to_depth(0)
        .unwrap();
    assert_eq!(own.frontier.len(), 2);
    assert!(own.frontier_states().all(|s| s.method == target));
    assert!(own.frontier_states().all(|s| s.path_condition.len() == 2));
    // The uncounted helper conditional still follows the test's inputs.
    for s in own.frontier_states() {
        assert_eq!(s.path_condition.clauses()[0].to_string(), "!({P1} < 0)");
    }
}

/// Whether every clause of `pc` holds for the given parameter values.
fn satisfied_by(pc: &PathCondition, inputs: &[i64]) -> bool {
    let value = |t: &Term| match t {
        Term::Int(i) => *i,
        Term::Symbol(name) => name
            .strip_prefix('P')
            .and_then(|i| i.parse::<usize>().ok())
            .and_then(|i| inputs.get(i).copied())
            .unwrap_or_else(|| panic!("unknown symbol {name}")),
    };
    pc.clauses().iter().all(|c| {
        let (lhs, op, rhs) = c.effective();
        op.eval(value(&lhs), value(&rhs))
    })
}

#[test]
fn test_helper_conditionals_follow_test_inputs() {
    let (program, target, _) = with_helper();
    for (inputs, expected) in [
        (vec![5, 5], "!({P1} < 0) && !({P0} > 100)"),
        (vec![5, -5], "{P1} < 0 && !({P0} > 100)"),
        (vec![200, -1], "{P1} < 0 && {P0} > 100"),
    ] {
        let backend = backend(program.clone(), "T_12_Test", inputs.clone());
        for counting in [BranchCounting::AllFrames, BranchCounting::TargetFrameOnly] {
            let (last, _) = GuidedReplay::new(&backend, target.clone(), test_case("T_12_Test"), 1)
                .with_counting(counting)
                .run()
                .unwrap();
            assert_eq!(last.path_condition.to_string(), expected, "{inputs:?} {counting:?}");
            assert!(satisfied_by(&last.path_condition, &inputs));
        }
    }
}

#[test]
fn test_branch_count_depends_on_counting_policy() {
    let (program, target, _) = with_helper();
    let backend = backend(program, "T_13_Test", vec![5, 5]);

    let (_, all) = GuidedReplay::new(&backend, target.clone(), test_case("T_13_Test"), 1)
        .run()
        .unwrap();
    assert_eq!(all.branches, 2);

    let (last, own) = GuidedReplay::new(&backend, target, test_case("T_13_Test"), 1)
        .with_counting(BranchCounting::TargetFrameOnly)
        .run()
        .unwrap();
    assert_eq!(own.branches, 1);
    // Depth counts every decision, so it overstates the target's own branches.
    assert_eq!(last.depth, 2);
}

#[test]
fn test_depth_scope_limits_exploration() {
    let (program, target) = nested_branches();
    let backend = backend(program, "T_8_Test", vec![9]);
    let scope = ScopeLimits {
        depth_scope: 1,
        ..ScopeLimits::default()
    };
    // P0 > 5 taken, P0 > 3 forced: the trace never exceeds depth 1.
    let out = GuidedReplay::new(&backend, target, test_case("T_8_Test"), 1)
        .with_scope(scope)
        .run_to_depth(-1)
        .unwrap();
    assert_eq!(out.frontier.len(), 1);
}

/// Oracle that always reports the fall-through outcome.
struct AlwaysFallThrough;

impl DecisionOracle for AlwaysFallThrough {
    fn next_decision(
        &mut self,
        _at: &InstructionInfo,
        choices: &[ChoicePoint],
    ) -> Result<usize, OracleError> {
        Ok(choices.len() - 1)
    }
}

/// Oracle answering from a fixed script of outcome indices.
struct Scripted(Vec<usize>);

impl DecisionOracle for Scripted {
    fn next_decision(
        &mut self,
        _at: &InstructionInfo,
        _choices: &[ChoicePoint],
    ) -> Result<usize, OracleError> {
        if self.0.is_empty() {
            return Err(OracleError::Exhausted { hits: 1 });
        }
        Ok(self.0.remove(0))
    }
}

struct ScriptedBackend {
    inner: ProgramBackend,
    script: Vec<usize>,
}

impl ReplayBackend for ScriptedBackend {
    type Engine = ProgramEngine;
    type Oracle = Box<dyn DecisionOracle>;

    fn symbolic_engine(
        &self,
        target: &MethodSignature,
        scope: &ScopeLimits,
    ) -> Result<ProgramEngine, ReplayError> {
        self.inner.symbolic_engine(target, scope)
    }

    fn oracle(
        &self,
        _test: &TestCase,
        _target: &MethodSignature,
        _hits: u32,
    ) -> Result<Self::Oracle, ReplayError> {
        if self.script.is_empty() {
            Ok(Box::new(AlwaysFallThrough))
        } else {
            Ok(Box::new(Scripted(self.script.clone())))
        }
    }

    fn entry_state(&self, target: &MethodSignature) -> Result<SymbolicState, ReplayError> {
        self.inner.entry_state(target)
    }

    fn methods_of(&self, class_name: &str) -> Vec<MethodSignature> {
        self.inner.methods_of(class_name)
    }

    fn has_method(&self, method: &MethodSignature) -> bool {
        self.inner.has_method(method)
    }
}

#[test]
fn test_oracle_contradicting_only_feasible_outcome_is_protocol_violation() {
    let (program, target) = nested_branches();
    // Taken at P0 > 5, then fall-through at P0 > 3: impossible.
    let backend = ScriptedBackend {
        inner: backend(program, "unused", vec![0]),
        script: vec![0, 1],
    };
    let replay = GuidedReplay::new(&backend, target, test_case("T_9_Test"), 1);
    let err = replay.run_to_depth(-1).unwrap_err();
    assert!(err.is_protocol_violation(), "unexpected error: {err}");
}

#[test]
fn test_consistent_scripted_oracle_is_accepted() {
    let (program, target) = nested_branches();
    let backend = ScriptedBackend {
        inner: backend(program, "unused", vec![0]),
        script: Vec::new(),
    };
    let replay = GuidedReplay::new(&backend, target, test_case("T_10_Test"), 1);
    let (last, _) = replay.run().unwrap();
    assert_eq!(last.path_condition.to_string(), "!({P0} > 5)");
}

#[test]
fn test_missing_test_inputs_is_reported() {
    let (program, target) = single_branch();
    let backend = backend(program, "Known_Test", vec![1]);
    let replay = GuidedReplay::new(&backend, target, test_case("Unknown_Test"), 1);
    assert!(matches!(
        replay.run_to_depth(0),
        Err(ReplayError::MissingTest(_))
    ));
}

#[test]
fn test_outcome_serializes_for_reports() {
    let (program, target) = single_branch();
    let backend = backend(program, "T_11_Test", vec![1]);
    let out = GuidedReplay::new(&backend, target, test_case("T_11_Test"), 1)
        .run_to_depth(0)
        .unwrap();
    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["frontier"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["at_jump"], false);
}
