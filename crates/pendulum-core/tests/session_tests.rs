//! Full loop runs against the in-memory program model, with shell scripts
//! standing in for the generator and the compiler.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pendulum_core::{PendulumConfig, Session, SetupError};
use pendulum_generate::ToolPaths;
use pendulum_model::{CmpOp, MethodSignature, TestCase};
use pendulum_pipeline::TerminationReason;
use pendulum_replay::program::{MethodBody, Op, Operand, Program, ProgramBackend};
use regex::Regex;

/// Emits one test per goal, calling the target once.
fn fake_generator(sleep_secs: u32) -> String {
    format!(
        r#"#!/bin/sh
out=""
goals=""
for arg in "$@"; do
  case "$arg" in
    -Dtest_dir=*) out="${{arg#-Dtest_dir=}}" ;;
    -Dpath_condition=*) goals="${{arg#-Dpath_condition=}}" ;;
  esac
done
sleep {sleep_secs}
IFS=':'
for goal in $goals; do
  wrapper="${{goal##*,}}"
  id="${{wrapper##*_}}"
  cls=$(echo "${{goal%%,*}}" | tr . /)
  md="${{goal#*,}}"
  name="${{md%%(*}}"
  base="$out/${{cls}}_${{id}}_Test"
  mkdir -p "$(dirname "$base")"
  printf 'public class T {{\n  public void test0() throws Throwable {{\n    o.%s(0);\n  }}\n}}\n' "$name" > "$base.java"
  printf 'public class T_scaffolding {{}}\n' > "${{base}}_scaffolding.java"
  echo "* EMITTED TEST CASE: ${{wrapper}}, SUCCESS"
done
"#
    )
}

const FAKE_COMPILER: &str = "#!/bin/sh\nexit 0\n";

fn script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

fn pair() -> MethodSignature {
    MethodSignature::new("demo/Pair", "(II)V", "pair")
}

/// Finds small inputs satisfying the wrapper predicate the test was
/// generated for.
fn solve(wrapper: &str, arity: usize) -> Option<Vec<i64>> {
    let clause = Regex::new(r"(!?)\(P(\d+) (==|!=|<=|>=|<|>) (-?\d+)L\)").unwrap();
    let clauses: Vec<(bool, usize, CmpOp, i64)> = clause
        .captures_iter(wrapper)
        .map(|c| {
            let op = match &c[3] {
                "==" => CmpOp::Eq,
                "!=" => CmpOp::Ne,
                "<" => CmpOp::Lt,
                "<=" => CmpOp::Le,
                ">" => CmpOp::Gt,
                _ => CmpOp::Ge,
            };
            (c[1].is_empty(), c[2].parse().unwrap(), op, c[4].parse().unwrap())
        })
        .collect();
    let values: Vec<i64> = (-3..=3).collect();
    (0..values.len().pow(arity as u32))
        .map(|mut n| {
            (0..arity)
                .map(|_| {
                    let v = values[n % values.len()];
                    n /= values.len();
                    v
                })
                .collect::<Vec<_>>()
        })
        .find(|args| {
            clauses
                .iter()
                .all(|(holds, i, op, c)| op.eval(args[*i], *c) == *holds)
        })
}

fn backend(scratch: PathBuf) -> ProgramBackend {
    let branch = |param, target| Op::If {
        lhs: Operand::Param(param),
        op: CmpOp::Gt,
        rhs: Operand::Const(0),
        target,
    };
    let body = MethodBody::new(
        pair(),
        2,
        vec![branch(0, 2), Op::Nop, branch(1, 4), Op::Return, Op::Return],
    );
    let inputs = move |test: &TestCase| -> Option<Vec<i64>> {
        if test.class_name == "demo/SeedTest" {
            return Some(vec![-1, -1]);
        }
        let id: u64 = test
            .class_name
            .strip_suffix("_Test")?
            .rsplit('_')
            .next()?
            .parse()
            .ok()?;
        let wrapper = fs::read_to_string(scratch.join(format!("EvoSuiteWrapper_{id}.java"))).ok()?;
        solve(&wrapper, 2)
    };
    ProgramBackend::new(Program::new().with_method(body), inputs)
}

struct Workspace {
    dir: tempfile::TempDir,
    config: PendulumConfig,
}

impl Workspace {
    fn new(generator_sleep: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["classes", "tools", "seeds/demo"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join("helper.jar"), b"").unwrap();
        fs::write(root.join("evosuite.jar"), b"").unwrap();
        script(&root.join("tools/java"), &fake_generator(generator_sleep));
        script(&root.join("tools/javac"), FAKE_COMPILER);

        let mut config = PendulumConfig::default();
        config.target.method = Some(pair().to_string());
        config.paths.tools = ToolPaths {
            classes: vec![root.join("classes")],
            helper_lib: root.join("helper.jar"),
            generator_jar: root.join("evosuite.jar"),
            scratch_dir: root.join("tmp"),
            scratch_bin_dir: root.join("tmp/bin"),
            out_dir: root.join("out"),
        };
        config.paths.test_dirs = vec![root.join("seeds")];
        config.paths.log_dir = root.join("logs");
        config.generator.java = root.join("tools/java");
        config.generator.javac = root.join("tools/javac");
        config.generator.poll_interval_ms = 20;
        config.exploration.max_depth = 2;
        config.pipeline.exploration_wait_ms = 20;
        config.pipeline.debounce_ms = 300;
        config.pipeline.global_budget_secs = 60;
        Self { dir, config }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn session(&self) -> Session<ProgramBackend> {
        Session::new(self.config.clone(), backend(self.root().join("tmp")))
    }
}

#[test]
fn test_loop_from_entry_state_covers_every_edge() {
    let ws = Workspace::new(0);
    let report = ws.session().run().unwrap();

    assert_eq!(report.termination, TerminationReason::Quiescent);
    assert_eq!(report.coverage_edges, 4);
    assert!(report.stats.tests_generated >= 3);
    assert!(report.stats.tests_replayed >= 3);
    assert_eq!(report.stats.generation_failures, 0);
    assert_eq!(report.stats.protocol_violations, 0);

    // The seed request took id 0.
    assert!(ws.root().join("out/demo/Pair_0_Test.java").is_file());
    assert!(ws.root().join("tmp/EvoSuiteWrapper_0.java").is_file());

    let summary = fs::read_to_string(ws.root().join("logs/summary.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&summary).unwrap();
    assert_eq!(value["coverage_edges"], 4);
}

#[test]
fn test_loop_from_initial_test() {
    let ws = Workspace::new(0);
    fs::write(
        ws.root().join("seeds/demo/SeedTest.java"),
        "public class SeedTest { public void test0() { o.pair(-1, -1); } }",
    )
    .unwrap();
    let mut config = ws.config.clone();
    config.target.initial_test = Some("demo/SeedTest:()V:test0".to_string());
    let session = Session::new(config, backend(ws.root().join("tmp")));

    let report = session.run().unwrap();
    assert_eq!(report.termination, TerminationReason::Quiescent);
    assert_eq!(report.coverage_edges, 4);
    assert!(report.stats.tests_generated >= 2);
    // Id 0 belongs to the supplied test.
    assert!(!ws.root().join("out/demo/Pair_0_Test.java").exists());
    assert!(ws.root().join("out/demo/Pair_1_Test.java").is_file());
}

#[test]
fn test_deadline_ends_a_stuck_loop() {
    let mut ws = Workspace::new(30);
    ws.config.pipeline.global_budget_secs = 1;
    ws.config.pipeline.debounce_ms = 100;

    let start = Instant::now();
    let report = ws.session().run().unwrap();
    assert_eq!(report.termination, TerminationReason::DeadlineElapsed);
    assert!(start.elapsed() < Duration::from_secs(20));
    assert_eq!(report.stats.tests_generated, 0);
    assert_eq!(report.stats.generation_failures, 1);
}

#[test]
fn test_missing_generator_jar_fails_setup() {
    let ws = Workspace::new(0);
    fs::remove_file(ws.root().join("evosuite.jar")).unwrap();
    let err = ws.session().run().unwrap_err();
    assert!(matches!(err, SetupError::MissingPath { what: "generator jar", .. }));
}

#[test]
fn test_unknown_target_fails_setup() {
    let ws = Workspace::new(0);
    let mut config = ws.config.clone();
    config.target.method = Some("demo/Pair:()V:missing".to_string());
    let err = Session::new(config, backend(ws.root().join("tmp")))
        .run()
        .unwrap_err();
    assert!(matches!(err, SetupError::UnknownTarget(_)));
}
