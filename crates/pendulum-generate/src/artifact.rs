//! Artifact naming, wrapper emission and the build step.
//!
//! Every artifact is keyed by its numeric id. For id `N` targeting class
//! `pkg/Klass` the generator is expected to leave
//!
//! - `<out>/pkg/Klass_N_Test.java`
//! - `<out>/pkg/Klass_N_Test_scaffolding.java`
//!
//! while this crate owns `<scratch>/<Prefix>_N.java` (the wrapper) and the
//! per-id logs under the scratch directory.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use pendulum_model::{CmpOp, PathCondition, SymbolicExplorationRequest, Term};
use regex::Regex;
use tracing::debug;

use crate::config::{GeneratorConfig, ToolPaths};
use crate::error::GenerationError;

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    out_dir: PathBuf,
    scratch_dir: PathBuf,
    scratch_bin_dir: PathBuf,
    tool_name: String,
    wrapper_prefix: String,
}

impl ArtifactLayout {
    pub fn new(config: &GeneratorConfig, paths: &ToolPaths) -> Self {
        Self {
            out_dir: paths.out_dir.clone(),
            scratch_dir: paths.scratch_dir.clone(),
            scratch_bin_dir: paths.scratch_bin_dir.clone(),
            tool_name: config.tool_name.clone(),
            wrapper_prefix: config.wrapper_prefix.clone(),
        }
    }

    /// `<TargetClass>_<id>_Test`, in internal form.
    pub fn test_class(target_class: &str, id: u64) -> String {
        format!("{target_class}_{id}_Test")
    }

    pub fn test_source(&self, target_class: &str, id: u64) -> PathBuf {
        self.out_dir
            .join(format!("{}.java", Self::test_class(target_class, id)))
    }

    pub fn scaffolding_source(&self, target_class: &str, id: u64) -> PathBuf {
        self.out_dir
            .join(format!("{}_scaffolding.java", Self::test_class(target_class, id)))
    }

    pub fn wrapper_class(&self, id: u64) -> String {
        format!("{}_{id}", self.wrapper_prefix)
    }

    pub fn wrapper_source(&self, id: u64) -> PathBuf {
        self.scratch_dir.join(format!("{}.java", self.wrapper_class(id)))
    }

    pub fn generator_log(&self, id: u64) -> PathBuf {
        self.scratch_dir
            .join(format!("{}-log-{id}.txt", self.tool_name))
    }

    pub fn compile_log(&self, id: u64) -> PathBuf {
        self.scratch_dir.join(format!("compile-log-{id}.txt"))
    }

    pub fn wrapper_compile_log(&self, id: u64) -> PathBuf {
        self.scratch_dir.join(format!("compile-log-wrapper-{id}.txt"))
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn scratch_bin_dir(&self) -> &Path {
        &self.scratch_bin_dir
    }

    /// Both generated sources for `id`, or `None` if either is missing.
    pub fn existing_sources(&self, target_class: &str, id: u64) -> Option<[PathBuf; 2]> {
        let test = self.test_source(target_class, id);
        let scaffolding = self.scaffolding_source(target_class, id);
        (test.is_file() && scaffolding.is_file()).then_some([scaffolding, test])
    }
}

/// Compiles sources into a class directory.
pub trait BuildStep: Send + Sync {
    /// Compile `sources` against `search_path` into `out_dir`, writing all
    /// diagnostics to `log`. `Ok(false)` means the compiler ran and failed.
    fn build(
        &self,
        sources: &[PathBuf],
        search_path: &OsStr,
        out_dir: &Path,
        log: &Path,
    ) -> Result<bool, GenerationError>;
}

/// [`BuildStep`] backed by an external `javac`.
#[derive(Debug, Clone)]
pub struct Javac {
    program: PathBuf,
}

impl Javac {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl BuildStep for Javac {
    fn build(
        &self,
        sources: &[PathBuf],
        search_path: &OsStr,
        out_dir: &Path,
        log: &Path,
    ) -> Result<bool, GenerationError> {
        let out = File::create(log).map_err(|e| GenerationError::io(log, e))?;
        let err = out.try_clone().map_err(|e| GenerationError::io(log, e))?;
        let status = Command::new(&self.program)
            .arg("-cp")
            .arg(search_path)
            .arg("-d")
            .arg(out_dir)
            .args(sources)
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err)
            .status()
            .map_err(|source| GenerationError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;
        debug!(
            stage = "generate",
            sources = sources.len(),
            success = status.success(),
            log_file = %log.display(),
            "build finished"
        );
        Ok(status.success())
    }
}

/// Checks that a generated test source declares the no-argument entry method.
#[derive(Debug, Clone)]
pub struct EntryPointProbe {
    pattern: Regex,
}

impl EntryPointProbe {
    pub fn new(entry_method: &str) -> Result<Self, GenerationError> {
        let pattern = Regex::new(&format!(
            r"\bvoid\s+{}\s*\(\s*\)",
            regex::escape(entry_method)
        ))?;
        Ok(Self { pattern })
    }

    pub fn declares_entry(&self, source: &Path) -> Result<bool, GenerationError> {
        let text = fs::read_to_string(source).map_err(|e| GenerationError::io(source, e))?;
        Ok(self.pattern.is_match(&text))
    }
}

/// Writes the per-item wrapper the generator searches against: a class
/// whose `pathCondition` predicate holds exactly on inputs that satisfy the
/// requested state's path condition.
#[derive(Debug, Clone)]
pub struct WrapperEmitter {
    layout: ArtifactLayout,
}

impl WrapperEmitter {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn emit(&self, id: u64, request: &SymbolicExplorationRequest) -> Result<PathBuf, GenerationError> {
        let path = self.layout.wrapper_source(id);
        let source = self.render(id, request);
        fs::write(&path, source).map_err(|e| GenerationError::io(&path, e))?;
        Ok(path)
    }

    /// Emit and compile the wrapper for `id`. Returns whether it built.
    pub fn emit_and_build(
        &self,
        id: u64,
        request: &SymbolicExplorationRequest,
        builder: &dyn BuildStep,
        search_path: &OsStr,
    ) -> Result<bool, GenerationError> {
        let source = self.emit(id, request)?;
        builder.build(
            &[source],
            search_path,
            self.layout.scratch_dir(),
            &self.layout.wrapper_compile_log(id),
        )
    }

    fn render(&self, id: u64, request: &SymbolicExplorationRequest) -> String {
        let pc = &request.current_state.path_condition;
        let params = symbols(pc)
            .into_iter()
            .map(|s| format!("long {s}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut out = String::new();
        let _ = writeln!(out, "// target: {}", request.target);
        let _ = writeln!(out, "// state: {}", request.current_state.identifier);
        let _ = writeln!(out, "// depth: {}", request.depth);
        let _ = writeln!(out, "public class {} {{", self.layout.wrapper_class(id));
        let _ = writeln!(out, "    public static boolean pathCondition({params}) {{");
        let _ = writeln!(out, "        return {};", java_condition(pc));
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");
        out
    }
}

fn symbols(pc: &PathCondition) -> BTreeSet<&str> {
    let mut names = BTreeSet::new();
    for clause in pc.clauses() {
        for term in [&clause.atom.lhs, &clause.atom.rhs] {
            if let Term::Symbol(s) = term {
                names.insert(s.as_str());
            }
        }
    }
    names
}

fn java_term(term: &Term) -> String {
    match term {
        Term::Symbol(s) => s.clone(),
        Term::Int(i) => format!("{i}L"),
    }
}

fn java_op(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::Ne => "!=",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
    }
}

fn java_condition(pc: &PathCondition) -> String {
    if pc.is_empty() {
        return "true".to_string();
    }
    pc.clauses()
        .iter()
        .map(|c| {
            let atom = format!(
                "{} {} {}",
                java_term(&c.atom.lhs),
                java_op(c.atom.op),
                java_term(&c.atom.rhs)
            );
            if c.holds {
                format!("({atom})")
            } else {
                format!("!({atom})")
            }
        })
        .collect::<Vec<_>>()
        .join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pendulum_model::{Clause, Comparison, MethodSignature, SymbolicState};

    fn layout(root: &Path) -> ArtifactLayout {
        let paths = ToolPaths {
            out_dir: root.join("out"),
            scratch_dir: root.join("tmp"),
            scratch_bin_dir: root.join("tmp/bin"),
            ..ToolPaths::default()
        };
        ArtifactLayout::new(&GeneratorConfig::default(), &paths)
    }

    #[test]
    fn test_naming_convention() {
        let l = layout(Path::new("/r"));
        assert_eq!(
            l.test_source("pkg/Klass", 7),
            PathBuf::from("/r/out/pkg/Klass_7_Test.java")
        );
        assert_eq!(
            l.scaffolding_source("pkg/Klass", 7),
            PathBuf::from("/r/out/pkg/Klass_7_Test_scaffolding.java")
        );
        assert_eq!(l.wrapper_source(7), PathBuf::from("/r/tmp/EvoSuiteWrapper_7.java"));
        assert_eq!(l.generator_log(7), PathBuf::from("/r/tmp/evosuite-log-7.txt"));
        assert_eq!(l.compile_log(7), PathBuf::from("/r/tmp/compile-log-7.txt"));
        assert_eq!(
            l.wrapper_compile_log(7),
            PathBuf::from("/r/tmp/compile-log-wrapper-7.txt")
        );
    }

    #[test]
    fn test_existing_sources_needs_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        fs::create_dir_all(dir.path().join("out")).unwrap();
        fs::write(l.test_source("K", 1), "class K_1_Test {}").unwrap();
        assert!(l.existing_sources("K", 1).is_none());
        fs::write(l.scaffolding_source("K", 1), "class K_1_Test_scaffolding {}").unwrap();
        assert!(l.existing_sources("K", 1).is_some());
    }

    #[test]
    fn test_entry_point_probe() {
        let dir = tempfile::tempdir().unwrap();
        let probe = EntryPointProbe::new("test0").unwrap();
        let good = dir.path().join("Good.java");
        fs::write(&good, "public class Good {\n  @Test\n  public void test0()  throws Throwable {}\n}").unwrap();
        let bad = dir.path().join("Bad.java");
        fs::write(&bad, "public class Bad {\n  public void test01() {}\n}").unwrap();
        assert!(probe.declares_entry(&good).unwrap());
        assert!(!probe.declares_entry(&bad).unwrap());
    }

    #[test]
    fn test_wrapper_renders_path_condition() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        fs::create_dir_all(l.scratch_dir()).unwrap();

        let target = MethodSignature::new("K", "(JJ)V", "m");
        let mut state = SymbolicState::entry(target.clone());
        state.path_condition = PathCondition::new()
            .with(Clause::assume(Comparison::new(Term::symbol("P1"), CmpOp::Gt, Term::Int(5))))
            .with(Clause::assume_not(Comparison::new(Term::symbol("P0"), CmpOp::Eq, Term::Int(-2))));
        let mut request = SymbolicExplorationRequest::seed(target, state.clone());
        request.current_state = state;
        request.depth = 2;

        let path = WrapperEmitter::new(l).emit(4, &request).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("public class EvoSuiteWrapper_4 {"));
        assert!(text.contains("pathCondition(long P0, long P1)"));
        assert!(text.contains("return (P1 > 5L) && !(P0 == -2L);"));
        assert!(text.contains("// depth: 2"));
    }
}
