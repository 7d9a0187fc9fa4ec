//! Static count of target call sites in a test source.
//!
//! The count bounds how many activations of the target the concrete oracle
//! may follow during a guided replay.

use std::path::{Path, PathBuf};

use pendulum_model::{MethodSignature, TestCase};
use regex::Regex;
use tracing::debug;

/// Words that can sit between a statement start and a call without making
/// it a declaration.
const CALL_KEYWORDS: &[&str] = &["return", "throw", "else", "case", "assert", "yield", "do"];

/// Comments, string literals and character literals.
const NOISE: &str = r#"(?s)/\*.*?\*/|//[^\n]*|"(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#;

#[derive(Debug, Clone)]
pub struct InvocationCounter {
    roots: Vec<PathBuf>,
    noise: Regex,
}

impl InvocationCounter {
    /// `roots` are searched in order for `<TestClass>.java`.
    pub fn new(roots: Vec<PathBuf>) -> Result<Self, regex::Error> {
        Ok(Self {
            roots,
            noise: Regex::new(NOISE)?,
        })
    }

    pub fn source_of(&self, test: &TestCase) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| source_path(root, test))
            .find(|p| p.is_file())
    }

    /// Call sites of `target` in the source of `test`; 0 when the source
    /// cannot be found or read.
    pub fn count(&self, test: &TestCase, target: &MethodSignature) -> u32 {
        let Some(path) = self.source_of(test) else {
            debug!(stage = "explore", test_class = %test.class_name, "test source not found");
            return 0;
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => self.count_in(&text, target),
            Err(e) => {
                debug!(stage = "explore", source = %path.display(), error = %e, "cannot read test source");
                0
            }
        }
    }

    pub fn count_in(&self, source: &str, target: &MethodSignature) -> u32 {
        let code = self.noise.replace_all(source, " ");
        let Ok(call) = Regex::new(&call_site_pattern(target)) else {
            return 0;
        };
        let calls = call
            .captures_iter(&code)
            .filter(|site| match site.get(1) {
                Some(word) => CALL_KEYWORDS.contains(&word.as_str()),
                None => true,
            })
            .count();
        u32::try_from(calls).unwrap_or(u32::MAX)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Constructors are invoked as `new Klass(`, everything else as `name(`.
///
/// For methods, group 1 captures a type-like word right before the name
/// (`int sign(`, `List<T> sign(`), which marks a declaration unless it is a
/// keyword such as `return`.
fn call_site_pattern(target: &MethodSignature) -> String {
    if target.name == "<init>" {
        let simple = target
            .class_name
            .rsplit(['/', '$'])
            .next()
            .unwrap_or(&target.class_name);
        format!(r"\bnew\s+(?:[\w$]+\.)*{}\s*\(", regex::escape(simple))
    } else {
        format!(
            r"(?:([\w$][\w$<>,\[\]]*)\s+)?\b{}\s*\(",
            regex::escape(&target.name)
        )
    }
}

fn source_path(root: &Path, test: &TestCase) -> PathBuf {
    root.join(format!("{}.java", test.class_name))
}
