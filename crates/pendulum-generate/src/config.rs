//! Generator and tool-path configuration.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// How the external generator is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Short tool name, used in log file names (`<tool>-log-<id>.txt`).
    pub tool_name: String,
    /// Java launcher used to start the generator.
    pub java: PathBuf,
    /// Java compiler used for wrappers and generated tests.
    pub javac: PathBuf,
    /// Maximum heap of the generator JVM (`-Xmx`).
    pub heap: String,
    /// Memory hint passed to the generator (`-mem`, MB).
    pub memory_mb: u32,
    /// Search budget per invocation, in seconds.
    pub time_budget_secs: u64,
    /// Generate several targets per invocation instead of exactly one.
    pub multi_target: bool,
    /// Largest batch handed to one invocation in multi-target mode.
    pub max_targets: usize,
    /// How long a worker waits to fill a multi-target batch.
    pub batch_wait_secs: u64,
    /// Class name prefix of the emitted wrappers (`<prefix>_<id>`).
    pub wrapper_prefix: String,
    /// Name of the no-argument test method every artifact must declare.
    pub entry_method: String,
    /// Sleep between log polls while the generator is running.
    pub poll_interval_ms: u64,
    /// Extra arguments appended verbatim to the generator command line.
    pub extra_args: Vec<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tool_name: "evosuite".to_string(),
            java: PathBuf::from("java"),
            javac: PathBuf::from("javac"),
            heap: "4G".to_string(),
            memory_mb: 2048,
            time_budget_secs: 900, // 15 minutes
            multi_target: false,
            max_targets: 1,
            batch_wait_secs: 5,
            wrapper_prefix: "EvoSuiteWrapper".to_string(),
            entry_method: "test0".to_string(),
            poll_interval_ms: 2000,
            extra_args: Vec::new(),
        }
    }
}

impl GeneratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_wait(&self) -> Duration {
        Duration::from_secs(self.batch_wait_secs)
    }

    /// Batch size the generation stage should use.
    pub fn batch_size(&self) -> usize {
        if self.multi_target {
            self.max_targets.max(1)
        } else {
            1
        }
    }
}

/// Filesystem locations shared by the generator and the build steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Compiled classes of the program under test.
    pub classes: Vec<PathBuf>,
    /// Helper library the wrappers and generated tests link against.
    pub helper_lib: PathBuf,
    /// Generator jar.
    pub generator_jar: PathBuf,
    /// Scratch directory: wrappers, logs, compiled wrappers.
    pub scratch_dir: PathBuf,
    /// Compiled generated tests.
    pub scratch_bin_dir: PathBuf,
    /// Where the generator writes test sources.
    pub out_dir: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            classes: vec![PathBuf::from("bin")],
            helper_lib: PathBuf::from("lib/helper.jar"),
            generator_jar: PathBuf::from("lib/evosuite.jar"),
            scratch_dir: PathBuf::from("tmp"),
            scratch_bin_dir: PathBuf::from("tmp/bin"),
            out_dir: PathBuf::from("out"),
        }
    }
}

impl ToolPaths {
    fn join(entries: Vec<PathBuf>) -> Result<OsString, GenerationError> {
        Ok(std::env::join_paths(entries)?)
    }

    /// Search path handed to the generator: classes, helper library, scratch.
    pub fn generator_search_path(&self) -> Result<OsString, GenerationError> {
        let mut entries = self.classes.clone();
        entries.push(self.helper_lib.clone());
        entries.push(self.scratch_dir.clone());
        Self::join(entries)
    }

    /// Search path for compiling wrappers: classes and helper library.
    pub fn wrapper_search_path(&self) -> Result<OsString, GenerationError> {
        let mut entries = self.classes.clone();
        entries.push(self.helper_lib.clone());
        Self::join(entries)
    }

    /// Search path for compiling generated tests.
    pub fn test_search_path(&self) -> Result<OsString, GenerationError> {
        let mut entries = vec![self.scratch_bin_dir.clone()];
        entries.extend(self.classes.iter().cloned());
        entries.push(self.helper_lib.clone());
        entries.push(self.generator_jar.clone());
        Self::join(entries)
    }
}
