//! Session configuration.
//!
//! One JSON document drives a whole session. Every section has defaults, so
//! a minimal config only names the target and the tool paths:
//!
//! ```json
//! {
//!   "target": { "method": "pkg/Klass:(I)I:sign" },
//!   "paths": {
//!     "classes": ["build/classes"],
//!     "helper_lib": "lib/helper.jar",
//!     "generator_jar": "lib/evosuite.jar"
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use pendulum_generate::{GeneratorConfig, ToolPaths};
use pendulum_model::{MethodSignature, ScopeLimits, TestCase};
use pendulum_pipeline::MonitorConfig;
use pendulum_replay::BranchCounting;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PendulumConfig {
    pub target: TargetConfig,
    pub paths: PathsConfig,
    pub generator: GeneratorConfig,
    pub exploration: ExplorationConfig,
    pub pipeline: PipelineConfig,
    pub log: LogConfig,
}

/// What to generate tests for.
///
/// Signatures use the `class:descriptor:name` form, e.g.
/// `pkg/Klass:(I)I:sign`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Every visible method of this class (internal form).
    pub class: Option<String>,
    /// A single target method.
    pub method: Option<String>,
    /// Test to start exploring from; requires `method`.
    pub initial_test: Option<String>,
}

/// Resolved target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Class(String),
    Method(MethodSignature),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Class(c) => write!(f, "class {c}"),
            Target::Method(m) => write!(f, "method {m}"),
        }
    }
}

impl TargetConfig {
    pub fn resolve(&self) -> Result<Target, ConfigError> {
        match (&self.class, &self.method) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "target.class and target.method are mutually exclusive".to_string(),
            )),
            (None, None) => Err(ConfigError::Invalid(
                "one of target.class or target.method is required".to_string(),
            )),
            (Some(class), None) => {
                if self.initial_test.is_some() {
                    return Err(ConfigError::Invalid(
                        "target.initial_test requires target.method".to_string(),
                    ));
                }
                Ok(Target::Class(class.clone()))
            }
            (None, Some(method)) => Ok(Target::Method(MethodSignature::parse(method)?)),
        }
    }

    pub fn initial_test(&self) -> Result<Option<TestCase>, ConfigError> {
        let Some(text) = &self.initial_test else {
            return Ok(None);
        };
        let sig = MethodSignature::parse(text)?;
        Ok(Some(TestCase::new(sig.class_name, sig.descriptor, sig.name)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    #[serde(flatten)]
    pub tools: ToolPaths,
    /// Directories holding sources of user-supplied tests.
    pub test_dirs: Vec<PathBuf>,
    /// Where the run summary is written.
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            test_dirs: Vec::new(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl PathsConfig {
    /// Where test sources are looked up, generated ones first.
    pub fn test_source_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.tools.out_dir.clone()];
        roots.extend(self.test_dirs.iter().cloned());
        roots
    }

    pub fn summary_file(&self) -> PathBuf {
        self.log_dir.join("summary.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Frontiers are cut at depths below this bound.
    pub max_depth: u32,
    pub scope: ScopeLimits,
    pub branch_counting: BranchCounting,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            scope: ScopeLimits::default(),
            branch_counting: BranchCounting::AllFrames,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub exploration_workers: usize,
    pub generation_workers: usize,
    /// Capacity of each of the two queues.
    pub queue_capacity: usize,
    /// How long an exploration worker waits for a test.
    pub exploration_wait_ms: u64,
    /// Global time budget.
    pub global_budget_secs: u64,
    /// Separation between the two idle samples of the termination check.
    pub debounce_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exploration_workers: 1,
            generation_workers: 1,
            queue_capacity: 4096,
            exploration_wait_ms: 100,
            global_budget_secs: 600, // 10 minutes
            debounce_ms: 500,
        }
    }
}

impl PipelineConfig {
    pub fn exploration_wait(&self) -> Duration {
        Duration::from_millis(self.exploration_wait_ms)
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            budget: Duration::from_secs(self.global_budget_secs),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

impl PendulumConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Check internal consistency. Filesystem checks happen at session setup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.resolve()?;
        self.target.initial_test()?;

        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.paths.tools.classes.is_empty() {
            return invalid("paths.classes must list at least one entry");
        }
        if self.pipeline.exploration_workers == 0 || self.pipeline.generation_workers == 0 {
            return invalid("pipeline worker counts must be positive");
        }
        if self.pipeline.queue_capacity == 0 {
            return invalid("pipeline.queue_capacity must be positive");
        }
        if self.pipeline.global_budget_secs == 0 {
            return invalid("pipeline.global_budget_secs must be positive");
        }
        if self.pipeline.debounce_ms == 0 {
            return invalid("pipeline.debounce_ms must be positive");
        }
        if self.generator.multi_target && self.generator.max_targets == 0 {
            return invalid("generator.max_targets must be positive in multi-target mode");
        }
        if self.generator.poll_interval_ms == 0 {
            return invalid("generator.poll_interval_ms must be positive");
        }
        if self.generator.entry_method.is_empty() || self.generator.wrapper_prefix.is_empty() {
            return invalid("generator.entry_method and generator.wrapper_prefix must be set");
        }
        Ok(())
    }
}
