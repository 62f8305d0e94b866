//! Types for target execution.
//!
//! This module defines the error types, result types, and configuration
//! used by the scheduler.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::placeholder::PlaceholderError;
use crate::util::hash::DirHashError;

/// Configuration errors.
///
/// These are detected before any action runs and abort the whole build.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// Cycle detected in the dependency graph.
  #[error("dependency cycle between: {}", .nodes.join(", "))]
  Cycle { nodes: Vec<String> },

  /// A task dependency names a target that was never declared.
  #[error("target {target} depends on unknown target {dependency}")]
  DanglingDependency { target: String, dependency: String },

  /// Two targets share a name.
  #[error("duplicate target name: {0}")]
  DuplicateTarget(String),

  /// Two targets (or two tree entries) would write the same path.
  #[error("{path} is produced by both {first} and {second}")]
  DuplicateOutput {
    path: PathBuf,
    first: String,
    second: String,
  },

  /// A file dependency neither exists nor is produced by another target.
  #[error("target {target} needs {path}, which does not exist and no target produces it")]
  MissingSource { target: String, path: PathBuf },

  /// A target name given on the command line does not exist.
  #[error("unknown target: {0}")]
  UnknownTarget(String),

  /// A declaration is malformed (bad digest, empty name, ...).
  #[error("invalid declaration {target}: {message}")]
  InvalidDeclaration { target: String, message: String },

  /// Build file could not be read.
  #[error("failed to read {path}: {source}")]
  ReadBuildFile {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Build file could not be parsed.
  #[error("failed to parse {path}: {message}")]
  ParseBuildFile { path: PathBuf, message: String },

  /// An environment override has an invalid value.
  #[error("invalid value {value:?} for {name}")]
  InvalidEnv { name: &'static str, value: String },
}

/// Errors that fail a single target.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// A template placeholder could not be resolved.
  #[error("template {path}: {source}")]
  Template {
    path: PathBuf,
    #[source]
    source: PlaceholderError,
  },

  /// Downloaded content does not match the declared digest.
  #[error("digest mismatch for {reference}: expected {expected}, got {actual}")]
  Integrity {
    reference: String,
    expected: String,
    actual: String,
  },

  /// Command could not be started.
  #[error("failed to start {program}: {source}")]
  CmdSpawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// Command exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}{}", stderr_suffix(.stderr))]
  CmdFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  /// An action is not executable as declared.
  #[error("invalid action: {0}")]
  InvalidAction(String),

  /// I/O error on a known path.
  #[error("{path}: {source}")]
  Path {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// I/O error during execution.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// Hashing a staged output failed.
  #[error("hash error: {0}")]
  Hash(#[from] DirHashError),

  /// Static registry generation failed.
  #[error("registry config: {0}")]
  Registry(String),

  /// The task running the target panicked or was cancelled.
  #[error("target task aborted: {0}")]
  Aborted(String),
}

fn stderr_suffix(stderr: &str) -> String {
  let trimmed = stderr.trim();
  if trimmed.is_empty() {
    String::new()
  } else {
    format!("\n{}", trimmed)
  }
}

impl ExecuteError {
  pub(crate) fn at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ExecuteError {
    let path = path.into();
    move |source| ExecuteError::Path { path, source }
  }
}

/// Why a target was not attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotAttempted {
  /// A (transitive) dependency failed or was itself skipped.
  DependencyFailed(String),
  /// The run was interrupted before the target was scheduled.
  Interrupted,
}

impl std::fmt::Display for NotAttempted {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      NotAttempted::DependencyFailed(dep) => write!(f, "dependency {} failed", dep),
      NotAttempted::Interrupted => write!(f, "interrupted"),
    }
  }
}

/// Result of executing a single action.
#[derive(Debug, Clone)]
pub struct ActionResult {
  pub kind: &'static str,
  /// Stdout for commands, the written path for file actions.
  pub output: String,
}

/// Result of executing one target's actions.
#[derive(Debug, Clone)]
pub struct TargetResult {
  pub action_results: Vec<ActionResult>,
  pub duration: Duration,
}

/// Result of a build run.
#[derive(Debug, Default)]
pub struct BuildReport {
  /// Targets whose actions ran successfully.
  pub executed: BTreeMap<String, TargetResult>,

  /// Targets skipped because they were up to date.
  pub up_to_date: BTreeSet<String>,

  /// Synchronization targets (no actions, no outputs) that completed.
  pub groups: BTreeSet<String>,

  /// Targets whose actions failed.
  pub failed: BTreeMap<String, ExecuteError>,

  /// Targets not attempted.
  pub skipped: BTreeMap<String, NotAttempted>,
}

impl BuildReport {
  /// Returns true if no target failed or was left unattempted.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  /// Returns the total number of targets processed.
  pub fn total(&self) -> usize {
    self.executed.len() + self.up_to_date.len() + self.groups.len() + self.failed.len() + self.skipped.len()
  }

  /// Whether the run was cut short.
  pub fn interrupted(&self) -> bool {
    self.skipped.values().any(|s| *s == NotAttempted::Interrupted)
  }
}

/// Result of a clean run.
#[derive(Debug, Default)]
pub struct CleanReport {
  /// Targets cleaned, in the order they were processed.
  pub cleaned: Vec<String>,

  /// Paths that existed and were removed.
  pub removed: Vec<PathBuf>,

  /// Targets whose cleanup failed.
  pub failed: BTreeMap<String, ExecuteError>,
}

impl CleanReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Shared interruption flag.
///
/// Setting it stops the scheduler from starting new waves. Targets already
/// running finish normally.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn trigger(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_triggered(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Configuration for a run.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of targets executing at once.
  pub jobs: usize,

  /// Rebuild everything regardless of fingerprints.
  pub force: bool,

  /// Targets to rebuild regardless of fingerprints.
  pub forced: BTreeSet<String>,

  /// Directory holding the fingerprint store and lock file.
  pub state_dir: PathBuf,

  pub interrupt: Interrupt,
}

impl ExecuteConfig {
  pub fn new(state_dir: impl Into<PathBuf>) -> Self {
    Self {
      jobs: num_cpus(),
      force: false,
      forced: BTreeSet::new(),
      state_dir: state_dir.into(),
      interrupt: Interrupt::new(),
    }
  }

  /// Whether `name` must rebuild regardless of its fingerprint.
  pub fn is_forced(&self, name: &str) -> bool {
    self.force || self.forced.contains(name)
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
