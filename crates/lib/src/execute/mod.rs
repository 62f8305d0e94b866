//! Target execution module.
//!
//! This module provides the entry points for building and cleaning a
//! [`BuildGraph`]. It handles:
//! - Wave-based dependency ordering
//! - Parallel execution of independent targets, bounded by `jobs`
//! - Up-to-date checks against the fingerprint store
//! - Staleness propagation to dependents of rebuilt targets
//! - Failure propagation and skip tracking
//! - Interruption between waves

pub mod actions;
pub mod dag;
pub mod types;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::action::execute_action;
use crate::fingerprint::{Fingerprint, FingerprintStore, hash_dependencies};
use crate::target::TargetDecl;
use crate::util::atomic::remove_path;

pub use dag::BuildGraph;
pub use types::{
  ActionResult, BuildReport, CleanReport, ConfigError, ExecuteConfig, ExecuteError, Interrupt, NotAttempted,
  TargetResult,
};

/// Result of comparing a target with its fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
  /// A matching record exists.
  Fresh,
  /// Never recorded, but outputs exist and there is nothing to fingerprint.
  Trusted,
  Stale,
}

fn freshness(decl: &TargetDecl, store: &FingerprintStore) -> Freshness {
  if decl.outputs.is_empty() || !decl.outputs.iter().all(|o| o.exists()) {
    return Freshness::Stale;
  }

  let Ok(signature) = decl.signature() else {
    return Freshness::Stale;
  };

  match store.get(&decl.name) {
    Some(record) => match hash_dependencies(&decl.deps) {
      Ok(deps) if record.matches(&signature, &deps) => Freshness::Fresh,
      Ok(_) => Freshness::Stale,
      Err(e) => {
        debug!(target = %decl.name, error = %e, "dependency not readable");
        Freshness::Stale
      }
    },
    None if !store.is_degraded() && decl.deps.iter().all(|d| d.path().is_none()) => Freshness::Trusted,
    None => Freshness::Stale,
  }
}

/// Whether a target's outputs are current with respect to the store.
///
/// True only if every output exists and either the store holds a record
/// matching the target's actions and dependency contents, or the target has
/// no file dependencies and has never been recorded. A failed build leaves a
/// record that matches nothing. Forced rebuilds and rebuilt
/// dependencies are the scheduler's concern, see [`build`].
pub fn is_up_to_date(decl: &TargetDecl, store: &FingerprintStore) -> bool {
  freshness(decl, store) != Freshness::Stale
}

/// Run a target's actions in order, stopping at the first failure.
pub async fn execute_target(decl: &TargetDecl) -> Result<TargetResult, ExecuteError> {
  info!(target = %decl.name, actions = decl.actions.len(), "executing target");
  let start = Instant::now();

  let mut action_results = Vec::with_capacity(decl.actions.len());
  for (idx, action) in decl.actions.iter().enumerate() {
    debug!(target = %decl.name, action = idx, kind = action.kind(), "running action");
    action_results.push(execute_action(action).await?);
  }

  Ok(TargetResult {
    action_results,
    duration: start.elapsed(),
  })
}

/// Remove a target's cleanup paths. Absent paths are not an error.
///
/// Returns the paths that existed and were removed.
pub fn clean_target(decl: &TargetDecl) -> Result<Vec<PathBuf>, ExecuteError> {
  let mut removed = Vec::new();
  for path in decl.cleanup_paths() {
    if remove_path(path).map_err(ExecuteError::at(path))? {
      debug!(target = %decl.name, path = ?path, "removed");
      removed.push(path.clone());
    }
  }
  Ok(removed)
}

/// Fingerprint of a target's current definition and dependency contents.
///
/// `None` when either cannot be computed; such a target is never recorded.
fn snapshot(decl: &TargetDecl) -> Option<Fingerprint> {
  let signature = match decl.signature() {
    Ok(signature) => signature,
    Err(e) => {
      warn!(target = %decl.name, error = %e, "cannot compute signature");
      return None;
    }
  };

  match hash_dependencies(&decl.deps) {
    Ok(deps) => Some(Fingerprint::new(signature, deps)),
    Err(e) => {
      warn!(target = %decl.name, error = %e, "cannot fingerprint dependencies");
      None
    }
  }
}

/// How a scheduled target ended.
enum Outcome {
  Executed(TargetResult),
  UpToDate,
  Group,
  Interrupted,
}

async fn run_target(
  decl: Arc<TargetDecl>,
  store: Arc<FingerprintStore>,
  forced: bool,
  dep_rebuilt: bool,
  interrupt: Interrupt,
  semaphore: Arc<Semaphore>,
) -> Result<Outcome, ExecuteError> {
  let _permit = semaphore
    .acquire_owned()
    .await
    .map_err(|e| ExecuteError::Aborted(e.to_string()))?;

  if interrupt.is_triggered() {
    return Ok(Outcome::Interrupted);
  }

  if decl.is_group() {
    return Ok(Outcome::Group);
  }

  if !forced && !dep_rebuilt {
    let (check_decl, check_store) = (decl.clone(), store.clone());
    let fresh = tokio::task::spawn_blocking(move || {
      let fresh = freshness(&check_decl, &check_store);
      if fresh == Freshness::Trusted
        && let Some(fingerprint) = snapshot(&check_decl)
      {
        // Adopt existing outputs so later changes to the target are noticed
        check_store.record(&check_decl.name, fingerprint);
      }
      fresh
    })
    .await
    .map_err(|e| ExecuteError::Aborted(e.to_string()))?;

    if fresh != Freshness::Stale {
      return Ok(Outcome::UpToDate);
    }
  }

  // Dependencies are hashed before the actions run: the record must describe
  // the inputs the outputs were built from
  let snapshot_decl = decl.clone();
  let before = tokio::task::spawn_blocking(move || snapshot(&snapshot_decl))
    .await
    .map_err(|e| ExecuteError::Aborted(e.to_string()))?;

  match execute_target(&decl).await {
    Ok(result) => {
      match before {
        Some(fingerprint) => store.record(&decl.name, fingerprint),
        None => store.remove(&decl.name),
      }
      Ok(Outcome::Executed(result))
    }
    Err(e) => {
      // Existing outputs must not be trusted on the next run
      store.mark_failed(&decl.name);
      Err(e)
    }
  }
}

/// Build the selected targets and everything they depend on.
///
/// An empty selection builds the whole graph. Targets run wave by wave; within
/// a wave at most `config.jobs` run at once. A failed target causes every
/// target depending on it to be skipped while unrelated targets continue.
///
/// # Errors
///
/// Configuration errors (unknown target, missing source file) are returned
/// before anything runs. Target failures are reported in the [`BuildReport`].
pub async fn build<S: AsRef<str>>(
  graph: &BuildGraph,
  selection: &[S],
  config: &ExecuteConfig,
) -> Result<BuildReport, ConfigError> {
  let selected = graph.closure(selection)?;
  graph.check_sources(&selected)?;
  let waves = graph.waves(&selected);

  info!(
    targets = selected.len(),
    wave_count = waves.len(),
    jobs = config.jobs,
    "starting build"
  );

  let store = Arc::new(FingerprintStore::load(&config.state_dir));
  let semaphore = Arc::new(Semaphore::new(config.jobs.max(1)));

  let mut report = BuildReport::default();
  let mut rebuilt: HashSet<String> = HashSet::new();
  // Failed or skipped target -> the failed target that caused it
  let mut broken: HashMap<String, String> = HashMap::new();

  for (wave_idx, wave) in waves.iter().enumerate() {
    if config.interrupt.is_triggered() {
      for name in wave {
        report.skipped.insert(name.clone(), NotAttempted::Interrupted);
      }
      continue;
    }

    debug!(wave = wave_idx, targets = wave.len(), "executing wave");

    let mut join_set = JoinSet::new();
    let mut tasks = HashMap::new();

    for name in wave {
      let deps = graph.dependencies(name);

      if let Some(root) = deps.iter().find_map(|dep| broken.get(*dep)).cloned() {
        warn!(target = %name, failed_dep = %root, "skipping target due to failed dependency");
        report
          .skipped
          .insert(name.clone(), NotAttempted::DependencyFailed(root.clone()));
        broken.insert(name.clone(), root);
        continue;
      }

      let Some(decl) = graph.get(name) else {
        continue;
      };
      let dep_rebuilt = deps.iter().any(|dep| rebuilt.contains(*dep));

      let handle = join_set.spawn(run_target(
        Arc::new(decl.clone()),
        store.clone(),
        config.is_forced(name),
        dep_rebuilt,
        config.interrupt.clone(),
        semaphore.clone(),
      ));
      tasks.insert(handle.id(), (name.clone(), dep_rebuilt));
    }

    while let Some(joined) = join_set.join_next_with_id().await {
      let (id, outcome) = match joined {
        Ok((id, outcome)) => (id, outcome),
        Err(e) => (e.id(), Err(ExecuteError::Aborted(e.to_string()))),
      };
      let Some((name, dep_rebuilt)) = tasks.remove(&id) else {
        error!(task = %id, "result from unknown task");
        continue;
      };

      match outcome {
        Ok(Outcome::Executed(result)) => {
          info!(target = %name, duration_ms = result.duration.as_millis() as u64, "target built");
          rebuilt.insert(name.clone());
          report.executed.insert(name, result);
        }
        Ok(Outcome::UpToDate) => {
          debug!(target = %name, "target up to date");
          report.up_to_date.insert(name);
        }
        Ok(Outcome::Group) => {
          if dep_rebuilt {
            rebuilt.insert(name.clone());
          }
          report.groups.insert(name);
        }
        Ok(Outcome::Interrupted) => {
          report.skipped.insert(name, NotAttempted::Interrupted);
        }
        Err(e) => {
          error!(target = %name, error = %e, "target failed");
          broken.insert(name.clone(), name.clone());
          report.failed.insert(name, e);
        }
      }
    }

    if let Err(e) = store.save() {
      warn!(error = %e, "failed to save fingerprints");
    }
  }

  info!(
    executed = report.executed.len(),
    up_to_date = report.up_to_date.len(),
    failed = report.failed.len(),
    skipped = report.skipped.len(),
    "build complete"
  );

  Ok(report)
}

/// Clean the selected targets and everything they depend on.
///
/// Targets are cleaned in reverse dependency order and their fingerprints
/// dropped. Cleaning twice is the same as cleaning once.
pub fn clean<S: AsRef<str>>(
  graph: &BuildGraph,
  selection: &[S],
  config: &ExecuteConfig,
) -> Result<CleanReport, ConfigError> {
  let selected: BTreeSet<String> = graph.closure(selection)?;
  let store = FingerprintStore::load(&config.state_dir);
  let mut report = CleanReport::default();

  info!(targets = selected.len(), "starting clean");

  for wave in graph.waves(&selected).iter().rev() {
    for name in wave.iter().rev() {
      let Some(decl) = graph.get(name) else {
        continue;
      };

      match clean_target(decl) {
        Ok(removed) => {
          store.remove(name);
          report.removed.extend(removed);
          report.cleaned.push(name.clone());
        }
        Err(e) => {
          error!(target = %name, error = %e, "clean failed");
          report.failed.insert(name.clone(), e);
        }
      }
    }
  }

  if let Err(e) = store.save() {
    warn!(error = %e, "failed to save fingerprints");
  }

  info!(
    cleaned = report.cleaned.len(),
    removed = report.removed.len(),
    failed = report.failed.len(),
    "clean complete"
  );

  Ok(report)
}
