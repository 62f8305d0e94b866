//! Fingerprint store.
//!
//! Records, per target, what produced its outputs last time: the signature of
//! its actions and the content hash of every file or tree it depends on. The
//! scheduler compares these with the current state to decide staleness.
//!
//! # Storage Layout
//!
//! ```text
//! {state_dir}/
//! └── fingerprints.json   # { "version": 1, "targets": { name: Fingerprint } }
//! ```
//!
//! A store that cannot be read is *degraded*: it answers every lookup with
//! "no record" so everything is rebuilt, and the next save replaces the file.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{FINGERPRINTS_FILENAME, FINGERPRINTS_VERSION};
use crate::target::Dependency;
use crate::util::atomic::write_atomic;
use crate::util::hash::{ContentHash, DirHashError, hash_directory, hash_file};

/// Errors from the fingerprint store. Never fatal to a build.
#[derive(Debug, Error)]
pub enum FingerprintError {
  #[error("failed to read fingerprint store: {0}")]
  Read(#[source] io::Error),

  #[error("failed to parse fingerprint store: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("unsupported fingerprint store version: {0}")]
  UnsupportedVersion(u32),

  #[error("failed to serialize fingerprint store: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write fingerprint store: {0}")]
  Write(#[source] io::Error),
}

/// What produced a target's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
  pub signature: ContentHash,
  pub deps: BTreeMap<PathBuf, ContentHash>,
  pub recorded_at_unix: u64,
  /// The last attempt failed; whatever is on disk was not produced by the
  /// current definition.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub failed: bool,
}

impl Fingerprint {
  pub fn new(signature: ContentHash, deps: BTreeMap<PathBuf, ContentHash>) -> Self {
    Self {
      signature,
      deps,
      recorded_at_unix: unix_now(),
      failed: false,
    }
  }

  /// A marker for a target whose last build failed. It matches nothing.
  pub fn failed() -> Self {
    Self {
      signature: ContentHash(String::new()),
      deps: BTreeMap::new(),
      recorded_at_unix: unix_now(),
      failed: true,
    }
  }

  /// Whether this record describes the given signature and dependency state.
  pub fn matches(&self, signature: &ContentHash, deps: &BTreeMap<PathBuf, ContentHash>) -> bool {
    !self.failed && &self.signature == signature && &self.deps == deps
  }
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

#[derive(Debug, Serialize, Deserialize)]
struct FingerprintFile {
  version: u32,
  targets: BTreeMap<String, Fingerprint>,
}

#[derive(Debug, Default)]
struct State {
  records: BTreeMap<String, Fingerprint>,
  degraded: bool,
  dirty: bool,
}

/// Fingerprint records for all targets, shared by concurrent tasks.
#[derive(Debug)]
pub struct FingerprintStore {
  path: PathBuf,
  state: RwLock<State>,
}

impl FingerprintStore {
  /// Load the store from `state_dir`.
  ///
  /// A missing file yields an empty store. Any other failure yields a
  /// degraded store and logs a warning.
  pub fn load(state_dir: &Path) -> Self {
    let path = state_dir.join(FINGERPRINTS_FILENAME);

    let state = match read_records(&path) {
      Ok(records) => {
        debug!(path = ?path, targets = records.len(), "loaded fingerprints");
        State {
          records,
          ..State::default()
        }
      }
      Err(e) => {
        warn!(path = ?path, error = %e, "fingerprint store unusable, rebuilding everything");
        State {
          degraded: true,
          ..State::default()
        }
      }
    };

    Self {
      path,
      state: RwLock::new(state),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn is_degraded(&self) -> bool {
    self.read(|s| s.degraded)
  }

  /// The record for `name`. Always `None` on a degraded store.
  pub fn get(&self, name: &str) -> Option<Fingerprint> {
    self.read(|s| if s.degraded { None } else { s.records.get(name).cloned() })
  }

  pub fn record(&self, name: &str, fingerprint: Fingerprint) {
    self.write(|s| {
      s.records.insert(name.to_string(), fingerprint);
      s.dirty = true;
    });
  }

  /// Replace the record for `name` with a failure marker.
  pub fn mark_failed(&self, name: &str) {
    self.record(name, Fingerprint::failed());
  }

  pub fn remove(&self, name: &str) {
    self.write(|s| {
      if s.records.remove(name).is_some() {
        s.dirty = true;
      }
    });
  }

  /// Write pending changes atomically.
  ///
  /// A degraded store is replaced by the records gathered since loading.
  pub fn save(&self) -> Result<(), FingerprintError> {
    let content = self.read(|s| {
      if !s.dirty && !s.degraded {
        return None;
      }
      let file = FingerprintFile {
        version: FINGERPRINTS_VERSION,
        targets: s.records.clone(),
      };
      Some(serde_json::to_string_pretty(&file))
    });

    let Some(content) = content else {
      return Ok(());
    };
    let content = content.map_err(FingerprintError::Serialize)?;

    write_atomic(&self.path, content.as_bytes()).map_err(FingerprintError::Write)?;
    self.write(|s| {
      s.dirty = false;
      s.degraded = false;
    });

    debug!(path = ?self.path, "saved fingerprints");
    Ok(())
  }

  fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
    let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
    f(&guard)
  }

  fn write<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
    let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
  }
}

fn read_records(path: &Path) -> Result<BTreeMap<String, Fingerprint>, FingerprintError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
    Err(e) => return Err(FingerprintError::Read(e)),
  };

  let file: FingerprintFile = serde_json::from_str(&content).map_err(FingerprintError::Parse)?;
  if file.version != FINGERPRINTS_VERSION {
    return Err(FingerprintError::UnsupportedVersion(file.version));
  }

  Ok(file.targets)
}

/// Hash every file and tree dependency.
///
/// Fails if any of them cannot be read, missing ones included.
pub fn hash_dependencies(deps: &[Dependency]) -> Result<BTreeMap<PathBuf, ContentHash>, DirHashError> {
  let mut hashes = BTreeMap::new();
  for dep in deps {
    let hash = match dep {
      Dependency::Task(_) => continue,
      Dependency::File(path) => hash_file(path)?,
      Dependency::Tree(path) => {
        if !path.is_dir() {
          return Err(DirHashError::ReadFile {
            path: path.display().to_string(),
            message: "not a directory".to_string(),
          });
        }
        hash_directory(path)?
      }
    };
    if let Some(path) = dep.path() {
      hashes.insert(path.to_path_buf(), hash);
    }
  }
  Ok(hashes)
}
