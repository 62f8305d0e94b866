//! Hashing utilities for fingerprints and integrity checks.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character sha256 hex digest
//! - `Hashable`: signature of any serializable value (used for action lists)
//! - `hash_directory()`: deterministic directory tree hashing
//! - `hash_file()`: single file hashing
//! - `hash_bytes()`: arbitrary byte hashing

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::util::atomic::STAGING_SUFFIX;

pub type HashError = serde_json::Error;

/// A full 64-character sha256 hash.
///
/// # Format
///
/// Lowercase hexadecimal, without any `sha256:` prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Stable signature of a declaration.
///
/// The signature is the sha256 of the JSON serialization, so any change in
/// a serialized field (template context, image digest, command line) yields a
/// different value.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ContentHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(hash_bytes(serialized.as_bytes()))
  }
}

impl<T: Serialize> Hashable for [T] {}

/// Error during file or directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Hash a directory tree.
///
/// Every entry contributes its kind, its path relative to `path` and, for
/// files and symlinks, the hash of its content or target. Entries are visited
/// in file name order. Staging directories left by in-progress writes (see
/// [`crate::util::atomic::Staging`]) are skipped so a concurrent build of a
/// sibling output does not change the hash.
pub fn hash_directory(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut hasher = Sha256::new();

  let walker = WalkDir::new(path)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| !is_staging(e.file_name()));

  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let rel = entry.path().strip_prefix(path).unwrap_or(entry.path());
    let kind = entry.file_type();

    let record = if kind.is_symlink() {
      let target = fs::read_link(entry.path()).map_err(|e| DirHashError::ReadSymlink {
        path: entry.path().display().to_string(),
        message: e.to_string(),
      })?;
      format!("L {} {}", rel.display(), hash_bytes(target.to_string_lossy().as_bytes()))
    } else if kind.is_dir() {
      format!("D {}", rel.display())
    } else if kind.is_file() {
      format!("F {} {}", rel.display(), hash_file(entry.path())?)
    } else {
      continue;
    };

    hasher.update(record.as_bytes());
    hasher.update([0u8]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

fn is_staging(name: &OsStr) -> bool {
  name.to_str().is_some_and(|n| n.starts_with('.') && n.ends_with(STAGING_SUFFIX))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_error = |e: io::Error| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };

  let mut file = fs::File::open(path).map_err(read_error)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_error)?;

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}
