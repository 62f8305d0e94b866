//! Atomic installation of build outputs.
//!
//! Every file-producing action writes into a [`Staging`] location created next
//! to its final destination (same filesystem, so the final step is a rename).
//! The staging directory is removed when the value is dropped, whichever way
//! the action exits, so an interrupted or failed action never leaves a partial
//! file at the declared output path.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// Suffix of staging directory names.
pub const STAGING_SUFFIX: &str = ".staging";

/// A scoped staging location for one output path.
#[derive(Debug)]
pub struct Staging {
  dir: TempDir,
  path: PathBuf,
  destination: PathBuf,
}

impl Staging {
  /// Create a staging location for `destination`.
  ///
  /// The parent directory of `destination` is created if missing. The staging
  /// path itself does not exist yet: producers create it as a file or a
  /// directory.
  pub fn new(destination: &Path) -> io::Result<Self> {
    let parent = parent_of(destination)?;
    create_dirs(parent)?;

    let file_name = destination
      .file_name()
      .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"))?;

    let dir = tempfile::Builder::new()
      .prefix(&format!(".{}.", file_name.to_string_lossy()))
      .suffix(STAGING_SUFFIX)
      .tempdir_in(parent)?;
    let path = dir.path().join(file_name);

    Ok(Self {
      dir,
      path,
      destination: destination.to_path_buf(),
    })
  }

  /// The path producers must write to.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Move the staged content into place.
  ///
  /// An existing directory at the destination is replaced as a whole.
  pub fn install(self) -> io::Result<()> {
    if self.destination.is_dir() && !self.destination.is_symlink() {
      fs::remove_dir_all(&self.destination)?;
    }
    fs::rename(&self.path, &self.destination)?;
    debug!(path = ?self.destination, "installed");
    // Dropping `self.dir` removes the now-empty staging directory.
    Ok(())
  }
}

/// Create a directory and its parents, tolerating concurrent creators.
pub fn create_dirs(path: &Path) -> io::Result<()> {
  match fs::create_dir_all(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
    Err(e) => Err(e),
  }
}

/// Write `content` to `destination` atomically.
pub fn write_atomic(destination: &Path, content: &[u8]) -> io::Result<()> {
  let staging = Staging::new(destination)?;
  {
    let mut file = fs::File::create(staging.path())?;
    file.write_all(content)?;
    file.sync_all()?;
  }
  staging.install()
}

/// Copy `source` to `destination` atomically, preserving permission bits.
pub fn copy_atomic(source: &Path, destination: &Path) -> io::Result<u64> {
  let staging = Staging::new(destination)?;
  // fs::copy carries the permission bits over
  let bytes = fs::copy(source, staging.path())?;
  staging.install()?;
  Ok(bytes)
}

/// Copy a directory tree to `destination` atomically.
pub fn copy_tree_atomic(source: &Path, destination: &Path) -> io::Result<u64> {
  let staging = Staging::new(destination)?;
  let bytes = copy_tree(source, staging.path())?;
  staging.install()?;
  Ok(bytes)
}

fn copy_tree(source: &Path, destination: &Path) -> io::Result<u64> {
  let mut bytes = 0;
  for entry in walkdir::WalkDir::new(source).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(source).map_err(io::Error::other)?;
    let target = destination.join(rel);

    if entry.file_type().is_dir() {
      create_dirs(&target)?;
    } else {
      bytes += fs::copy(entry.path(), &target)?;
    }
  }
  Ok(bytes)
}

/// Remove a file or directory tree.
///
/// Returns `Ok(false)` when nothing was there.
pub fn remove_path(path: &Path) -> io::Result<bool> {
  let metadata = match fs::symlink_metadata(path) {
    Ok(m) => m,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
    Err(e) => return Err(e),
  };

  let result = if metadata.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  };

  match result {
    Ok(()) => Ok(true),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(e),
  }
}

fn parent_of(path: &Path) -> io::Result<&Path> {
  match path.parent() {
    Some(p) if !p.as_os_str().is_empty() => Ok(p),
    Some(_) => Ok(Path::new(".")),
    None => Err(io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent")),
  }
}
