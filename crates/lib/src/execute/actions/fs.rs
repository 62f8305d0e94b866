//! File actions.
//!
//! These are blocking and run on the blocking thread pool. Every file they
//! produce is written through [`crate::util::atomic`].

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::execute::types::ExecuteError;
use crate::placeholder;
use crate::util::atomic::{copy_atomic, copy_tree_atomic, create_dirs, write_atomic};

/// Create a directory and its parents.
pub fn mkdirs(path: &Path) -> Result<(), ExecuteError> {
  create_dirs(path).map_err(ExecuteError::at(path))?;
  debug!(path = ?path, "created directory");
  Ok(())
}

/// Copy a single file verbatim.
pub fn copy(source: &Path, destination: &Path) -> Result<(), ExecuteError> {
  let bytes = copy_atomic(source, destination).map_err(ExecuteError::at(source))?;
  debug!(source = ?source, destination = ?destination, bytes, "copied file");
  Ok(())
}

/// Copy a directory tree verbatim.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<(), ExecuteError> {
  let bytes = copy_tree_atomic(source, destination).map_err(ExecuteError::at(source))?;
  debug!(source = ?source, destination = ?destination, bytes, "copied tree");
  Ok(())
}

/// Render a template.
///
/// The source must be UTF-8. Every placeholder must resolve from `context`;
/// nothing is written otherwise.
pub fn render(source: &Path, destination: &Path, context: &BTreeMap<String, String>) -> Result<(), ExecuteError> {
  let template = std::fs::read_to_string(source).map_err(ExecuteError::at(source))?;
  let rendered = placeholder::substitute(&template, context).map_err(|e| ExecuteError::Template {
    path: source.to_path_buf(),
    source: e,
  })?;
  write_atomic(destination, rendered.as_bytes()).map_err(ExecuteError::at(destination))?;
  debug!(source = ?source, destination = ?destination, "rendered template");
  Ok(())
}

/// Write fixed content.
pub fn write(destination: &Path, content: &str) -> Result<(), ExecuteError> {
  write_atomic(destination, content.as_bytes()).map_err(ExecuteError::at(destination))
}
