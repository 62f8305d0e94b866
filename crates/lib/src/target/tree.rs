use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::execute::types::ConfigError;

use super::{CopyFile, Dependency, Group, Target, TargetDecl};

/// One entry of a [`FileTree`].
#[derive(Debug)]
pub enum TreeEntry {
  /// A file copied verbatim; the path is relative to both roots.
  File(PathBuf),
  /// Any other target, carrying its own destination.
  Target(Box<dyn Target>),
}

impl From<&str> for TreeEntry {
  fn from(path: &str) -> Self {
    TreeEntry::File(PathBuf::from(path))
  }
}

impl<T: Target + 'static> From<T> for TreeEntry {
  fn from(target: T) -> Self {
    TreeEntry::Target(Box::new(target))
  }
}

/// An ordered collection of entries deployed under one destination root.
///
/// A tree plans into one target per entry, named `<tree>:<path relative to
/// the destination>`, plus a [`Group`] named after the tree that completes
/// once every entry does. The tree's task dependencies apply to every entry.
#[derive(Debug)]
pub struct FileTree {
  pub name: String,
  pub doc: String,
  pub source_root: PathBuf,
  pub destination: PathBuf,
  pub entries: Vec<TreeEntry>,
  pub task_deps: Vec<String>,
}

impl FileTree {
  pub fn new(name: impl Into<String>, source_root: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      doc: String::new(),
      source_root: source_root.into(),
      destination: destination.into(),
      entries: Vec::new(),
      task_deps: Vec::new(),
    }
  }

  pub fn entry(mut self, entry: impl Into<TreeEntry>) -> Self {
    self.entries.push(entry.into());
    self
  }

  /// Plan the tree into targets, group last.
  ///
  /// Fails if an entry produces nothing or two entries produce the same path.
  pub fn plan(&self) -> Result<Vec<TargetDecl>, ConfigError> {
    let mut produced: HashMap<PathBuf, String> = HashMap::new();
    let mut decls = Vec::with_capacity(self.entries.len() + 1);

    for entry in &self.entries {
      let mut decl = match entry {
        TreeEntry::File(rel) => CopyFile::new(self.source_root.join(rel), self.destination.join(rel)).declare(),
        TreeEntry::Target(target) => target.declare(),
      };

      let Some(primary) = decl.cleanup_paths().first() else {
        return Err(ConfigError::InvalidDeclaration {
          target: self.name.clone(),
          message: format!("entry {} produces no output", decl.name),
        });
      };
      decl.name = format!("{}:{}", self.name, relative_to(primary, &self.destination).display());

      for output in &decl.outputs {
        if let Some(first) = produced.insert(output.clone(), decl.name.clone()) {
          return Err(ConfigError::DuplicateOutput {
            path: output.clone(),
            first,
            second: decl.name,
          });
        }
      }

      decl
        .deps
        .extend(self.task_deps.iter().cloned().map(Dependency::Task));
      decls.push(decl);
    }

    let mut group = Group::new(&self.name, decls.iter().map(|d| d.name.clone()).collect());
    group.doc = if self.doc.is_empty() {
      format!("Deploy {}.", self.name)
    } else {
      self.doc.clone()
    };
    decls.push(group.declare());

    Ok(decls)
  }
}

fn relative_to<'a>(path: &'a Path, root: &Path) -> &'a Path {
  path.strip_prefix(root).unwrap_or(path)
}
