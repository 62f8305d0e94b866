//! Build targets.
//!
//! A target is one buildable unit: the files it produces, what it depends on,
//! and the [`Action`]s that produce it. Targets are declarative: each variant
//! only describes itself as a [`TargetDecl`], and the scheduler in
//! [`crate::execute`] decides whether it is up to date, runs its actions and
//! cleans its outputs.
//!
//! # Variants
//!
//! - [`CopyFile`] - verbatim copy of one file
//! - [`TemplateFile`] - template rendered with a context
//! - [`RemoteImage`] - container image pulled by digest, saved as a directory
//!   layout or a tagged archive
//! - [`FileTree`] - ordered collection of the above under one root, planned
//!   into one target per entry plus a [`Group`]
//! - [`Directory`] - directory creation
//! - [`CommonRegistryConfig`] / [`StaticRegistryConfig`] - generated nginx
//!   configuration for a static container registry
//! - [`Group`] - synchronization point with no actions or outputs

mod copy;
mod directory;
mod image;
mod registry;
mod template;
mod tree;

pub use copy::CopyFile;
pub use directory::Directory;
pub use image::{ImageDigest, RemoteImage};
pub use registry::{CommonRegistryConfig, StaticRegistryConfig};
pub use template::TemplateFile;
pub use tree::{FileTree, TreeEntry};

use std::path::{Path, PathBuf};

use crate::action::Action;
use crate::util::hash::{ContentHash, HashError, Hashable};

/// Something that can be declared as a node of the build graph.
pub trait Target: std::fmt::Debug + Send + Sync {
  /// Describe the target. Must not touch the filesystem.
  fn declare(&self) -> TargetDecl;
}

/// What a target depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
  /// Another target, by name.
  Task(String),
  /// A file, fingerprinted by content.
  File(PathBuf),
  /// A directory, fingerprinted as a whole.
  Tree(PathBuf),
}

impl Dependency {
  /// The path of a file or tree dependency.
  pub fn path(&self) -> Option<&Path> {
    match self {
      Dependency::Task(_) => None,
      Dependency::File(p) | Dependency::Tree(p) => Some(p),
    }
  }
}

/// The declaration of a target: one node of the build graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDecl {
  /// Stable identifier, unique in the graph.
  pub name: String,
  /// One-line description shown by `list`.
  pub doc: String,
  /// Artifacts produced, primary output first.
  pub outputs: Vec<PathBuf>,
  pub deps: Vec<Dependency>,
  pub actions: Vec<Action>,
  /// Paths removed by `clean`. Empty means the outputs.
  pub cleanup: Vec<PathBuf>,
}

impl TargetDecl {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      doc: String::new(),
      outputs: Vec::new(),
      deps: Vec::new(),
      actions: Vec::new(),
      cleanup: Vec::new(),
    }
  }

  /// A declaration named after the base name of its primary output.
  pub fn for_output(output: impl Into<PathBuf>) -> Self {
    let output = output.into();
    let mut decl = Self::new(base_name(&output));
    decl.outputs.push(output);
    decl
  }

  pub fn doc(mut self, doc: impl Into<String>) -> Self {
    self.doc = doc.into();
    self
  }

  pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
    self.outputs.push(path.into());
    self
  }

  pub fn task_dep(mut self, name: impl Into<String>) -> Self {
    self.deps.push(Dependency::Task(name.into()));
    self
  }

  pub fn task_deps<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.deps.extend(names.into_iter().map(|n| Dependency::Task(n.into())));
    self
  }

  pub fn file_dep(mut self, path: impl Into<PathBuf>) -> Self {
    self.deps.push(Dependency::File(path.into()));
    self
  }

  pub fn tree_dep(mut self, path: impl Into<PathBuf>) -> Self {
    self.deps.push(Dependency::Tree(path.into()));
    self
  }

  pub fn action(mut self, action: Action) -> Self {
    self.actions.push(action);
    self
  }

  pub fn cleanup(mut self, path: impl Into<PathBuf>) -> Self {
    self.cleanup.push(path.into());
    self
  }

  /// Synchronization node: nothing to run, nothing produced.
  pub fn is_group(&self) -> bool {
    self.actions.is_empty() && self.outputs.is_empty()
  }

  /// Paths removed by `clean`.
  pub fn cleanup_paths(&self) -> &[PathBuf] {
    if self.cleanup.is_empty() {
      &self.outputs
    } else {
      &self.cleanup
    }
  }

  /// Names of the targets this one explicitly depends on.
  pub fn task_dep_names(&self) -> impl Iterator<Item = &str> {
    self.deps.iter().filter_map(|d| match d {
      Dependency::Task(name) => Some(name.as_str()),
      _ => None,
    })
  }

  /// Hash of the actions. Any change to what the target would do changes it.
  pub fn signature(&self) -> Result<ContentHash, HashError> {
    self.actions.compute_hash()
  }
}

/// A synchronization target that completes when all its dependencies do.
#[derive(Debug, Clone)]
pub struct Group {
  pub name: String,
  pub doc: String,
  pub task_deps: Vec<String>,
}

impl Group {
  pub fn new(name: impl Into<String>, task_deps: Vec<String>) -> Self {
    Self {
      name: name.into(),
      doc: String::new(),
      task_deps,
    }
  }
}

impl Target for Group {
  fn declare(&self) -> TargetDecl {
    TargetDecl::new(&self.name)
      .doc(&self.doc)
      .task_deps(self.task_deps.iter().cloned())
  }
}

pub(crate) fn base_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string())
}
