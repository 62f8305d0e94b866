use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::action::Action;

use super::{Target, TargetDecl};

/// Render a template into a destination file.
///
/// Depends on the template source and on every path in `file_deps` (typically
/// a version marker). The context is part of the target's signature, so
/// changing a value rebuilds the file even when no file changed.
#[derive(Debug, Clone)]
pub struct TemplateFile {
  pub source: PathBuf,
  pub destination: PathBuf,
  pub context: BTreeMap<String, String>,
  pub file_deps: Vec<PathBuf>,
  pub task_deps: Vec<String>,
}

impl TemplateFile {
  pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
    Self {
      source: source.into(),
      destination: destination.into(),
      context: BTreeMap::new(),
      file_deps: Vec::new(),
      task_deps: Vec::new(),
    }
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.context.insert(key.into(), value.into());
    self
  }

  pub fn file_dep(mut self, path: impl Into<PathBuf>) -> Self {
    self.file_deps.push(path.into());
    self
  }
}

impl Target for TemplateFile {
  fn declare(&self) -> TargetDecl {
    let mut decl = TargetDecl::for_output(&self.destination)
      .doc(format!("Render template {}.", self.source.display()))
      .file_dep(&self.source);

    for dep in &self.file_deps {
      decl = decl.file_dep(dep);
    }

    decl
      .task_deps(self.task_deps.iter().cloned())
      .action(Action::Render {
        source: self.source.clone(),
        destination: self.destination.clone(),
        context: self.context.clone(),
      })
  }
}
