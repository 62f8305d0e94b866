use std::path::PathBuf;

use crate::action::Action;

use super::{Target, TargetDecl};

/// Copy one file verbatim.
#[derive(Debug, Clone)]
pub struct CopyFile {
  pub source: PathBuf,
  pub destination: PathBuf,
  pub task_deps: Vec<String>,
}

impl CopyFile {
  pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
    Self {
      source: source.into(),
      destination: destination.into(),
      task_deps: Vec::new(),
    }
  }
}

impl Target for CopyFile {
  fn declare(&self) -> TargetDecl {
    TargetDecl::for_output(&self.destination)
      .doc(format!("Copy {}.", self.source.display()))
      .file_dep(&self.source)
      .task_deps(self.task_deps.iter().cloned())
      .action(Action::Copy {
        source: self.source.clone(),
        destination: self.destination.clone(),
      })
  }
}
