use std::path::PathBuf;

use crate::action::Action;

use super::{Target, TargetDecl};

/// Create a directory.
#[derive(Debug, Clone)]
pub struct Directory {
  pub name: String,
  pub path: PathBuf,
  pub task_deps: Vec<String>,
}

impl Directory {
  pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      path: path.into(),
      task_deps: Vec::new(),
    }
  }
}

impl Target for Directory {
  fn declare(&self) -> TargetDecl {
    TargetDecl::new(&self.name)
      .doc(format!("Create directory {}.", self.path.display()))
      .output(&self.path)
      .task_deps(self.task_deps.iter().cloned())
      .action(Action::Mkdirs { path: self.path.clone() })
  }
}
