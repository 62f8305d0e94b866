use std::path::PathBuf;

use crate::action::{Action, RegistryConfigSpec};
use crate::execute::actions::registry::common_config;

use super::{Target, TargetDecl};

/// nginx configuration shared by every static container registry.
#[derive(Debug, Clone)]
pub struct CommonRegistryConfig {
  pub destination: PathBuf,
  pub task_deps: Vec<String>,
}

impl CommonRegistryConfig {
  pub fn new(destination: impl Into<PathBuf>) -> Self {
    Self {
      destination: destination.into(),
      task_deps: Vec::new(),
    }
  }
}

impl Target for CommonRegistryConfig {
  fn declare(&self) -> TargetDecl {
    TargetDecl::for_output(&self.destination)
      .doc("Generate the nginx config to serve a common static container registry.")
      .task_deps(self.task_deps.iter().cloned())
      .action(Action::Write {
        destination: self.destination.clone(),
        content: common_config(),
      })
  }
}

/// nginx configuration serving the images found under `image_root`.
///
/// Depends on the content of `image_root` as a whole, so adding, removing or
/// updating an image regenerates it.
#[derive(Debug, Clone)]
pub struct StaticRegistryConfig {
  pub image_root: PathBuf,
  /// Where the web server finds `image_root`.
  pub server_root: String,
  /// Prepended to every repository name.
  pub name_prefix: String,
  pub destination: PathBuf,
  pub task_deps: Vec<String>,
}

impl Target for StaticRegistryConfig {
  fn declare(&self) -> TargetDecl {
    TargetDecl::for_output(&self.destination)
      .doc("Generate the nginx config to serve a container registry.")
      .tree_dep(&self.image_root)
      .task_deps(self.task_deps.iter().cloned())
      .action(Action::RegistryConfig(RegistryConfigSpec {
        image_root: self.image_root.clone(),
        server_root: self.server_root.clone(),
        name_prefix: self.name_prefix.clone(),
        destination: self.destination.clone(),
      }))
  }
}
