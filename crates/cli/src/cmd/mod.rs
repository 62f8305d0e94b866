mod build;
mod clean;
mod list;

use std::path::Path;

use anyhow::{Context, Result};

use buildchain_lib::config::Project;

pub use build::{BuildOptions, cmd_build};
pub use clean::cmd_clean;
pub use list::cmd_list;

/// Load the build file, with a readable error when it is missing.
fn load_project(file: &Path) -> Result<Project> {
  Project::load(file).with_context(|| format!("Failed to load build file {}", file.display()))
}
