//! Build actions.
//!
//! An [`Action`] is one primitive step of a target: create a directory, copy
//! or render a file, write generated content, or run an external tool.
//! Targets only describe actions; [`execute_action`] performs them.
//!
//! # Action Types
//!
//! - [`Action::Mkdirs`] - create a directory
//! - [`Action::Copy`] / [`Action::CopyTree`] - verbatim copies
//! - [`Action::Render`] - template with `@NAME@` placeholders, see [`crate::placeholder`]
//! - [`Action::Write`] - fixed content
//! - [`Action::RegistryConfig`] - nginx static-registry configuration
//! - [`Action::Cmd`] - external command, optionally staged and digest-checked

mod types;

pub use types::*;

use crate::execute::actions::{cmd, fs, registry};
use crate::execute::types::{ActionResult, ExecuteError};

/// Execute a single action.
///
/// File actions run on the blocking pool; commands run as child processes.
pub async fn execute_action(action: &Action) -> Result<ActionResult, ExecuteError> {
  let kind = action.kind();

  let output = match action {
    Action::Cmd(cmd_action) => cmd::execute_cmd(cmd_action).await?,
    other => {
      let other = other.clone();
      tokio::task::spawn_blocking(move || execute_blocking(&other))
        .await
        .map_err(|e| ExecuteError::Aborted(e.to_string()))??
    }
  };

  Ok(ActionResult { kind, output })
}

fn execute_blocking(action: &Action) -> Result<String, ExecuteError> {
  let written = match action {
    Action::Mkdirs { path } => {
      fs::mkdirs(path)?;
      path
    }
    Action::Copy { source, destination } => {
      fs::copy(source, destination)?;
      destination
    }
    Action::CopyTree { source, destination } => {
      fs::copy_tree(source, destination)?;
      destination
    }
    Action::Render {
      source,
      destination,
      context,
    } => {
      fs::render(source, destination, context)?;
      destination
    }
    Action::Write { destination, content } => {
      fs::write(destination, content)?;
      destination
    }
    Action::RegistryConfig(spec) => {
      registry::generate(spec)?;
      &spec.destination
    }
    Action::Cmd(_) => {
      return Err(ExecuteError::InvalidAction(
        "commands cannot run on the blocking pool".to_string(),
      ));
    }
  };

  Ok(written.display().to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use tempfile::TempDir;

  #[tokio::test]
  async fn execute_write_reports_path() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("a/b.txt");

    let result = execute_action(&Action::Write {
      destination: dest.clone(),
      content: "x".to_string(),
    })
    .await
    .unwrap();

    assert_eq!(result.kind, "write");
    assert_eq!(result.output, dest.display().to_string());
    assert_eq!(std::fs::read_to_string(dest).unwrap(), "x");
  }

  #[tokio::test]
  async fn execute_render_propagates_template_error() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("t.in");
    std::fs::write(&src, "@MISSING@").unwrap();

    let err = execute_action(&Action::Render {
      source: src,
      destination: temp.path().join("t"),
      context: BTreeMap::new(),
    })
    .await
    .unwrap_err();

    assert!(matches!(err, ExecuteError::Template { .. }));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn execute_cmd_returns_stdout() {
    let result = execute_action(&Action::Cmd(CmdAction {
      command: Command::new("echo").arg("hi"),
      stage: None,
    }))
    .await
    .unwrap();

    assert_eq!(result.kind, "cmd");
    assert_eq!(result.output, "hi");
  }
}
