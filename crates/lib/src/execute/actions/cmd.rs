//! Cmd action implementation.
//!
//! Commands run without a shell, with stdin closed. Their stdout and stderr
//! are captured; stderr is attached to the error when the command fails.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info};

use crate::action::{CmdAction, Command, DigestCheck};
use crate::execute::types::ExecuteError;
use crate::util::atomic::Staging;
use crate::util::hash::hash_file;

/// One async lock per staged destination, shared by every running command.
static STAGE_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();

fn stage_lock(destination: &Path) -> Arc<tokio::sync::Mutex<()>> {
  let locks = STAGE_LOCKS.get_or_init(Default::default);
  let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
  locks.entry(destination.to_path_buf()).or_default().clone()
}

/// Execute a Cmd action.
///
/// Without a stage the command runs as-is. With a stage, commands producing
/// the same destination run one at a time, and:
/// - if `reuse` is set and the destination exists, nothing runs
/// - otherwise the command writes to a fresh staging path next to the
///   destination, the optional digest check runs against it, and only then
///   is it renamed into place
///
/// The child is killed if the returned future is dropped.
///
/// # Returns
///
/// The trimmed stdout of the command, or the destination path when an
/// existing output was reused.
pub async fn execute_cmd(action: &CmdAction) -> Result<String, ExecuteError> {
  let CmdAction { command, stage } = action;

  let Some(stage) = stage else {
    let args = command.resolve_args(None).ok_or_else(|| {
      ExecuteError::InvalidAction(format!("{} references a staging path but declares no stage", command))
    })?;
    return run(command, &args).await;
  };

  // Held until the output is installed, so a shared cache entry is produced once
  let lock = stage_lock(&stage.destination);
  let _guard = lock.lock().await;

  if stage.reuse && stage.destination.exists() {
    debug!(path = ?stage.destination, "reusing existing output");
    return Ok(stage.destination.display().to_string());
  }

  let staging = Staging::new(&stage.destination).map_err(ExecuteError::at(&stage.destination))?;
  let args = command
    .resolve_args(Some(staging.path()))
    .ok_or_else(|| ExecuteError::InvalidAction(format!("cannot resolve arguments of {}", command)))?;

  let stdout = run(command, &args).await?;

  if !staging.path().exists() {
    return Err(ExecuteError::InvalidAction(format!(
      "{} exited successfully but produced no output",
      command
    )));
  }

  if let Some(check) = &stage.verify {
    verify_digest(staging.path(), check)?;
  }

  if stage.reuse && stage.destination.exists() {
    // Another process filled the entry meanwhile; readers may be using it
    debug!(path = ?stage.destination, "output appeared while staging, keeping it");
    return Ok(stdout);
  }

  staging.install().map_err(ExecuteError::at(&stage.destination))?;
  Ok(stdout)
}

async fn run(command: &Command, args: &[String]) -> Result<String, ExecuteError> {
  info!(cmd = %command, "executing command");

  let output = tokio::process::Command::new(&command.program)
    .args(args)
    .stdin(Stdio::null())
    .kill_on_drop(true)
    .output()
    .await
    .map_err(|source| ExecuteError::CmdSpawn {
      program: command.program.clone(),
      source,
    })?;

  let stderr = String::from_utf8_lossy(&output.stderr);
  let stdout = String::from_utf8_lossy(&output.stdout);

  if !output.status.success() {
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }
    return Err(ExecuteError::CmdFailed {
      cmd: command.to_string(),
      code: output.status.code(),
      stderr: stderr.into_owned(),
    });
  }

  if !stderr.is_empty() {
    debug!(stderr = %stderr, "command stderr");
  }

  let stdout = stdout.trim().to_string();
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(stdout)
}

/// Check the sha256 of a staged file against the expected digest.
fn verify_digest(staged: &Path, check: &DigestCheck) -> Result<(), ExecuteError> {
  let file: PathBuf = if check.file.as_os_str().is_empty() {
    staged.to_path_buf()
  } else {
    staged.join(&check.file)
  };

  let actual = format!("sha256:{}", hash_file(&file)?);
  if actual != check.expected {
    return Err(ExecuteError::Integrity {
      reference: check.reference.clone(),
      expected: check.expected.clone(),
      actual,
    });
  }

  debug!(reference = %check.reference, digest = %actual, "digest verified");
  Ok(())
}
