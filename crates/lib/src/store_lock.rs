//! File-based state directory locking.
//!
//! Builds and cleans take an exclusive lock on `<state_dir>/.lock`; read-only
//! commands take a shared one. The lock is advisory (`flock` on unix,
//! `LockFileEx` on windows) and released when the [`StateLock`] is dropped.
//!
//! An exclusive holder records who it is in the lock file, so a second
//! `build` can say which process to wait for.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::APP_NAME;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Who holds an exclusive lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub command: String,
  pub mode: LockMode,
  pub acquired_at_unix: u64,
}

impl LockHolder {
  fn current(command: &str, mode: LockMode) -> Self {
    Self {
      pid: std::process::id(),
      command: command.to_string(),
      mode,
      acquired_at_unix: unix_now(),
    }
  }

  /// Seconds since the lock was taken.
  pub fn age_secs(&self) -> u64 {
    unix_now().saturating_sub(self.acquired_at_unix)
  }
}

#[derive(Debug, Error)]
pub enum StateLockError {
  #[error(
    "State directory is in use by `{command}` (PID {pid}, for {age}s)\n\
     If you're sure no {app} process is running, remove the lock file:\n  {lock_path}",
    command = .holder.command,
    pid = .holder.pid,
    age = .holder.age_secs(),
    app = APP_NAME
  )]
  Held { holder: LockHolder, lock_path: PathBuf },

  #[error(
    "State directory is in use by another process\n\
     If you're sure no {app} process is running, remove the lock file:\n  {lock_path}",
    app = APP_NAME
  )]
  HeldUnknown { lock_path: PathBuf },

  #[error("Failed to {action} {path}: {source}")]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A held lock on a state directory.
#[derive(Debug)]
pub struct StateLock {
  file: File,
  path: PathBuf,
  mode: LockMode,
}

impl StateLock {
  /// Lock `state_dir`, creating it if needed. Never blocks.
  pub fn acquire(state_dir: &Path, mode: LockMode, command: &str) -> Result<Self, StateLockError> {
    let path = state_dir.join(LOCK_FILENAME);
    let io_err = |action: &'static str, path: &Path| {
      let path = path.to_path_buf();
      move |source| StateLockError::Io { action, path, source }
    };

    std::fs::create_dir_all(state_dir).map_err(io_err("create", state_dir))?;

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(io_err("open", &path))?;

    match sys::try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(match read_holder(&mut &file) {
          Some(holder) => StateLockError::Held { holder, lock_path: path },
          None => StateLockError::HeldUnknown { lock_path: path },
        });
      }
      Err(e) => return Err(io_err("lock", &path)(e)),
    }

    let lock = Self { file, path, mode };
    if mode == LockMode::Exclusive {
      lock
        .write_holder(&LockHolder::current(command, mode))
        .map_err(io_err("write", &lock.path))?;
    }

    debug!(path = ?lock.path, ?mode, command, "state directory locked");
    Ok(lock)
  }

  /// The holder recorded in the lock file, read through the held handle.
  ///
  /// Opening a second handle would fail on windows, where locks are mandatory.
  pub fn holder(&self) -> Option<LockHolder> {
    read_holder(&mut &self.file)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }

  fn write_holder(&self, holder: &LockHolder) -> io::Result<()> {
    let mut file = &self.file;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    serde_json::to_writer_pretty(&mut file, holder).map_err(io::Error::other)?;
    file.flush()
  }
}

impl Drop for StateLock {
  fn drop(&mut self) {
    // Stale holder records would be reported against later shared holders
    if self.mode == LockMode::Exclusive {
      let _ = self.file.set_len(0);
    }
  }
}

fn read_holder<R: Read + Seek>(file: &mut R) -> Option<LockHolder> {
  let mut contents = String::new();
  file.seek(SeekFrom::Start(0)).ok()?;
  file.read_to_string(&mut contents).ok()?;
  serde_json::from_str(&contents).ok()
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

#[cfg(unix)]
mod sys {
  use std::fs::File;
  use std::io;
  use std::os::unix::io::AsFd;

  use rustix::fs::{FlockOperation, flock};

  use super::LockMode;

  pub fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    let operation = match mode {
      LockMode::Shared => FlockOperation::NonBlockingLockShared,
      LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
    };
    flock(file.as_fd(), operation).map_err(io::Error::from)
  }
}

#[cfg(windows)]
mod sys {
  use std::fs::File;
  use std::io;
  use std::os::windows::io::AsRawHandle;

  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  use super::LockMode;

  pub fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    let handle = file.as_raw_handle() as HANDLE;
    let flags = match mode {
      LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
      LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
    };

    // SAFETY: the handle is valid for the lifetime of `file` and a zeroed
    // OVERLAPPED requests a lock starting at offset 0.
    let locked = unsafe {
      let mut overlapped = std::mem::zeroed();
      LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
    };
    if locked != 0 {
      return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
      return Err(io::ErrorKind::WouldBlock.into());
    }
    Err(err)
  }
}
