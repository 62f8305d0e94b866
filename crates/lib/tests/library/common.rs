//! Shared helpers for library integration tests.

use std::path::{Path, PathBuf};

use buildchain_lib::execute::ExecuteConfig;
use buildchain_lib::util::hash::hash_bytes;
use tempfile::TempDir;

/// Isolated workspace with source, output and state directories.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.temp.path().join(relative)
  }

  /// Write a file relative to the temp directory, creating parents.
  pub fn write_file(&self, relative: &str, content: &str) -> PathBuf {
    let path = self.path(relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn read_file(&self, relative: &str) -> String {
    std::fs::read_to_string(self.path(relative)).unwrap()
  }

  pub fn state_dir(&self) -> PathBuf {
    self.path("state")
  }

  pub fn config(&self) -> ExecuteConfig {
    let mut config = ExecuteConfig::new(self.state_dir());
    config.jobs = 4;
    config
  }
}

/// Manifest written by [`fake_skopeo`]; its hash is the image digest.
pub const MANIFEST: &str = r#"{"schemaVersion":2,"config":{"digest":"sha256:00"}}"#;

pub fn manifest_digest() -> String {
  format!("sha256:{}", hash_bytes(MANIFEST.as_bytes()))
}

/// A digest that matches nothing the fake tool produces.
pub fn wrong_digest() -> String {
  format!("sha256:{}", hash_bytes(b"something else"))
}

/// Install a shell script standing in for `skopeo`.
///
/// `dir:<path>` destinations receive [`MANIFEST`] plus one blob, and
/// `docker-archive:<path>:<tag>` destinations receive a file holding the tag.
/// Every invocation is appended to `<dir>/skopeo.log`.
#[cfg(unix)]
pub fn fake_skopeo(dir: &Path) -> PathBuf {
  slow_fake_skopeo(dir, "0")
}

/// Like [`fake_skopeo`], sleeping `delay` seconds before producing output.
#[cfg(unix)]
pub fn slow_fake_skopeo(dir: &Path, delay: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  std::fs::create_dir_all(dir).unwrap();
  let log = dir.join("skopeo.log");
  let script = format!(
    r#"#!/bin/sh
set -e
echo "$@" >> '{log}'
sleep {delay}
eval dst=\${{$#}}
case "$dst" in
  dir:*)
    out="${{dst#dir:}}"
    mkdir -p "$out"
    printf '%s' '{manifest}' > "$out/manifest.json"
    printf 'blob' > "$out/{blob}"
    ;;
  docker-archive:*)
    rest="${{dst#docker-archive:}}"
    out="${{rest%%:*}}"
    printf '%s' "${{rest#*:}}" > "$out"
    ;;
  *)
    echo "unsupported destination $dst" >&2
    exit 2
    ;;
esac
"#,
    log = log.display(),
    delay = delay,
    manifest = MANIFEST,
    blob = "ab".repeat(32),
  );

  let path = dir.join("skopeo");
  std::fs::write(&path, script).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// Number of times the fake tool ran.
pub fn skopeo_calls(dir: &Path) -> usize {
  std::fs::read_to_string(dir.join("skopeo.log"))
    .map(|log| log.lines().count())
    .unwrap_or(0)
}
