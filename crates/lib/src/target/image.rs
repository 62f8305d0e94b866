use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::action::{Action, CmdAction, Command, DigestCheck, Stage};
use crate::consts::IMAGE_MANIFEST;

use super::{Target, TargetDecl};

/// A content digest of the form `sha256:<64 lowercase hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDigest(String);

impl ImageDigest {
  /// The hex part, without the algorithm prefix.
  pub fn hex(&self) -> &str {
    &self.0["sha256:".len()..]
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl FromStr for ImageDigest {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let hex = s
      .strip_prefix("sha256:")
      .ok_or_else(|| format!("digest {:?} must start with sha256:", s))?;
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
      return Err(format!("digest {:?} must be sha256: followed by 64 lowercase hex digits", s));
    }
    Ok(Self(s.to_string()))
  }
}

impl fmt::Display for ImageDigest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A container image pulled from a registry by digest.
///
/// The pull lands in a digest-keyed cache shared by every build, and is
/// verified there: the sha256 of the pulled manifest must equal `digest`.
/// From the cache the image is either copied as a directory layout to
/// `<destination>/<name>/<version>/` or exported to
/// `<destination>/<name>-<version>.tar` tagged `<registry>/<name>:<version>`.
#[derive(Debug, Clone)]
pub struct RemoteImage {
  pub registry: String,
  pub name: String,
  pub version: String,
  pub digest: ImageDigest,
  /// Name of the image in the registry, when it differs from `name`.
  pub remote_name: Option<String>,
  pub destination: PathBuf,
  pub save_as_tar: bool,
  /// Root of the digest-keyed image cache.
  pub cache_root: PathBuf,
  /// Path or name of the `skopeo` binary.
  pub tool: String,
  pub task_deps: Vec<String>,
}

impl RemoteImage {
  /// Reference the image is pulled by: `<registry>/<remote name>@<digest>`.
  pub fn fullname(&self) -> String {
    format!(
      "{}/{}@{}",
      self.registry,
      self.remote_name.as_deref().unwrap_or(&self.name),
      self.digest
    )
  }

  /// Tag embedded in archives: `<registry>/<name>:<version>`.
  pub fn tag(&self) -> String {
    format!("{}/{}:{}", self.registry, self.name, self.version)
  }

  /// Cache entry for this digest.
  pub fn cache_path(&self) -> PathBuf {
    self.cache_root.join("sha256").join(self.digest.hex())
  }

  /// Directory layout location.
  pub fn dirname(&self) -> PathBuf {
    self.destination.join(&self.name).join(&self.version)
  }

  /// Archive location.
  pub fn archive_path(&self) -> PathBuf {
    self.destination.join(format!("{}-{}.tar", self.name, self.version))
  }

  fn pull_action(&self) -> Action {
    let fullname = self.fullname();
    Action::Cmd(CmdAction {
      command: Command::new(&self.tool)
        .arg("copy")
        .arg("--format")
        .arg("v2s2")
        .arg("--dest-compress")
        .arg(format!("docker://{}", fullname))
        .staged_arg("dir:", ""),
      stage: Some(Stage {
        destination: self.cache_path(),
        verify: Some(DigestCheck {
          reference: fullname,
          file: PathBuf::from(IMAGE_MANIFEST),
          expected: self.digest.to_string(),
        }),
        reuse: true,
      }),
    })
  }

  fn save_action(&self, cache: &Path) -> Action {
    if self.save_as_tar {
      Action::Cmd(CmdAction {
        command: Command::new(&self.tool)
          .arg("copy")
          .arg(format!("dir:{}", cache.display()))
          .staged_arg("docker-archive:", format!(":{}", self.tag())),
        stage: Some(Stage {
          destination: self.archive_path(),
          verify: None,
          reuse: false,
        }),
      })
    } else {
      Action::CopyTree {
        source: cache.to_path_buf(),
        destination: self.dirname(),
      }
    }
  }
}

impl Target for RemoteImage {
  fn declare(&self) -> TargetDecl {
    let name = format!("{}-{}", self.name, self.version);
    let cache = self.cache_path();

    let decl = TargetDecl::new(name)
      .doc(format!("Download {} container image.", self.name))
      .task_deps(self.task_deps.iter().cloned())
      .action(self.pull_action())
      .action(self.save_action(&cache));

    if self.save_as_tar {
      decl.output(self.archive_path())
    } else {
      decl
        .output(self.dirname().join(IMAGE_MANIFEST))
        .cleanup(self.dirname())
    }
  }
}
