//! Serialized form of the build file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Contents of `Buildchain.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildFile {
  #[serde(default)]
  pub settings: Settings,
  #[serde(default)]
  pub directories: Vec<DirectoryConfig>,
  #[serde(default)]
  pub trees: Vec<TreeConfig>,
}

/// `[settings]`. Relative paths are relative to the build file's directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  /// Default destination of trees.
  pub build_root: PathBuf,
  /// Fingerprints, lock file and image cache.
  pub state_dir: PathBuf,
  /// Maximum concurrent targets. Defaults to the number of CPUs.
  pub jobs: Option<usize>,
  /// `skopeo` binary.
  pub skopeo: String,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      build_root: PathBuf::from("_build/root"),
      state_dir: PathBuf::from("_build/.buildchain"),
      jobs: None,
      skopeo: "skopeo".to_string(),
    }
  }
}

/// `[[directories]]`: a directory created by its own target.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
  pub name: String,
  pub path: PathBuf,
  #[serde(default)]
  pub task_deps: Vec<String>,
}

/// `[[trees]]`: an ordered set of entries deployed under one root.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
  pub name: String,
  #[serde(default)]
  pub doc: Option<String>,
  /// Root of entry sources. Defaults to the build file's directory.
  #[serde(default)]
  pub source_root: Option<PathBuf>,
  /// Root of entry destinations. Defaults to `settings.build_root`.
  #[serde(default)]
  pub destination: Option<PathBuf>,
  #[serde(default)]
  pub task_deps: Vec<String>,
  #[serde(default)]
  pub entries: Vec<EntryConfig>,
}

/// A tree entry: a bare path copied verbatim, or a table with a `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EntryConfig {
  Path(PathBuf),
  Target(TargetConfig),
}

/// Tree entries other than verbatim copies.
///
/// `source` is relative to the tree's source root, `destination` and
/// `image_root` to the tree's destination, `file_deps` to the build file's
/// directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TargetConfig {
  Copy {
    source: PathBuf,
    destination: PathBuf,
  },
  Template {
    source: PathBuf,
    destination: PathBuf,
    #[serde(default)]
    context: BTreeMap<String, String>,
    #[serde(default)]
    file_deps: Vec<PathBuf>,
  },
  Image {
    registry: String,
    name: String,
    version: String,
    digest: String,
    destination: PathBuf,
    #[serde(default)]
    remote_name: Option<String>,
    #[serde(default)]
    save_as_tar: bool,
  },
  CommonRegistry {
    destination: PathBuf,
  },
  StaticRegistry {
    image_root: PathBuf,
    server_root: String,
    #[serde(default)]
    name_prefix: String,
    destination: PathBuf,
    #[serde(default)]
    task_deps: Vec<String>,
  },
}
