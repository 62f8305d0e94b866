//! Build file loading.
//!
//! A project is described by a `Buildchain.toml` file. Settings come from, in
//! increasing priority:
//! 1. built-in defaults
//! 2. the `[settings]` table
//! 3. environment variables (`BUILDCHAIN_*`)
//! 4. command-line flags, applied by the caller on the [`ExecuteConfig`]
//!
//! # Example
//!
//! ```toml
//! [settings]
//! build_root = "_build/root"
//!
//! [[directories]]
//! name = "iso_mkdir_root"
//! path = "_build/root"
//!
//! [[trees]]
//! name = "salt_tree"
//! task_deps = ["iso_mkdir_root"]
//! entries = [
//!   "salt/foo.sls",
//!   { kind = "template", source = "salt/top.sls.in", destination = "salt/top.sls",
//!     context = { VERSION = "1.2.3" }, file_deps = ["VERSION"] },
//! ]
//! ```

mod types;

pub use types::{BuildFile, DirectoryConfig, EntryConfig, Settings, TargetConfig, TreeConfig};

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::consts::{ENV_JOBS, ENV_SKOPEO, ENV_STATE_DIR, IMAGE_CACHE_DIR};
use crate::execute::{BuildGraph, ConfigError, ExecuteConfig};
use crate::target::{
  CommonRegistryConfig, CopyFile, Directory, FileTree, ImageDigest, RemoteImage, StaticRegistryConfig, Target,
  TargetDecl, TemplateFile, TreeEntry,
};

/// A loaded build file with settings resolved.
#[derive(Debug, Clone)]
pub struct Project {
  /// Directory relative paths are resolved against.
  pub base_dir: PathBuf,
  /// Settings with overrides applied and paths made absolute.
  pub settings: Settings,
  pub file: BuildFile,
}

impl Project {
  /// Load and parse a build file, applying environment overrides.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadBuildFile {
      path: path.to_path_buf(),
      source,
    })?;

    let base_dir = match path.parent() {
      Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
      _ => PathBuf::from("."),
    };
    let base_dir = dunce::canonicalize(&base_dir).unwrap_or(base_dir);

    let project = Self::parse(&content, &base_dir).map_err(|e| match e {
      ConfigError::ParseBuildFile { message, .. } => ConfigError::ParseBuildFile {
        path: path.to_path_buf(),
        message,
      },
      other => other,
    })?;

    debug!(path = ?path, trees = project.file.trees.len(), "loaded build file");
    Ok(project)
  }

  /// Parse build file content, resolving paths against `base_dir`.
  pub fn parse(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
    let file: BuildFile = toml::from_str(content).map_err(|e| ConfigError::ParseBuildFile {
      path: PathBuf::new(),
      message: e.to_string(),
    })?;

    let mut settings = with_env_overrides(file.settings.clone())?;
    settings.build_root = base_dir.join(&settings.build_root);
    settings.state_dir = base_dir.join(&settings.state_dir);

    Ok(Self {
      base_dir: base_dir.to_path_buf(),
      settings,
      file,
    })
  }

  /// Execution configuration derived from the settings.
  pub fn execute_config(&self) -> ExecuteConfig {
    let mut config = ExecuteConfig::new(&self.settings.state_dir);
    if let Some(jobs) = self.settings.jobs {
      config.jobs = jobs;
    }
    config
  }

  /// Every target declared by the build file: directories first, then trees
  /// in file order.
  pub fn declarations(&self) -> Result<Vec<TargetDecl>, ConfigError> {
    let mut decls = Vec::new();

    for dir in &self.file.directories {
      let mut target = Directory::new(&dir.name, self.base_dir.join(&dir.path));
      target.task_deps = dir.task_deps.clone();
      decls.push(target.declare());
    }

    for tree in &self.file.trees {
      decls.extend(self.file_tree(tree)?.plan()?);
    }

    Ok(decls)
  }

  /// Declarations validated into a graph.
  pub fn graph(&self) -> Result<BuildGraph, ConfigError> {
    BuildGraph::build(self.declarations()?)
  }

  fn file_tree(&self, config: &TreeConfig) -> Result<FileTree, ConfigError> {
    let source_root = match &config.source_root {
      Some(root) => self.base_dir.join(root),
      None => self.base_dir.clone(),
    };
    let destination = match &config.destination {
      Some(dest) => self.base_dir.join(dest),
      None => self.settings.build_root.clone(),
    };

    let mut tree = FileTree::new(&config.name, source_root, destination);
    tree.task_deps = config.task_deps.clone();
    if let Some(doc) = &config.doc {
      tree.doc = doc.clone();
    }

    for entry in &config.entries {
      let entry = match entry {
        EntryConfig::Path(path) => TreeEntry::File(path.clone()),
        EntryConfig::Target(target) => TreeEntry::Target(self.tree_target(&tree, target)?),
      };
      tree.entries.push(entry);
    }

    Ok(tree)
  }

  fn tree_target(&self, tree: &FileTree, config: &TargetConfig) -> Result<Box<dyn Target>, ConfigError> {
    let target: Box<dyn Target> = match config {
      TargetConfig::Copy { source, destination } => Box::new(CopyFile::new(
        tree.source_root.join(source),
        tree.destination.join(destination),
      )),
      TargetConfig::Template {
        source,
        destination,
        context,
        file_deps,
      } => {
        let mut target = TemplateFile::new(tree.source_root.join(source), tree.destination.join(destination));
        target.context = context.clone();
        target.file_deps = file_deps.iter().map(|p| self.base_dir.join(p)).collect();
        Box::new(target)
      }
      TargetConfig::Image {
        registry,
        name,
        version,
        digest,
        destination,
        remote_name,
        save_as_tar,
      } => {
        let digest: ImageDigest = digest.parse().map_err(|message| ConfigError::InvalidDeclaration {
          target: format!("{}:{}-{}", tree.name, name, version),
          message,
        })?;
        Box::new(RemoteImage {
          registry: registry.clone(),
          name: name.clone(),
          version: version.clone(),
          digest,
          remote_name: remote_name.clone(),
          destination: tree.destination.join(destination),
          save_as_tar: *save_as_tar,
          cache_root: self.settings.state_dir.join(IMAGE_CACHE_DIR),
          tool: self.settings.skopeo.clone(),
          task_deps: Vec::new(),
        })
      }
      TargetConfig::CommonRegistry { destination } => {
        Box::new(CommonRegistryConfig::new(tree.destination.join(destination)))
      }
      TargetConfig::StaticRegistry {
        image_root,
        server_root,
        name_prefix,
        destination,
        task_deps,
      } => Box::new(StaticRegistryConfig {
        image_root: tree.destination.join(image_root),
        server_root: server_root.clone(),
        name_prefix: name_prefix.clone(),
        destination: tree.destination.join(destination),
        task_deps: task_deps.clone(),
      }),
    };
    Ok(target)
  }
}

/// Apply `BUILDCHAIN_*` environment overrides.
pub fn with_env_overrides(mut settings: Settings) -> Result<Settings, ConfigError> {
  if let Ok(jobs) = std::env::var(ENV_JOBS) {
    let parsed = jobs
      .trim()
      .parse::<usize>()
      .ok()
      .filter(|j| *j > 0)
      .ok_or(ConfigError::InvalidEnv {
        name: ENV_JOBS,
        value: jobs.clone(),
      })?;
    settings.jobs = Some(parsed);
  }

  if let Ok(skopeo) = std::env::var(ENV_SKOPEO)
    && !skopeo.is_empty()
  {
    settings.skopeo = skopeo;
  }

  if let Ok(state_dir) = std::env::var(ENV_STATE_DIR)
    && !state_dir.is_empty()
  {
    settings.state_dir = PathBuf::from(state_dir);
  }

  Ok(settings)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::Action;
  use serial_test::serial;

  const DIGEST: &str = "sha256:f78411e19d84a252e53bff71a4407a5686c46983a2c2eeed83929b888179acea";

  fn no_env<R>(f: impl FnOnce() -> R) -> R {
    temp_env::with_vars_unset([ENV_JOBS, ENV_SKOPEO, ENV_STATE_DIR], f)
  }

  fn parse(content: &str) -> Project {
    no_env(|| Project::parse(content, Path::new("/project")).unwrap())
  }

  #[test]
  #[serial]
  fn defaults_when_empty() {
    let project = parse("");
    assert_eq!(project.settings.build_root, PathBuf::from("/project/_build/root"));
    assert_eq!(project.settings.state_dir, PathBuf::from("/project/_build/.buildchain"));
    assert_eq!(project.settings.skopeo, "skopeo");
    assert!(project.declarations().unwrap().is_empty());
  }

  #[test]
  #[serial]
  fn settings_from_file() {
    let project = parse(
      r#"
      [settings]
      build_root = "/iso"
      state_dir = "state"
      jobs = 3
      skopeo = "/opt/skopeo"
      "#,
    );
    assert_eq!(project.settings.build_root, PathBuf::from("/iso"));
    assert_eq!(project.settings.state_dir, PathBuf::from("/project/state"));
    assert_eq!(project.execute_config().jobs, 3);
  }

  #[test]
  #[serial]
  fn env_overrides_file() {
    let project = temp_env::with_vars(
      [
        (ENV_JOBS, Some("7")),
        (ENV_SKOPEO, Some("/usr/local/bin/skopeo")),
        (ENV_STATE_DIR, Some("/var/lib/buildchain")),
      ],
      || Project::parse("[settings]\njobs = 2\n", Path::new("/project")).unwrap(),
    );

    assert_eq!(project.settings.jobs, Some(7));
    assert_eq!(project.settings.skopeo, "/usr/local/bin/skopeo");
    assert_eq!(project.settings.state_dir, PathBuf::from("/var/lib/buildchain"));
  }

  #[test]
  #[serial]
  fn invalid_jobs_env_is_rejected() {
    let result = temp_env::with_var(ENV_JOBS, Some("many"), || Project::parse("", Path::new("/p")));
    assert!(matches!(result, Err(ConfigError::InvalidEnv { name, .. }) if name == ENV_JOBS));

    let result = temp_env::with_var(ENV_JOBS, Some("0"), || Project::parse("", Path::new("/p")));
    assert!(result.is_err());
  }

  #[test]
  #[serial]
  fn unknown_field_is_parse_error() {
    let result = no_env(|| Project::parse("[settings]\nbogus = 1\n", Path::new("/p")));
    assert!(matches!(result, Err(ConfigError::ParseBuildFile { .. })));
  }

  #[test]
  #[serial]
  fn trees_and_directories_become_targets() {
    let project = parse(&format!(
      r#"
      [[directories]]
      name = "iso_mkdir_root"
      path = "_build/root"

      [[trees]]
      name = "salt_tree"
      source_root = "src"
      task_deps = ["iso_mkdir_root"]
      entries = [
        "salt/foo.sls",
        {{ kind = "template", source = "salt/top.sls.in", destination = "salt/top.sls", context = {{ VERSION = "1.2.3" }}, file_deps = ["VERSION"] }},
        {{ kind = "image", registry = "k8s.gcr.io", name = "pause", version = "3.1", digest = "{DIGEST}", destination = "images", save_as_tar = true }},
        {{ kind = "common_registry", destination = "salt/registry-common.inc" }},
        {{ kind = "static_registry", image_root = "images", server_root = "$images", name_prefix = "p/", destination = "salt/registry.inc" }},
      ]
      "#
    ));

    let decls = project.declarations().unwrap();
    let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(
      names,
      vec![
        "iso_mkdir_root",
        "salt_tree:salt/foo.sls",
        "salt_tree:salt/top.sls",
        "salt_tree:images/pause-3.1.tar",
        "salt_tree:salt/registry-common.inc",
        "salt_tree:salt/registry.inc",
        "salt_tree",
      ]
    );

    let copy = &decls[1];
    assert_eq!(copy.outputs, vec![PathBuf::from("/project/_build/root/salt/foo.sls")]);
    match &copy.actions[..] {
      [Action::Copy { source, .. }] => assert_eq!(source, &PathBuf::from("/project/src/salt/foo.sls")),
      other => panic!("unexpected actions: {other:?}"),
    }

    let template = &decls[2];
    assert!(
      template
        .deps
        .contains(&crate::target::Dependency::File("/project/VERSION".into()))
    );

    let image = &decls[3];
    match &image.actions[0] {
      Action::Cmd(pull) => {
        assert_eq!(pull.command.program, "skopeo");
        assert!(
          pull
            .stage
            .as_ref()
            .unwrap()
            .destination
            .starts_with("/project/_build/.buildchain/images/sha256")
        );
      }
      other => panic!("unexpected action: {other:?}"),
    }

    let graph = BuildGraph::build(decls).unwrap();
    // The registry config depends on the images written under its image root
    assert_eq!(
      graph.dependencies("salt_tree:salt/registry.inc"),
      vec!["iso_mkdir_root", "salt_tree:images/pause-3.1.tar"]
    );
  }

  #[test]
  #[serial]
  fn invalid_digest_is_config_error() {
    let project = parse(
      r#"
      [[trees]]
      name = "images"
      entries = [{ kind = "image", registry = "r", name = "pause", version = "3.1", digest = "latest", destination = "i" }]
      "#,
    );

    match project.declarations() {
      Err(ConfigError::InvalidDeclaration { target, .. }) => assert_eq!(target, "images:pause-3.1"),
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[test]
  fn load_reports_missing_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let result = Project::load(&temp.path().join("Buildchain.toml"));
    assert!(matches!(result, Err(ConfigError::ReadBuildFile { .. })));
  }

  #[test]
  #[serial]
  fn load_resolves_relative_to_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("Buildchain.toml");
    std::fs::write(&path, "[settings]\nbuild_root = \"out\"\n").unwrap();

    let project = no_env(|| Project::load(&path).unwrap());
    let base = dunce::canonicalize(temp.path()).unwrap();
    assert_eq!(project.settings.build_root, base.join("out"));
  }
}
