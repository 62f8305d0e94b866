use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// A unit of work performed while executing a target.
///
/// Actions are plain data: targets describe what must happen and the central
/// runner ([`execute_action`](super::execute_action)) performs it. Every
/// action that produces a file installs it atomically.
///
/// Actions are serialized to compute a target's signature, so changing any
/// field (a template context value, an image digest) makes the target stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
  /// Create a directory and its parents. Safe under concurrent callers.
  Mkdirs { path: PathBuf },

  /// Copy one file verbatim, preserving permission bits.
  Copy { source: PathBuf, destination: PathBuf },

  /// Copy a directory tree verbatim.
  CopyTree { source: PathBuf, destination: PathBuf },

  /// Render a template with `@NAME@` placeholders.
  Render {
    source: PathBuf,
    destination: PathBuf,
    context: BTreeMap<String, String>,
  },

  /// Write fixed content.
  Write { destination: PathBuf, content: String },

  /// Generate an nginx static-registry configuration from an image tree.
  RegistryConfig(RegistryConfigSpec),

  /// Run an external command.
  Cmd(CmdAction),
}

impl Action {
  /// Short label used in logs.
  pub fn kind(&self) -> &'static str {
    match self {
      Action::Mkdirs { .. } => "mkdirs",
      Action::Copy { .. } => "copy",
      Action::CopyTree { .. } => "copy-tree",
      Action::Render { .. } => "render",
      Action::Write { .. } => "write",
      Action::RegistryConfig(_) => "registry-config",
      Action::Cmd(_) => "cmd",
    }
  }
}

/// Inputs of the static-registry configuration generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryConfigSpec {
  /// Directory holding `<name>/<version>/manifest.json` image layouts.
  pub image_root: PathBuf,
  /// Path (or nginx variable) the web server serves `image_root` from.
  pub server_root: String,
  /// Prefix prepended to every repository name.
  pub name_prefix: String,
  pub destination: PathBuf,
}

/// An external command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CmdAction {
  pub command: Command,
  /// When set, the command writes into a staging location that is installed
  /// at `stage.destination` only after the command (and optional digest
  /// check) succeed.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stage: Option<Stage>,
}

/// Program and arguments, independent of any tool-specific knowledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
  /// Not part of the signature: moving the tool does not invalidate outputs.
  #[serde(skip)]
  pub program: String,
  pub args: Vec<Arg>,
}

/// A command-line argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
  Literal(String),
  /// `prefix` + staging path + `suffix`, e.g. `dir:` + path.
  Staged { prefix: String, suffix: String },
}

impl Command {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(Arg::Literal(arg.into()));
    self
  }

  pub fn staged_arg(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
    self.args.push(Arg::Staged {
      prefix: prefix.into(),
      suffix: suffix.into(),
    });
    self
  }

  /// Resolve arguments, substituting the staging path where referenced.
  ///
  /// Returns `None` if a staged argument is present but no staging path is given.
  pub fn resolve_args(&self, staged: Option<&Path>) -> Option<Vec<String>> {
    self
      .args
      .iter()
      .map(|arg| match arg {
        Arg::Literal(s) => Some(s.clone()),
        Arg::Staged { prefix, suffix } => staged.map(|p| format!("{}{}{}", prefix, p.display(), suffix)),
      })
      .collect()
  }
}

impl std::fmt::Display for Command {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      match arg {
        Arg::Literal(s) => write!(f, " {}", s)?,
        Arg::Staged { prefix, suffix } => write!(f, " {}<staging>{}", prefix, suffix)?,
      }
    }
    Ok(())
  }
}

/// Staged installation of a command's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
  pub destination: PathBuf,
  /// Integrity check run against the staged output before installing it.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub verify: Option<DigestCheck>,
  /// Skip the command entirely when `destination` already exists.
  pub reuse: bool,
}

/// Expected sha256 digest of a file inside (or at) the staged output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestCheck {
  /// What is being verified, for error messages (e.g. an image reference).
  pub reference: String,
  /// Path relative to the staging path; empty means the staged file itself.
  pub file: PathBuf,
  /// `sha256:<hex>`
  pub expected: String,
}
