use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use buildchain_lib::consts::BUILD_FILE_NAME;

mod cmd;
mod output;

use output::OutputFormat;

/// buildchain - Incremental builder for installation media
#[derive(Parser)]
#[command(name = "buildchain")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the build file
  #[arg(short, long, global = true, default_value = BUILD_FILE_NAME)]
  file: PathBuf,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build targets and their dependencies (default: everything)
  Build {
    /// Targets to build
    targets: Vec<String>,

    /// Maximum number of targets running at once
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Rebuild every selected target
    #[arg(long)]
    force: bool,

    /// Rebuild these targets even if up to date
    #[arg(long, value_name = "TARGET")]
    always: Vec<String>,
  },

  /// Remove the outputs of targets and their dependencies (default: everything)
  Clean {
    /// Targets to clean
    targets: Vec<String>,
  },

  /// List targets in build order
  List,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build {
      targets,
      jobs,
      force,
      always,
    } => cmd::cmd_build(
      &cli.file,
      &targets,
      cmd::BuildOptions { jobs, force, always },
      cli.verbose,
      cli.output,
    ),
    Commands::Clean { targets } => cmd::cmd_clean(&cli.file, &targets, cli.verbose, cli.output),
    Commands::List => cmd::cmd_list(&cli.file, cli.output),
  }
}
