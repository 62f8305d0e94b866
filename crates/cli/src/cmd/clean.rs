//! Implementation of the `buildchain clean` command.

use std::path::Path;

use anyhow::{Context, Result, bail};

use buildchain_lib::execute::clean;
use buildchain_lib::store_lock::{LockMode, StateLock};

use crate::output::{OutputFormat, print_error, print_info, print_json, print_stat, print_success, symbols};

/// Execute the clean command.
///
/// Removes the outputs of `targets` (everything when empty) and their
/// dependencies in reverse build order, dropping their fingerprints.
pub fn cmd_clean(file: &Path, targets: &[String], verbose: bool, output: OutputFormat) -> Result<()> {
  let project = super::load_project(file)?;
  let graph = project.graph().context("Invalid build graph")?;
  let config = project.execute_config();

  let _lock =
    StateLock::acquire(&config.state_dir, LockMode::Exclusive, "clean").context("Failed to acquire state lock")?;

  let report = clean(&graph, targets, &config).context("Clean failed")?;

  if output.is_json() {
    let failed: Vec<_> = report
      .failed
      .iter()
      .map(|(name, err)| serde_json::json!({ "name": name, "error": err.to_string() }))
      .collect();
    print_json(&serde_json::json!({
      "success": report.is_success(),
      "cleaned": report.cleaned,
      "removed": report.removed,
      "failed": failed,
    }))?;
  } else {
    if verbose {
      for path in &report.removed {
        println!("  {} {}", symbols::ARROW, path.display());
      }
    }
    for (name, err) in &report.failed {
      print_error(&format!("{}: {}", name, err));
    }

    println!();
    if report.removed.is_empty() && report.is_success() {
      print_info("Nothing to clean");
    } else if report.is_success() {
      print_success("Clean complete!");
    }
    print_stat("Targets", &report.cleaned.len().to_string());
    print_stat("Paths removed", &report.removed.len().to_string());
  }

  if !report.is_success() {
    bail!("Clean failed for {} target(s)", report.failed.len());
  }

  Ok(())
}
