//! Implementation of the `buildchain build` command.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::warn;

use buildchain_lib::execute::{BuildGraph, BuildReport, ConfigError, build};
use buildchain_lib::store_lock::{LockMode, StateLock};

use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_json, print_stat, print_success, print_warning, symbols,
};

/// Flags of the build command that override settings.
#[derive(Debug, Default)]
pub struct BuildOptions {
  pub jobs: Option<usize>,
  pub force: bool,
  pub always: Vec<String>,
}

/// Execute the build command.
///
/// Builds `targets` (everything when empty) and their dependencies, holding
/// the state directory lock for the whole run. Ctrl-C stops scheduling new
/// targets; running ones finish first.
pub fn cmd_build(
  file: &Path,
  targets: &[String],
  options: BuildOptions,
  verbose: bool,
  output: OutputFormat,
) -> Result<()> {
  let start = Instant::now();

  let project = super::load_project(file)?;
  let graph = project.graph().context("Invalid build graph")?;

  let mut config = project.execute_config();
  if let Some(jobs) = options.jobs {
    config.jobs = jobs.max(1);
  }
  config.force = options.force;
  for name in options.always {
    if graph.get(&name).is_none() {
      return Err(ConfigError::UnknownTarget(name).into());
    }
    config.forced.insert(name);
  }

  let _lock =
    StateLock::acquire(&config.state_dir, LockMode::Exclusive, "build").context("Failed to acquire state lock")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(async {
      let interrupt = config.interrupt.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          warn!("interrupted, waiting for running targets");
          interrupt.trigger();
        }
      });
      build(&graph, targets, &config).await
    })
    .context("Build failed")?;

  if output.is_json() {
    print_json(&report_json(&report))?;
  } else {
    print_report(&graph, &report, verbose);
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  if report.interrupted() {
    bail!("Build interrupted");
  }
  if !report.is_success() {
    bail!(
      "Build failed: {} target(s) failed, {} skipped",
      report.failed.len(),
      report.skipped.len()
    );
  }

  Ok(())
}

fn print_report(graph: &BuildGraph, report: &BuildReport, verbose: bool) {
  for (name, result) in &report.executed {
    print_success(&format!("{} ({})", name, format_duration(result.duration)));
  }

  if verbose {
    for name in &report.up_to_date {
      print_info(&format!("{} is up to date", name));
    }
  }

  for (name, err) in &report.failed {
    print_error(&format!("{}: {}", name, err));
    let blocked: Vec<_> = graph
      .dependents(name)
      .into_iter()
      .filter(|dependent| report.skipped.contains_key(*dependent))
      .collect();
    if !blocked.is_empty() {
      eprintln!("    {} blocks {}", symbols::ARROW, blocked.join(", "));
    }
  }

  for (name, reason) in &report.skipped {
    print_warning(&format!("{} skipped: {}", name, reason));
  }

  println!();
  if report.is_success() {
    if report.executed.is_empty() {
      print_success("Everything up to date");
    } else {
      print_success("Build complete!");
    }
  }
  print_stat("Built", &report.executed.len().to_string());
  print_stat("Up to date", &report.up_to_date.len().to_string());
  if !report.failed.is_empty() {
    print_stat("Failed", &report.failed.len().to_string());
  }
  if !report.skipped.is_empty() {
    print_stat("Skipped", &report.skipped.len().to_string());
  }
}

fn report_json(report: &BuildReport) -> serde_json::Value {
  let executed: Vec<_> = report
    .executed
    .iter()
    .map(|(name, result)| {
      serde_json::json!({
        "name": name,
        "duration_ms": result.duration.as_millis() as u64,
        "actions": result.action_results.len(),
      })
    })
    .collect();
  let failed: Vec<_> = report
    .failed
    .iter()
    .map(|(name, err)| serde_json::json!({ "name": name, "error": err.to_string() }))
    .collect();
  let skipped: Vec<_> = report
    .skipped
    .iter()
    .map(|(name, reason)| serde_json::json!({ "name": name, "reason": reason.to_string() }))
    .collect();

  serde_json::json!({
    "success": report.is_success(),
    "interrupted": report.interrupted(),
    "executed": executed,
    "up_to_date": report.up_to_date,
    "groups": report.groups,
    "failed": failed,
    "skipped": skipped,
  })
}
