//! Implementation of the `buildchain list` command.
//!
//! Prints every target in build order with its documentation and whether it
//! is currently up to date.

use std::path::Path;

use anyhow::{Context, Result};

use buildchain_lib::execute::is_up_to_date;
use buildchain_lib::fingerprint::FingerprintStore;
use buildchain_lib::store_lock::{LockMode, StateLock};

use crate::output::{OutputFormat, print_json, symbols};

pub fn cmd_list(file: &Path, output: OutputFormat) -> Result<()> {
  let project = super::load_project(file)?;
  let graph = project.graph().context("Invalid build graph")?;
  let config = project.execute_config();

  let _lock = StateLock::acquire(&config.state_dir, LockMode::Shared, "list").context("Failed to acquire state lock")?;
  let store = FingerprintStore::load(&config.state_dir);

  let targets = graph.topological();

  if output.is_json() {
    let items: Vec<_> = targets
      .iter()
      .map(|decl| {
        serde_json::json!({
          "name": decl.name,
          "doc": decl.doc,
          "outputs": decl.outputs,
          "dependencies": graph.dependencies(&decl.name),
          "up_to_date": is_up_to_date(decl, &store),
        })
      })
      .collect();
    print_json(&serde_json::json!({ "count": items.len(), "targets": items }))?;
    return Ok(());
  }

  for decl in targets {
    let marker = if decl.is_group() {
      " "
    } else if is_up_to_date(decl, &store) {
      symbols::SUCCESS
    } else {
      symbols::INFO
    };

    if decl.doc.is_empty() {
      println!("{} {}", marker, decl.name);
    } else {
      println!("{} {:<40} {}", marker, decl.name, decl.doc);
    }
  }

  Ok(())
}
