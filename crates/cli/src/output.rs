//! Terminal and JSON output for the CLI.
//!
//! Status lines go to stdout, problems to stderr. Colors are only used when
//! the stream supports them.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{AnsiColors, OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Compact duration for build summaries: `850ms`, `2.35s`, `3m 12s`.
pub fn format_duration(duration: Duration) -> String {
  match (duration.as_secs(), duration.subsec_millis()) {
    (0, ms) => format!("{ms}ms"),
    (s @ 1..=59, ms) => format!("{s}.{:02}s", ms / 10),
    (s, _) => format!("{}m {}s", s / 60, s % 60),
  }
}

fn status_line(to_stderr: bool, symbol: &str, color: AnsiColors, message: &str, tint_message: bool) {
  let stream = || if to_stderr { Stream::Stderr } else { Stream::Stdout };
  let symbol = symbol.if_supports_color(stream(), |s| s.color(color));
  let line = if tint_message {
    format!("{} {}", symbol, message.if_supports_color(stream(), |s| s.color(color)))
  } else {
    format!("{symbol} {message}")
  };

  if to_stderr {
    eprintln!("{line}");
  } else {
    println!("{line}");
  }
}

pub fn print_success(message: &str) {
  status_line(false, symbols::SUCCESS, AnsiColors::Green, message, false);
}

pub fn print_info(message: &str) {
  status_line(false, symbols::INFO, AnsiColors::Blue, message, false);
}

pub fn print_warning(message: &str) {
  status_line(true, symbols::WARNING, AnsiColors::Yellow, message, true);
}

/// Print an error. Continuation lines (captured stderr of a failed command)
/// are dimmed and indented under the first.
pub fn print_error(message: &str) {
  let (first, rest) = message.split_once('\n').unwrap_or((message, ""));
  status_line(true, symbols::ERROR, AnsiColors::Red, first, true);
  for line in rest.lines() {
    eprintln!("    {}", line.if_supports_color(Stream::Stderr, |s| s.dimmed()));
  }
}

/// An indented `label: value` summary line.
pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize output as JSON")?;
  println!("{json}");
  Ok(())
}
