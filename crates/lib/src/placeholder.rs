//! Placeholder parsing and substitution for template files.
//!
//! Templates are UTF-8 text in which `@NAME@` is replaced by the value bound
//! to `NAME` in the render context.
//!
//! # Syntax
//!
//! - `@NAME@` - placeholder, `NAME` matches `[A-Za-z_][A-Za-z0-9_]*`
//! - `@@` - a literal `@`
//! - any other `@` (e-mail addresses, decorators) passes through unchanged
//!
//! # Unresolved placeholders
//!
//! A placeholder whose name is missing from the context is an error: rendering
//! fails instead of leaving the token in the output.
//!
//! # Example
//!
//! ```
//! use buildchain_lib::placeholder::{parse, Segment};
//!
//! let segments = parse("version: @VERSION@").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("version: ".to_string()),
//!     Segment::Placeholder { name: "VERSION".to_string(), line: 1 },
//! ]);
//! ```

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved, with the 1-based line it appears on.
  Placeholder { name: String, line: usize },
}

/// Errors that can occur during placeholder resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unresolved placeholder @{name}@ on line {line}")]
  Unresolved { name: String, line: usize },
}

/// Source of placeholder values.
pub trait Resolver {
  fn resolve(&self, name: &str) -> Option<&str>;
}

impl Resolver for BTreeMap<String, String> {
  fn resolve(&self, name: &str) -> Option<&str> {
    self.get(name).map(String::as_str)
  }
}

impl Resolver for HashMap<String, String> {
  fn resolve(&self, name: &str) -> Option<&str> {
    self.get(name).map(String::as_str)
  }
}

/// Parse a template into segments.
///
/// Parsing never fails: text that does not form a placeholder is literal.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut line = 1;
  let mut rest = input;

  while let Some(at) = rest.find(['@', '\n']) {
    literal.push_str(&rest[..at]);
    let tail = &rest[at..];

    if tail.starts_with('\n') {
      literal.push('\n');
      line += 1;
      rest = &tail[1..];
      continue;
    }

    if tail.starts_with("@@") {
      literal.push('@');
      rest = &tail[2..];
      continue;
    }

    match placeholder_name(&tail[1..]) {
      Some(name) => {
        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Placeholder {
          name: name.to_string(),
          line,
        });
        // '@' + name + '@'
        rest = &tail[name.len() + 2..];
      }
      None => {
        literal.push('@');
        rest = &tail[1..];
      }
    }
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// If `s` starts with `NAME@`, return `NAME`.
fn placeholder_name(s: &str) -> Option<&str> {
  let mut chars = s.char_indices();
  match chars.next() {
    Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return None,
  }
  for (idx, c) in chars {
    if c == '@' {
      return Some(&s[..idx]);
    }
    if !(c.is_ascii_alphanumeric() || c == '_') {
      return None;
    }
  }
  None
}

/// Substitute every placeholder in `input` using `resolver`.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  let mut output = String::with_capacity(input.len());

  for segment in segments {
    match segment {
      Segment::Literal(text) => output.push_str(&text),
      Segment::Placeholder { name, line } => match resolver.resolve(&name) {
        Some(value) => output.push_str(value),
        None => return Err(PlaceholderError::Unresolved { name, line }),
      },
    }
  }

  Ok(output)
}
