//! Runners for individual action kinds.
//!
//! - [`cmd`] - external commands, with optional staged output and digest check
//! - [`fs`] - directory creation, copies, template renders and fixed content
//! - [`registry`] - nginx static-registry configuration

pub mod cmd;
pub mod fs;
pub mod registry;
