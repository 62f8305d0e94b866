//! buildchain-lib: Core types and logic for buildchain
//!
//! This crate provides the pieces of the build engine:
//! - `Target`: declarative build units that produce files
//! - `Action`: the file operations and commands a target runs
//! - `BuildGraph`: the validated dependency graph of targets
//! - `FingerprintStore`: persisted records used for up-to-date checks

pub mod action;
pub mod config;
pub mod consts;
pub mod execute;
pub mod fingerprint;
pub mod placeholder;
pub mod store_lock;
pub mod target;
pub mod util;
