//! Shared utilities.
//!
//! Hashing and atomic output installation.

pub mod atomic;
pub mod hash;
