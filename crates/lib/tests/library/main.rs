//! Library integration tests: whole builds against temporary directories.

mod common;

mod build_tests;
mod image_tests;
mod project_tests;
