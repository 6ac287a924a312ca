//! Shared test infrastructure for the conformance harness.
//!
//! - [`RuleTableEvaluator`]: an in-process stand-in for the policy engine that
//!   implements the repository rules over the fixture schema in
//!   `tests/fixtures/`.
//! - Paths and temp-copy helpers for the fixture tree.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub mod rules;

#[allow(unused_imports)]
pub use rules::RuleTableEvaluator;

pub fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn fixtures_root() -> PathBuf {
    project_root().join("tests/fixtures")
}

/// Copy the fixture tree into a fresh temp directory so a test can damage it.
pub fn copy_fixtures() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");
    copy_dir(&fixtures_root(), dir.path());
    dir
}

fn copy_dir(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).expect("create fixture dir");
    for entry in std::fs::read_dir(from).expect("read fixture dir") {
        let entry = entry.expect("fixture dir entry");
        let target = to.join(entry.file_name());
        if entry.file_type().expect("file type").is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).expect("copy fixture");
        }
    }
}
