//! Fixture resolution: turning a fixture name into the configuration document
//! the evaluator consumes.
//!
//! Fixture names are scoped per namespace. `bad_branch_protection` under
//! `repository` and under `organization` are different documents.

use crate::namespace::Namespace;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FIXTURE_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("fixture {namespace}/{name} not found")]
    NotFound { namespace: Namespace, name: String },

    /// The store hiccuped; the same lookup may succeed if retried.
    #[error("fixture {namespace}/{name} temporarily unavailable: {message}")]
    Transient {
        namespace: Namespace,
        name: String,
        message: String,
    },

    #[error("fixture {namespace}/{name} is unreadable: {message}")]
    Invalid {
        namespace: Namespace,
        name: String,
        message: String,
    },
}

impl ResolveError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Source of fixture documents. Implementations must tolerate concurrent calls.
pub trait FixtureResolver: Send + Sync {
    fn resolve(&self, namespace: Namespace, name: &str) -> Result<Value, ResolveError>;
}

/// Reads `<root>/<namespace>/<name>.json`, falling back to `<root>/<name>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryFixtureResolver {
    root: PathBuf,
}

impl DirectoryFixtureResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, namespace: Namespace, name: &str) -> [PathBuf; 2] {
        let file = format!("{name}.{FIXTURE_EXTENSION}");
        [
            self.root.join(namespace.as_str()).join(&file),
            self.root.join(file),
        ]
    }
}

impl FixtureResolver for DirectoryFixtureResolver {
    fn resolve(&self, namespace: Namespace, name: &str) -> Result<Value, ResolveError> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ResolveError::Invalid {
                namespace,
                name: name.to_string(),
                message: "fixture names must not contain path separators".to_string(),
            });
        }

        for path in self.candidates(namespace, name) {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_error(namespace, name, &path, &err)),
            };
            tracing::debug!(path = %path.display(), "fixture resolved");
            return serde_json::from_str(&text).map_err(|e| ResolveError::Invalid {
                namespace,
                name: name.to_string(),
                message: format!("{}: {e}", path.display()),
            });
        }

        Err(ResolveError::NotFound {
            namespace,
            name: name.to_string(),
        })
    }
}

fn io_error(namespace: Namespace, name: &str, path: &Path, err: &std::io::Error) -> ResolveError {
    let message = format!("{}: {err}", path.display());
    match err.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            ResolveError::Transient {
                namespace,
                name: name.to_string(),
                message,
            }
        }
        _ => ResolveError::Invalid {
            namespace,
            name: name.to_string(),
            message,
        },
    }
}

/// In-memory fixture store.
#[derive(Debug, Clone, Default)]
pub struct StaticFixtureResolver {
    fixtures: HashMap<(Namespace, String), Value>,
}

impl StaticFixtureResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, namespace: Namespace, name: impl Into<String>, document: Value) -> Self {
        self.insert(namespace, name, document);
        self
    }

    pub fn insert(&mut self, namespace: Namespace, name: impl Into<String>, document: Value) {
        self.fixtures.insert((namespace, name.into()), document);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

impl FixtureResolver for StaticFixtureResolver {
    fn resolve(&self, namespace: Namespace, name: &str) -> Result<Value, ResolveError> {
        self.fixtures
            .get(&(namespace, name.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                namespace,
                name: name.to_string(),
            })
    }
}
