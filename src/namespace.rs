//! Closed registry of resource namespaces that policies can target.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A resource kind whose configuration can be policy-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Enterprise,
    Organization,
    Repository,
    Member,
    Actions,
    RunnerGroup,
}

impl Namespace {
    /// Every valid namespace, in registry order.
    pub const ALL: [Self; 6] = [
        Self::Organization,
        Self::Enterprise,
        Self::Repository,
        Self::Member,
        Self::Actions,
        Self::RunnerGroup,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enterprise => "enterprise",
            Self::Organization => "organization",
            Self::Repository => "repository",
            Self::Member => "member",
            Self::Actions => "actions",
            Self::RunnerGroup => "runner_group",
        }
    }

    /// Look up a token after trimming surrounding whitespace. Matching is case-sensitive.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let trimmed = token.trim();
        Self::ALL.into_iter().find(|ns| ns.as_str() == trimmed)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| invalid_namespace(s))
    }
}

fn invalid_namespace(token: &str) -> Error {
    Error::config(format!("invalid namespace {}", token.trim()))
}

/// Check every token against the registry, in input order.
///
/// Returns an error naming the first (trimmed) token that is not a known
/// namespace. An empty input is valid.
pub fn validate_namespaces<S: AsRef<str>>(tokens: &[S]) -> Result<()> {
    for token in tokens {
        let token = token.as_ref();
        if Namespace::parse(token).is_none() {
            return Err(invalid_namespace(token));
        }
    }
    Ok(())
}

/// Ordered string tokens for every namespace.
#[must_use]
pub fn all_tokens() -> Vec<&'static str> {
    Namespace::ALL.iter().map(|ns| ns.as_str()).collect()
}
