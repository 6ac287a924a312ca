//! Dotted policy identifiers of the form `data.<namespace>.<rule>`.

use crate::error::{Error, Result};
use crate::namespace::Namespace;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

const POLICY_ROOT: &str = "data";

static POLICY_PATH_REGEX: OnceLock<Regex> = OnceLock::new();

fn policy_path_regex() -> &'static Regex {
    POLICY_PATH_REGEX
        .get_or_init(|| Regex::new(r"^data\.([^.\s]+)\.(\S+)$").expect("policy path regex"))
}

/// Location of one checkable rule in the evaluator's catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyPath {
    namespace: Namespace,
    rule: String,
}

impl PolicyPath {
    /// Parse and validate a policy path.
    ///
    /// Fails with a configuration error when the path does not look like
    /// `data.<namespace>.<rule>` or when the namespace segment is unknown.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some(captures) = policy_path_regex().captures(raw) else {
            return Err(Error::config(format!(
                "malformed policy path {raw:?}: expected {POLICY_ROOT}.<namespace>.<rule>"
            )));
        };
        let namespace = captures[1]
            .parse::<Namespace>()
            .map_err(|err| Error::config(format!("policy path {raw:?}: {}", err.detail())))?;
        Self::new(namespace, &captures[2])
    }

    /// Build a path from its parts, applying the same rule checks as [`Self::parse`].
    pub fn new(namespace: Namespace, rule: impl Into<String>) -> Result<Self> {
        let rule = rule.into();
        if let Some(problem) = rule_problem(&rule) {
            return Err(Error::config(format!(
                "malformed policy path \"{POLICY_ROOT}.{namespace}.{rule}\": {problem}"
            )));
        }
        Ok(Self { namespace, rule })
    }

    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        self.namespace
    }

    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }
}

fn rule_problem(rule: &str) -> Option<&'static str> {
    if rule.is_empty() {
        Some("empty rule")
    } else if rule.chars().any(char::is_whitespace) {
        Some("whitespace in rule")
    } else if rule.split('.').any(str::is_empty) {
        Some("empty rule segment")
    } else {
        None
    }
}

impl fmt::Display for PolicyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{POLICY_ROOT}.{}.{}", self.namespace, self.rule)
    }
}

impl FromStr for PolicyPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PolicyPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PolicyPath> for String {
    fn from(value: PolicyPath) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repository_rule() {
        let path = PolicyPath::parse("data.repository.no_signed_commits").unwrap();
        assert_eq!(path.namespace(), Namespace::Repository);
        assert_eq!(path.rule(), "no_signed_commits");
        assert_eq!(path.to_string(), "data.repository.no_signed_commits");
    }

    #[test]
    fn runner_group_namespace_parses() {
        let path = PolicyPath::parse(
            "data.runner_group.runner_group_can_be_used_by_public_repositories",
        )
        .unwrap();
        assert_eq!(path.namespace(), Namespace::RunnerGroup);
    }

    #[test]
    fn unknown_namespace_is_a_config_error() {
        let err = PolicyPath::parse("data.unknown_namespace.rule").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("invalid namespace unknown_namespace"));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for raw in [
            "",
            "data",
            "data.repository",
            "data.repository.",
            "data..rule",
            "policy.repository.rule",
            "data.repository.rule with space",
            " data.repository.rule",
            "data.repository.a..b",
            "data.repository.rule.",
        ] {
            let err = PolicyPath::parse(raw).unwrap_err();
            assert!(err.is_config(), "expected config error for {raw:?}");
        }
    }

    #[test]
    fn parts_are_checked_like_parsed_paths() {
        for rule in ["", "rule with space", "a..b", "rule.", ".rule", "tab\there"] {
            let err = PolicyPath::new(Namespace::Repository, rule).unwrap_err();
            assert!(err.is_config(), "expected config error for {rule:?}");
        }
        let path = PolicyPath::new(Namespace::Repository, "nested.rule").unwrap();
        assert_eq!(PolicyPath::parse(&path.to_string()).unwrap(), path);
    }

    #[test]
    fn serde_round_trips_as_plain_string() {
        let path =
            PolicyPath::new(Namespace::Actions, "all_repositories_can_run_github_actions").unwrap();
        let encoded = serde_json::to_string(&path).unwrap();
        assert_eq!(
            encoded,
            "\"data.actions.all_repositories_can_run_github_actions\""
        );
        let decoded: PolicyPath = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn serde_rejects_unknown_namespace() {
        let result = serde_json::from_str::<PolicyPath>("\"data.nope.rule\"");
        assert!(result.is_err());
    }
}
