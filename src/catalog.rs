//! Conformance catalog: which fixtures each policy must reject and accept.
//!
//! A catalog is loaded once, validated as a whole, and then only read. Loading
//! fails fast on the first bad entry so a broken catalog never produces a
//! partial report.

use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::policy_path::PolicyPath;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

pub const CATALOG_SCHEMA: &str = "conformance.catalog.v1";
pub const CATALOG_VERSION: u32 = 1;

const BUILTIN_CATALOG_JSON: &str = include_str!("../catalog/builtin.json");

/// One conformance entry: a policy plus one fixture it must reject and one it
/// must accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub policy_path: PolicyPath,
    pub failed_entity: String,
    pub passed_entity: String,
}

impl TestCase {
    pub fn new(
        policy_path: &str,
        failed_entity: impl Into<String>,
        passed_entity: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            policy_path: PolicyPath::parse(policy_path)?,
            failed_entity: failed_entity.into(),
            passed_entity: passed_entity.into(),
        })
    }

    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        self.policy_path.namespace()
    }

    fn validate(&self) -> Result<()> {
        if self.failed_entity.trim().is_empty() {
            return Err(Error::config(format!(
                "{}: failed_entity must not be empty",
                self.policy_path
            )));
        }
        if self.passed_entity.trim().is_empty() {
            return Err(Error::config(format!(
                "{}: passed_entity must not be empty",
                self.policy_path
            )));
        }
        if self.failed_entity == self.passed_entity {
            return Err(Error::config(format!(
                "{}: failed_entity and passed_entity are both {:?}",
                self.policy_path, self.failed_entity
            )));
        }
        Ok(())
    }
}

/// On-disk shape. Policy paths stay raw strings here so a bad entry can be
/// reported with its position.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    schema: String,
    version: u32,
    #[serde(default)]
    cases: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogEntry {
    policy_path: String,
    failed_entity: String,
    passed_entity: String,
}

#[derive(Serialize)]
struct CatalogDocumentRef<'a> {
    schema: &'static str,
    version: u32,
    cases: &'a [TestCase],
}

/// Validated, ordered list of test cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    cases: Vec<TestCase>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate policy paths and inconsistent entries.
    pub fn new(cases: Vec<TestCase>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(cases.len());
        for case in &cases {
            case.validate()?;
            if !seen.insert(&case.policy_path) {
                return Err(Error::config(format!(
                    "duplicate catalog entry for {}",
                    case.policy_path
                )));
            }
        }
        Ok(Self { cases })
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG_JSON)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let document: CatalogDocument = serde_json::from_str(text)
            .map_err(|e| Error::config(format!("Failed to parse catalog: {e}")))?;
        if document.schema != CATALOG_SCHEMA {
            return Err(Error::config(format!(
                "Unsupported catalog schema: {}",
                document.schema
            )));
        }
        if document.version != CATALOG_VERSION {
            return Err(Error::config(format!(
                "Unsupported catalog version: {}",
                document.version
            )));
        }

        let mut cases = Vec::with_capacity(document.cases.len());
        for (index, entry) in document.cases.into_iter().enumerate() {
            let policy_path = PolicyPath::parse(&entry.policy_path)
                .map_err(|e| Error::config(format!("catalog entry #{index}: {}", e.detail())))?;
            cases.push(TestCase {
                policy_path,
                failed_entity: entry.failed_entity,
                passed_entity: entry.passed_entity,
            });
        }
        let catalog = Self::new(cases)?;
        tracing::debug!(cases = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read catalog {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
            .map_err(|e| Error::config(format!("{}\n\nFile: {}", e.detail(), path.display())))
    }

    #[must_use]
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    #[must_use]
    pub fn get(&self, policy_path: &PolicyPath) -> Option<&TestCase> {
        self.cases.iter().find(|case| &case.policy_path == policy_path)
    }

    /// Namespaces that have at least one case, in registry order.
    #[must_use]
    pub fn namespaces(&self) -> Vec<Namespace> {
        let present: BTreeSet<Namespace> = self.cases.iter().map(TestCase::namespace).collect();
        Namespace::ALL
            .into_iter()
            .filter(|ns| present.contains(ns))
            .collect()
    }

    /// Sub-catalog restricted to `namespaces`, keeping the original order.
    /// An empty selection keeps everything.
    #[must_use]
    pub fn filter_namespaces(&self, namespaces: &[Namespace]) -> Self {
        if namespaces.is_empty() {
            return self.clone();
        }
        Self {
            cases: self
                .cases
                .iter()
                .filter(|case| namespaces.contains(&case.namespace()))
                .cloned()
                .collect(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&CatalogDocumentRef {
            schema: CATALOG_SCHEMA,
            version: CATALOG_VERSION,
            cases: &self.cases,
        })?)
    }

    /// SHA-256 over the canonical encoding of the cases.
    pub fn digest(&self) -> Result<String> {
        let encoded = serde_json::to_vec(&self.cases)?;
        Ok(format!("{:x}", sha2::Sha256::digest(&encoded)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn case(path: &str, failed: &str, passed: &str) -> TestCase {
        TestCase::new(path, failed, passed).expect("valid case")
    }

    #[test]
    fn builtin_catalog_loads() {
        let catalog = Catalog::builtin().expect("builtin catalog");
        assert_eq!(catalog.len(), 16);
        assert_eq!(catalog.namespaces(), vec![Namespace::Repository]);

        let signed = PolicyPath::parse("data.repository.no_signed_commits").unwrap();
        let entry = catalog.get(&signed).expect("no_signed_commits entry");
        assert_eq!(entry.failed_entity, "bad_branch_protection");
        assert_eq!(entry.passed_entity, "good_branch_protection");

        let scanning = PolicyPath::parse("data.repository.secret_scanning_not_enabled").unwrap();
        let entry = catalog.get(&scanning).expect("secret scanning entry");
        assert_eq!(entry.failed_entity, "bad_public_repo");
        assert_eq!(entry.passed_entity, "good_public_repo");
    }

    #[test]
    fn builtin_catalog_order_is_preserved() {
        let catalog = Catalog::builtin().unwrap();
        let first = &catalog.cases()[0];
        assert_eq!(
            first.policy_path.to_string(),
            "data.repository.code_review_not_required"
        );
        let last = catalog.cases().last().unwrap();
        assert_eq!(
            last.policy_path.to_string(),
            "data.repository.secret_scanning_not_enabled"
        );
    }

    #[test]
    fn duplicate_policy_paths_are_rejected() {
        let err = Catalog::new(vec![
            case("data.repository.non_linear_history", "bad", "good"),
            case("data.repository.non_linear_history", "worse", "better"),
        ])
        .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("duplicate catalog entry"));
    }

    #[test]
    fn same_rule_in_different_namespaces_is_allowed() {
        let catalog = Catalog::new(vec![
            case("data.repository.two_factor", "bad", "good"),
            case("data.organization.two_factor", "bad", "good"),
        ])
        .unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn identical_fixtures_are_rejected() {
        let err = Catalog::new(vec![case("data.member.stale", "same", "same")]).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn empty_fixture_names_are_rejected() {
        let err = Catalog::new(vec![case("data.member.stale", " ", "good")]).unwrap_err();
        assert!(err.to_string().contains("failed_entity must not be empty"));
        let err = Catalog::new(vec![case("data.member.stale", "bad", "")]).unwrap_err();
        assert!(err.to_string().contains("passed_entity must not be empty"));
    }

    #[test]
    fn unknown_namespace_fails_the_whole_load() {
        let text = r#"{
            "schema": "conformance.catalog.v1",
            "version": 1,
            "cases": [
                {"policy_path": "data.repository.ok", "failed_entity": "a", "passed_entity": "b"},
                {"policy_path": "data.unknown_namespace.rule", "failed_entity": "a", "passed_entity": "b"}
            ]
        }"#;
        let err = Catalog::from_json(text).unwrap_err();
        assert!(err.is_config());
        let message = err.to_string();
        assert!(message.contains("catalog entry #1"), "{message}");
        assert!(message.contains("unknown_namespace"), "{message}");
    }

    #[test]
    fn schema_and_version_are_checked() {
        let err = Catalog::from_json(r#"{"schema": "other", "version": 1}"#).unwrap_err();
        assert!(err.to_string().contains("Unsupported catalog schema"));
        let err = Catalog::from_json(r#"{"schema": "conformance.catalog.v1", "version": 9}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported catalog version"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = r#"{
            "schema": "conformance.catalog.v1",
            "version": 1,
            "cases": [
                {"path": "data.repository.ok", "failed_entity": "a", "passed_entity": "b"}
            ]
        }"#;
        assert!(Catalog::from_json(text).unwrap_err().is_config());
    }

    #[test]
    fn filter_keeps_order_and_selection() {
        let catalog = Catalog::new(vec![
            case("data.repository.a", "bad", "good"),
            case("data.organization.b", "bad", "good"),
            case("data.repository.c", "bad", "good"),
            case("data.actions.d", "bad", "good"),
        ])
        .unwrap();

        let repo = catalog.filter_namespaces(&[Namespace::Repository]);
        let rules: Vec<_> = repo.cases().iter().map(|c| c.policy_path.rule()).collect();
        assert_eq!(rules, vec!["a", "c"]);

        assert_eq!(catalog.filter_namespaces(&[]), catalog);
        assert!(catalog.filter_namespaces(&[Namespace::Member]).is_empty());
        assert_eq!(
            catalog.namespaces(),
            vec![
                Namespace::Organization,
                Namespace::Repository,
                Namespace::Actions
            ]
        );
    }

    #[test]
    fn serialized_catalog_reloads_identically() {
        let catalog = Catalog::builtin().unwrap();
        let text = catalog.to_json_pretty().unwrap();
        let reloaded = Catalog::from_json(&text).unwrap();
        assert_eq!(reloaded, catalog);
        assert_eq!(reloaded.digest().unwrap(), catalog.digest().unwrap());
    }

    #[test]
    fn digest_changes_with_content() {
        let a = Catalog::new(vec![case("data.repository.a", "bad", "good")]).unwrap();
        let b = Catalog::new(vec![case("data.repository.a", "bad", "better")]).unwrap();
        assert_eq!(a.digest().unwrap().len(), 64);
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }
}
