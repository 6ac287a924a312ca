//! Aggregate outcome of a conformance run.
//!
//! A report holds no timestamps or run identifiers, so two runs over the same
//! catalog, fixtures and evaluator compare equal.

use crate::evaluator::Verdict;
use crate::policy_path::PolicyPath;
use serde::{Deserialize, Serialize};

/// Which side of a test case a fixture plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureRole {
    /// Must be rejected by the policy.
    Failing,
    /// Must be accepted by the policy.
    Passing,
}

impl FixtureRole {
    #[must_use]
    pub const fn expected(self) -> Verdict {
        match self {
            Self::Failing => Verdict::NonCompliant,
            Self::Passing => Verdict::Compliant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssertionResult {
    Passed,
    Mismatch {
        actual: Verdict,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagnostic: Option<String>,
    },
    /// The evaluator errored or timed out on every attempt.
    Infrastructure { detail: String, attempts: u32 },
}

/// One (policy, fixture) check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub fixture: String,
    pub role: FixtureRole,
    pub expected: Verdict,
    pub result: AssertionResult,
}

impl AssertionOutcome {
    #[must_use]
    pub fn new(fixture: impl Into<String>, role: FixtureRole, result: AssertionResult) -> Self {
        Self {
            fixture: fixture.into(),
            role,
            expected: role.expected(),
            result,
        }
    }

    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.result, AssertionResult::Passed)
    }
}

/// A fixture that could not be loaded; the case made no assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub fixture: String,
    pub role: FixtureRole,
    pub detail: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub policy_path: PolicyPath,
    pub failed_entity: String,
    pub passed_entity: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolution_failures: Vec<ResolutionFailure>,
    #[serde(default)]
    pub assertions: Vec<AssertionOutcome>,
}

impl CaseOutcome {
    /// Both assertions ran and both held.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.resolution_failures.is_empty()
            && self.assertions.len() == 2
            && self.assertions.iter().all(AssertionOutcome::passed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AssertionMismatch,
    Resolution,
    Infrastructure,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AssertionMismatch => "assertion_mismatch",
            Self::Resolution => "resolution",
            Self::Infrastructure => "infrastructure",
        }
    }
}

/// Flattened failure row: policy, fixture, expected verdict, and what happened instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub policy_path: PolicyPath,
    pub fixture: String,
    pub expected: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStats {
    pub total_cases: usize,
    pub passed_cases: usize,
    pub total_assertions: usize,
    pub passed_assertions: usize,
    pub assertion_mismatches: usize,
    pub resolution_errors: usize,
    pub infrastructure_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub catalog_digest: String,
    pub stats: ReportStats,
    pub cases: Vec<CaseOutcome>,
    pub failures: Vec<Failure>,
}

impl Report {
    /// Assemble a report from per-case outcomes already in catalog order.
    #[must_use]
    pub fn from_cases(catalog_digest: impl Into<String>, cases: Vec<CaseOutcome>) -> Self {
        let mut stats = ReportStats {
            total_cases: cases.len(),
            ..ReportStats::default()
        };
        let mut failures = Vec::new();

        for case in &cases {
            if case.passed() {
                stats.passed_cases += 1;
            }
            for resolution in &case.resolution_failures {
                stats.resolution_errors += 1;
                failures.push(Failure {
                    kind: FailureKind::Resolution,
                    policy_path: case.policy_path.clone(),
                    fixture: resolution.fixture.clone(),
                    expected: resolution.role.expected(),
                    actual: None,
                    detail: Some(resolution.detail.clone()),
                });
            }
            for assertion in &case.assertions {
                stats.total_assertions += 1;
                let (kind, actual, detail) = match &assertion.result {
                    AssertionResult::Passed => {
                        stats.passed_assertions += 1;
                        continue;
                    }
                    AssertionResult::Mismatch { actual, diagnostic } => {
                        stats.assertion_mismatches += 1;
                        (FailureKind::AssertionMismatch, Some(*actual), diagnostic.clone())
                    }
                    AssertionResult::Infrastructure { detail, .. } => {
                        stats.infrastructure_errors += 1;
                        (FailureKind::Infrastructure, None, Some(detail.clone()))
                    }
                };
                failures.push(Failure {
                    kind,
                    policy_path: case.policy_path.clone(),
                    fixture: assertion.fixture.clone(),
                    expected: assertion.expected,
                    actual,
                    detail,
                });
            }
        }

        Self {
            catalog_digest: catalog_digest.into(),
            stats,
            cases,
            failures,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Process exit code: 0 when every assertion passed, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    #[must_use]
    pub fn case(&self, policy_path: &PolicyPath) -> Option<&CaseOutcome> {
        self.cases.iter().find(|c| &c.policy_path == policy_path)
    }
}
