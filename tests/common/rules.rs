//! Rule-table evaluator mirroring the repository policies.
//!
//! Every rule is named after the violation it detects and returns `true` when
//! the document violates it, matching the convention of the real policy set.

use conformance::evaluator::{Evaluation, EvaluationError, PolicyEvaluator, Verdict};
use conformance::namespace::Namespace;
use conformance::policy_path::PolicyPath;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};

type Rule = fn(&Value) -> bool;

const REPOSITORY_RULES: &[(&str, Rule)] = &[
    ("code_review_not_required", code_review_not_required),
    (
        "code_review_by_two_members_not_required",
        code_review_by_two_members_not_required,
    ),
    ("missing_default_branch_protection", missing_protection),
    (
        "missing_default_branch_protection_deletion",
        deletion_allowed,
    ),
    (
        "missing_default_branch_protection_force_push",
        force_push_allowed,
    ),
    ("non_linear_history", non_linear_history),
    ("pushes_are_not_restricted", pushes_are_not_restricted),
    (
        "requires_branches_up_to_date_before_merge",
        branches_not_up_to_date,
    ),
    ("requires_status_checks", status_checks_missing),
    (
        "code_review_not_limited_to_code_owners",
        code_owners_not_required,
    ),
    ("dismisses_stale_reviews", stale_reviews_kept),
    ("no_signed_commits", no_signed_commits),
    ("no_conversation_resolution", no_conversation_resolution),
    ("review_dismissal_allowed", review_dismissal_allowed),
    ("forking_allowed_for_repository", forking_allowed),
    ("secret_scanning_not_enabled", secret_scanning_not_enabled),
];

#[derive(Debug, Default)]
pub struct RuleTableEvaluator {
    calls: AtomicUsize,
}

impl RuleTableEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn knows(policy: &PolicyPath) -> bool {
        policy.namespace() == Namespace::Repository
            && REPOSITORY_RULES.iter().any(|(name, _)| *name == policy.rule())
    }
}

impl PolicyEvaluator for RuleTableEvaluator {
    fn evaluate(
        &self,
        policy: &PolicyPath,
        document: &Value,
    ) -> Result<Evaluation, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if policy.namespace() != Namespace::Repository {
            return Err(EvaluationError::UnknownPolicy(policy.to_string()));
        }
        let Some((_, rule)) = REPOSITORY_RULES
            .iter()
            .find(|(name, _)| *name == policy.rule())
        else {
            return Err(EvaluationError::UnknownPolicy(policy.to_string()));
        };
        if document.get("repository").is_none() {
            return Err(EvaluationError::MalformedDocument(
                "missing repository object".to_string(),
            ));
        }
        let violated = rule(document);
        let evaluation = Evaluation::new(Verdict::from_violation(violated));
        Ok(if violated {
            evaluation.with_diagnostic(format!("{policy} violated"))
        } else {
            evaluation
        })
    }
}

fn protection(doc: &Value) -> Option<&Value> {
    doc.get("default_branch_protection").filter(|p| !p.is_null())
}

fn protection_flag(doc: &Value, pointer: &str) -> Option<bool> {
    protection(doc)?.pointer(pointer)?.as_bool()
}

fn reviews(doc: &Value) -> Option<&Value> {
    protection(doc)?
        .get("required_pull_request_reviews")
        .filter(|r| !r.is_null())
}

fn review_flag(doc: &Value, key: &str) -> bool {
    reviews(doc)
        .and_then(|r| r.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn approving_reviews(doc: &Value) -> u64 {
    reviews(doc)
        .and_then(|r| r.get("required_approving_review_count"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn missing_protection(doc: &Value) -> bool {
    protection(doc).is_none()
}

fn code_review_not_required(doc: &Value) -> bool {
    approving_reviews(doc) < 1
}

fn code_review_by_two_members_not_required(doc: &Value) -> bool {
    approving_reviews(doc) < 2
}

fn deletion_allowed(doc: &Value) -> bool {
    protection_flag(doc, "/allow_deletions").unwrap_or(true)
}

fn force_push_allowed(doc: &Value) -> bool {
    protection_flag(doc, "/allow_force_pushes").unwrap_or(true)
}

fn non_linear_history(doc: &Value) -> bool {
    !protection_flag(doc, "/required_linear_history").unwrap_or(false)
}

fn pushes_are_not_restricted(doc: &Value) -> bool {
    !protection_flag(doc, "/restrictions_enabled").unwrap_or(false)
}

fn branches_not_up_to_date(doc: &Value) -> bool {
    !protection_flag(doc, "/required_status_checks/strict").unwrap_or(false)
}

fn status_checks_missing(doc: &Value) -> bool {
    protection(doc)
        .and_then(|p| p.pointer("/required_status_checks/contexts"))
        .and_then(Value::as_array)
        .is_none_or(Vec::is_empty)
}

fn code_owners_not_required(doc: &Value) -> bool {
    !review_flag(doc, "require_code_owner_reviews")
}

fn stale_reviews_kept(doc: &Value) -> bool {
    !review_flag(doc, "dismiss_stale_reviews")
}

fn no_signed_commits(doc: &Value) -> bool {
    !protection_flag(doc, "/required_signatures").unwrap_or(false)
}

fn no_conversation_resolution(doc: &Value) -> bool {
    !protection_flag(doc, "/required_conversation_resolution").unwrap_or(false)
}

fn review_dismissal_allowed(doc: &Value) -> bool {
    !review_flag(doc, "dismissal_restrictions_enabled")
}

fn forking_allowed(doc: &Value) -> bool {
    let repo = &doc["repository"];
    repo["is_private"].as_bool().unwrap_or(false)
        && repo["allow_forking"].as_bool().unwrap_or(false)
}

fn secret_scanning_not_enabled(doc: &Value) -> bool {
    let repo = &doc["repository"];
    if repo["is_private"].as_bool().unwrap_or(true) {
        return false;
    }
    repo.pointer("/security_and_analysis/secret_scanning/status")
        .and_then(Value::as_str)
        != Some("enabled")
}
