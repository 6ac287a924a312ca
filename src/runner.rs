//! Conformance runner: executes every catalog case against the evaluator.
//!
//! Cases are independent. A bounded pool of scoped worker threads pulls case
//! indices from a lock-free queue and sends finished outcomes back over a
//! channel; the report is assembled in catalog order once every worker is done.
//!
//! Each case resolves both fixtures first. If either one is missing the case
//! records a resolution failure and makes no assertions. Otherwise the policy
//! is evaluated against the failing fixture (expecting `non_compliant`) and the
//! passing fixture (expecting `compliant`).

use crate::catalog::{Catalog, TestCase};
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::evaluator::{Evaluation, EvaluationError, PolicyEvaluator};
use crate::fixture::FixtureResolver;
use crate::namespace::Namespace;
use crate::policy_path::PolicyPath;
use crate::report::{
    AssertionOutcome, AssertionResult, CaseOutcome, FixtureRole, Report, ResolutionFailure,
};
use crossbeam_queue::ArrayQueue;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a single evaluator invocation produced no verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("{0}")]
    Evaluation(EvaluationError),

    #[error("evaluator timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// A serialized evaluator was still running an earlier call when the wait ran out.
    #[error("evaluator busy with an earlier call for {}ms", .0.as_millis())]
    Busy(Duration),

    #[error("evaluator thread exited without a result")]
    Panicked,

    #[error("failed to start evaluator thread: {0}")]
    Spawn(String),
}

const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Extra wait after a timeout for evaluators that enforce the same deadline
/// themselves and need to kill their child process.
const TIMEOUT_CLEANUP_GRACE: Duration = Duration::from_millis(100);

/// Released by the evaluation thread once `evaluate` returns, even on panic.
struct BusyRelease(Arc<AtomicBool>);

impl Drop for BusyRelease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serializes evaluator calls when the evaluator is not concurrency-safe and
/// enforces the per-call timeout.
///
/// The busy flag is owned by the thread running `evaluate`, not by the
/// caller, so a call that outlives its timeout still blocks the next one
/// until it actually returns.
struct EvaluationGate {
    busy: Option<Arc<AtomicBool>>,
    timeout: Duration,
}

impl EvaluationGate {
    fn new(serialize: bool, timeout: Duration) -> Self {
        Self {
            busy: serialize.then(|| Arc::new(AtomicBool::new(false))),
            timeout,
        }
    }

    /// Wait up to the call timeout for the evaluator to become free.
    fn acquire(&self) -> std::result::Result<Option<BusyRelease>, InvocationError> {
        let Some(busy) = &self.busy else {
            return Ok(None);
        };
        let deadline = Instant::now() + self.timeout;
        loop {
            if busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(Some(BusyRelease(Arc::clone(busy))));
            }
            if Instant::now() >= deadline {
                return Err(InvocationError::Busy(self.timeout));
            }
            thread::sleep(BUSY_POLL_INTERVAL);
        }
    }

    fn invoke(
        &self,
        evaluator: &Arc<dyn PolicyEvaluator>,
        policy: &PolicyPath,
        document: &Arc<Value>,
    ) -> std::result::Result<Evaluation, InvocationError> {
        let release = self.acquire()?;

        let (tx, rx) = mpsc::sync_channel(1);
        let evaluator = Arc::clone(evaluator);
        let thread_policy = policy.clone();
        let document = Arc::clone(document);
        // On spawn failure the closure is dropped, which frees the gate.
        thread::Builder::new()
            .name("policy-eval".to_string())
            .spawn(move || {
                let result = evaluator.evaluate(&thread_policy, &document);
                drop(release);
                let _ = tx.send(result);
            })
            .map_err(|e| InvocationError::Spawn(e.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result.map_err(InvocationError::Evaluation),
            Err(RecvTimeoutError::Timeout) => {
                let _ = rx.recv_timeout(TIMEOUT_CLEANUP_GRACE);
                warn!(policy = %policy, timeout = ?self.timeout, "evaluator call timed out");
                Err(InvocationError::TimedOut(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(InvocationError::Panicked),
        }
    }
}

/// Runs catalogs against one evaluator and one fixture resolver.
pub struct ConformanceRunner {
    evaluator: Arc<dyn PolicyEvaluator>,
    resolver: Arc<dyn FixtureResolver>,
    config: RunnerConfig,
}

impl ConformanceRunner {
    pub fn new(
        evaluator: Arc<dyn PolicyEvaluator>,
        resolver: Arc<dyn FixtureResolver>,
        config: RunnerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            evaluator,
            resolver,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Execute every case in `catalog`.
    ///
    /// Only catalog-level problems return `Err`; per-case failures are
    /// collected into the report.
    pub fn run(&self, catalog: &Catalog) -> Result<Report> {
        let digest = catalog.digest()?;
        let cases = catalog.cases();
        if cases.is_empty() {
            info!("catalog is empty; nothing to run");
            return Ok(Report::from_cases(digest, Vec::new()));
        }

        let serialize = !self.evaluator.is_concurrency_safe();
        let gate = EvaluationGate::new(serialize, self.config.evaluation_timeout());
        let workers = self.config.concurrency.min(cases.len());
        info!(
            cases = cases.len(),
            workers,
            serialized = serialize,
            "starting conformance run"
        );

        let queue = ArrayQueue::new(cases.len());
        for index in 0..cases.len() {
            // Capacity equals the case count, so this cannot overflow.
            let _ = queue.push(index);
        }

        let mut slots: Vec<Option<CaseOutcome>> = vec![None; cases.len()];
        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<(usize, CaseOutcome)>();
            for worker in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                let gate = &gate;
                scope.spawn(move || {
                    while let Some(index) = queue.pop() {
                        debug!(worker, index, "picked case");
                        let outcome = self.run_case(&cases[index], gate);
                        if tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);
            for (index, outcome) in rx {
                slots[index] = Some(outcome);
            }
        });

        let outcomes = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::validation("worker pool finished without every case outcome"))?;
        let report = Report::from_cases(digest, outcomes);
        info!(
            cases = report.stats.total_cases,
            passed_cases = report.stats.passed_cases,
            assertions = report.stats.total_assertions,
            mismatches = report.stats.assertion_mismatches,
            resolution_errors = report.stats.resolution_errors,
            infrastructure_errors = report.stats.infrastructure_errors,
            "conformance run finished"
        );
        Ok(report)
    }

    fn run_case(&self, case: &TestCase, gate: &EvaluationGate) -> CaseOutcome {
        let namespace = case.namespace();
        let mut outcome = CaseOutcome {
            policy_path: case.policy_path.clone(),
            failed_entity: case.failed_entity.clone(),
            passed_entity: case.passed_entity.clone(),
            resolution_failures: Vec::new(),
            assertions: Vec::new(),
        };

        let mut documents = Vec::with_capacity(2);
        for (fixture, role) in [
            (&case.failed_entity, FixtureRole::Failing),
            (&case.passed_entity, FixtureRole::Passing),
        ] {
            match self.resolve_with_retry(namespace, fixture) {
                Ok(document) => documents.push((fixture, role, Arc::new(document))),
                Err((detail, attempts)) => {
                    warn!(
                        policy = %case.policy_path,
                        fixture = %fixture,
                        %detail,
                        "fixture resolution failed"
                    );
                    outcome.resolution_failures.push(ResolutionFailure {
                        fixture: fixture.clone(),
                        role,
                        detail,
                        attempts,
                    });
                }
            }
        }
        if !outcome.resolution_failures.is_empty() {
            return outcome;
        }

        for (fixture, role, document) in documents {
            let result = self.assert_verdict(&case.policy_path, fixture, role, &document, gate);
            outcome
                .assertions
                .push(AssertionOutcome::new(fixture.clone(), role, result));
        }
        outcome
    }

    fn assert_verdict(
        &self,
        policy: &PolicyPath,
        fixture: &str,
        role: FixtureRole,
        document: &Arc<Value>,
        gate: &EvaluationGate,
    ) -> AssertionResult {
        let expected = role.expected();
        match self.evaluate_with_retry(policy, document, gate) {
            Ok(evaluation) if evaluation.verdict == expected => {
                debug!(
                    policy = %policy,
                    fixture,
                    verdict = %evaluation.verdict,
                    "assertion passed"
                );
                AssertionResult::Passed
            }
            Ok(evaluation) => {
                warn!(
                    policy = %policy,
                    fixture,
                    expected = %expected,
                    actual = %evaluation.verdict,
                    "assertion mismatch"
                );
                AssertionResult::Mismatch {
                    actual: evaluation.verdict,
                    diagnostic: evaluation.diagnostic,
                }
            }
            Err((err, attempts)) => {
                warn!(policy = %policy, fixture, attempts, "evaluation failed: {err}");
                AssertionResult::Infrastructure {
                    detail: err.to_string(),
                    attempts,
                }
            }
        }
    }

    fn evaluate_with_retry(
        &self,
        policy: &PolicyPath,
        document: &Arc<Value>,
        gate: &EvaluationGate,
    ) -> std::result::Result<Evaluation, (InvocationError, u32)> {
        let max_attempts = self.config.evaluator_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match gate.invoke(&self.evaluator, policy, document) {
                Ok(evaluation) => return Ok(evaluation),
                Err(err) if attempt < max_attempts => {
                    warn!(policy = %policy, attempt, "retrying evaluation: {err}");
                    thread::sleep(self.config.backoff(attempt));
                    attempt += 1;
                }
                Err(err) => return Err((err, attempt)),
            }
        }
    }

    fn resolve_with_retry(
        &self,
        namespace: Namespace,
        fixture: &str,
    ) -> std::result::Result<Value, (String, u32)> {
        let max_attempts = self.config.resolve_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.resolver.resolve(namespace, fixture) {
                Ok(document) => return Ok(document),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(%namespace, fixture, attempt, "retrying fixture resolution: {err}");
                    thread::sleep(self.config.backoff(attempt));
                    attempt += 1;
                }
                Err(err) => return Err((err.to_string(), attempt)),
            }
        }
    }
}
