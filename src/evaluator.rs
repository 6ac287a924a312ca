//! Policy evaluator seam and the external-command adapter.
//!
//! The policy language lives outside this crate. The runner only needs a
//! verdict per (policy, document) pair, which [`PolicyEvaluator`] provides.
//! [`CommandEvaluator`] drives an OPA-compatible CLI:
//!
//! ```text
//! opa eval --format json --stdin-input --data <policy_dir> data.repository.no_signed_commits
//! ```
//!
//! Policy rules are named after the violation they detect, so a rule value of
//! `true` (or a non-empty violation set) means the document is non-compliant.

use crate::policy_path::PolicyPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::OsString;
use std::fmt::{self, Write as _};
use std::io::{Read, Write as _};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_EVALUATOR_PROGRAM: &str = "opa";

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Binary compliance outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Compliant,
    NonCompliant,
}

impl Verdict {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
        }
    }

    /// Verdict for a rule that fires on violation.
    #[must_use]
    pub const fn from_violation(violated: bool) -> Self {
        if violated {
            Self::NonCompliant
        } else {
            Self::Compliant
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one evaluator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Evaluation {
    #[must_use]
    pub const fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("unknown policy {0}")]
    UnknownPolicy(String),

    #[error("malformed input document: {0}")]
    MalformedDocument(String),

    #[error("policy {policy} produced no result")]
    Undefined { policy: String },

    #[error("evaluator failed: {0}")]
    Failed(String),
}

/// External policy engine.
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, policy: &PolicyPath, document: &Value)
    -> Result<Evaluation, EvaluationError>;

    /// Whether `evaluate` may run on several threads at once. When false the
    /// runner serializes every call.
    fn is_concurrency_safe(&self) -> bool {
        true
    }
}

/// Runs an external policy engine once per evaluation, feeding the document on
/// stdin and reading an OPA-style JSON result from stdout.
///
/// With a timeout set, a process still running at the deadline is killed and
/// reaped before `evaluate` returns.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: String,
    policy_dirs: Vec<PathBuf>,
    extra_args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl CommandEvaluator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            policy_dirs: Vec::new(),
            extra_args: Vec::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn opa() -> Self {
        Self::new(DEFAULT_EVALUATOR_PROGRAM)
    }

    #[must_use]
    pub fn with_policy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.policy_dirs.push(dir.into());
        self
    }

    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Wait for `child`, killing it if it outlives the configured timeout.
    fn wait_for_exit(&self, child: &mut Child) -> Result<ExitStatus, EvaluationError> {
        let start = Instant::now();
        loop {
            let failure = match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => match self.timeout {
                    Some(timeout) if start.elapsed() >= timeout => {
                        warn!(
                            program = %self.program,
                            pid = child.id(),
                            "killing evaluator after timeout"
                        );
                        format!("{} timed out after {}ms", self.program, timeout.as_millis())
                    }
                    _ => {
                        thread::sleep(CHILD_POLL_INTERVAL);
                        continue;
                    }
                },
                Err(e) => format!("Failed to wait for {}: {e}", self.program),
            };
            let _ = child.kill();
            let _ = child.wait();
            return Err(EvaluationError::Failed(failure));
        }
    }

    fn args(&self, policy: &PolicyPath) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "eval".into(),
            "--format".into(),
            "json".into(),
            "--stdin-input".into(),
        ];
        for dir in &self.policy_dirs {
            args.push("--data".into());
            args.push(dir.clone().into_os_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(policy.to_string().into());
        args
    }
}

impl PolicyEvaluator for CommandEvaluator {
    fn evaluate(
        &self,
        policy: &PolicyPath,
        document: &Value,
    ) -> Result<Evaluation, EvaluationError> {
        let input = serde_json::to_vec(document)
            .map_err(|e| EvaluationError::MalformedDocument(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(self.args(policy))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EvaluationError::Failed(format!("Failed to spawn {}: {e}", self.program))
            })?;

        // Pipes are drained on their own threads so a chatty or stuck child
        // cannot block the deadline check.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || -> std::io::Result<()> {
                stdin.write_all(&input)?;
                stdin.flush()
            })
        });
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = self.wait_for_exit(&mut child)?;
        let write_result = writer.map_or(Ok(()), |handle| {
            handle
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")))
        });
        let output = CommandOutput {
            status,
            stdout: stdout.map(join_reader).unwrap_or_default(),
            stderr: stderr.map(join_reader).unwrap_or_default(),
        };

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut msg = format!("Command failed: {}", self.program);
            if let Some(code) = output.status.code() {
                let _ = write!(msg, " (exit {code})");
            }
            if !stdout.trim().is_empty() {
                let _ = write!(msg, "\nstdout:\n{stdout}");
            }
            if !stderr.trim().is_empty() {
                let _ = write!(msg, "\nstderr:\n{stderr}");
            }
            return Err(EvaluationError::Failed(msg));
        }
        write_result.map_err(|e| {
            EvaluationError::Failed(format!("Failed to write input to {}: {e}", self.program))
        })?;

        let parsed: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            EvaluationError::Failed(format!("unparseable output from {}: {e}", self.program))
        })?;
        interpret_eval_output(policy, &parsed)
    }
}

struct CommandOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Map an OPA `eval --format json` payload onto a verdict.
pub fn interpret_eval_output(
    policy: &PolicyPath,
    output: &Value,
) -> Result<Evaluation, EvaluationError> {
    let value = output
        .get("result")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|result| result.get("expressions"))
        .and_then(Value::as_array)
        .and_then(|expressions| expressions.first())
        .and_then(|expression| expression.get("value"));

    let Some(value) = value else {
        return Err(EvaluationError::Undefined {
            policy: policy.to_string(),
        });
    };

    match value {
        Value::Bool(violated) => Ok(Evaluation::new(Verdict::from_violation(*violated))),
        Value::Array(items) if items.is_empty() => Ok(Evaluation::new(Verdict::Compliant)),
        Value::Object(map) if map.is_empty() => Ok(Evaluation::new(Verdict::Compliant)),
        Value::Array(_) | Value::Object(_) => {
            Ok(Evaluation::new(Verdict::NonCompliant).with_diagnostic(value.to_string()))
        }
        Value::Null | Value::Number(_) | Value::String(_) => Err(EvaluationError::Failed(
            format!("policy {policy} returned a non-verdict value: {value}"),
        )),
    }
}
