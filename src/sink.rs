//! Report sinks: where a finished [`Report`] goes.

use crate::error::{Error, Result};
use crate::report::{AssertionResult, Report};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

pub const FAILURE_LOG_SCHEMA: &str = "conformance.failure.v1";

pub trait ReportSink {
    fn publish(&self, report: &Report) -> Result<()>;
}

/// Writes the report as pretty JSON, replacing the target atomically.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonFileSink {
    fn publish(&self, report: &Report) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        let encoded = serde_json::to_string_pretty(report)?;
        tmp.write_all(encoded.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map(|_| ())
            .map_err(|e| Error::from(Box::new(e.error)))
    }
}

/// Human-readable summary, one line per failure.
pub struct SummarySink<W: Write> {
    out: Mutex<W>,
}

impl<W: Write> SummarySink<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write> ReportSink for SummarySink<W> {
    fn publish(&self, report: &Report) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        out.write_all(render_summary(report).as_bytes())
            .map_err(|e| Error::sink("summary", e.to_string()))?;
        out.flush()
            .map_err(|e| Error::sink("summary", e.to_string()))
    }
}

#[must_use]
pub fn render_summary(report: &Report) -> String {
    use std::fmt::Write as _;

    let stats = &report.stats;
    let mut text = String::new();
    let _ = writeln!(text, "=== Policy Conformance Report ===");
    let _ = writeln!(text, "Cases:                 {}", stats.total_cases);
    let _ = writeln!(text, "  Passed:              {}", stats.passed_cases);
    let _ = writeln!(
        text,
        "Assertions:            {} ({} passed)",
        stats.total_assertions, stats.passed_assertions
    );
    let _ = writeln!(text, "Assertion mismatches:  {}", stats.assertion_mismatches);
    let _ = writeln!(text, "Resolution errors:     {}", stats.resolution_errors);
    let _ = writeln!(text, "Infrastructure errors: {}", stats.infrastructure_errors);

    if !report.failures.is_empty() {
        let _ = writeln!(text, "\nFailures:");
        for failure in &report.failures {
            let actual = failure
                .actual
                .map_or_else(|| "-".to_string(), |v| v.to_string());
            let _ = write!(
                text,
                "  [{}] {} fixture={} expected={} actual={}",
                failure.kind.as_str(),
                failure.policy_path,
                failure.fixture,
                failure.expected,
                actual
            );
            if let Some(detail) = &failure.detail {
                let _ = write!(text, " detail={detail}");
            }
            text.push('\n');
        }
    }

    let verdict = if report.is_success() { "PASS" } else { "FAIL" };
    let _ = writeln!(text, "\nResult: {verdict}");
    text
}

#[derive(Serialize)]
struct FailureLogLine<'a> {
    schema: &'static str,
    ts: String,
    #[serde(flatten)]
    failure: &'a crate::report::Failure,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<u32>,
}

/// JSONL log with one timestamped line per failure.
#[derive(Debug, Clone)]
pub struct JsonlFailureLog {
    path: PathBuf,
}

impl JsonlFailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonlFailureLog {
    fn publish(&self, report: &Report) -> Result<()> {
        let mut file = std::fs::File::create(&self.path)?;
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        for failure in &report.failures {
            let line = FailureLogLine {
                schema: FAILURE_LOG_SCHEMA,
                ts: ts.clone(),
                failure,
                attempts: attempts_for(report, failure),
            };
            let encoded = serde_json::to_string(&line)?;
            writeln!(file, "{encoded}")?;
        }
        file.flush()?;
        Ok(())
    }
}

fn attempts_for(report: &Report, failure: &crate::report::Failure) -> Option<u32> {
    let case = report.case(&failure.policy_path)?;
    if let Some(resolution) = case
        .resolution_failures
        .iter()
        .find(|r| r.fixture == failure.fixture)
    {
        return Some(resolution.attempts);
    }
    case.assertions
        .iter()
        .find(|a| a.fixture == failure.fixture)
        .and_then(|a| match a.result {
            AssertionResult::Infrastructure { attempts, .. } => Some(attempts),
            _ => None,
        })
}
