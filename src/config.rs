//! Runner configuration: file, environment, then explicit overrides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_EVALUATION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EVALUATOR_RETRIES: u32 = 1;
pub const DEFAULT_RESOLVE_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;
const MAX_CONCURRENCY: usize = 256;

pub const ENV_CONCURRENCY: &str = "CONFORMANCE_CONCURRENCY";
pub const ENV_EVALUATION_TIMEOUT_MS: &str = "CONFORMANCE_EVALUATION_TIMEOUT_MS";
pub const ENV_EVALUATOR_RETRIES: &str = "CONFORMANCE_EVALUATOR_RETRIES";
pub const ENV_RESOLVE_RETRIES: &str = "CONFORMANCE_RESOLVE_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "CONFORMANCE_RETRY_BACKOFF_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Worker threads evaluating test cases.
    pub concurrency: usize,
    /// Upper bound for a single evaluator call.
    pub evaluation_timeout_ms: u64,
    /// Extra attempts after an evaluator error or timeout.
    pub evaluator_retries: u32,
    /// Extra attempts after a transient fixture lookup failure.
    pub resolve_retries: u32,
    /// Pause between attempts; doubles on each retry.
    pub retry_backoff_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            evaluation_timeout_ms: DEFAULT_EVALUATION_TIMEOUT_MS,
            evaluator_retries: DEFAULT_EVALUATOR_RETRIES,
            resolve_retries: DEFAULT_RESOLVE_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .min(8)
}

impl RunnerConfig {
    /// Load from a JSON file. A missing path yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::config(format!("Failed to parse config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CONFORMANCE_*` environment overrides.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_override(&lookup, ENV_CONCURRENCY)? {
            self.concurrency = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_EVALUATION_TIMEOUT_MS)? {
            self.evaluation_timeout_ms = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_EVALUATOR_RETRIES)? {
            self.evaluator_retries = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_RESOLVE_RETRIES)? {
            self.resolve_retries = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_RETRY_BACKOFF_MS)? {
            self.retry_backoff_ms = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(Error::config(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if self.evaluation_timeout_ms == 0 {
            return Err(Error::config("evaluationTimeoutMs must be greater than 0"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|e| Error::config(format!("{key}={trimmed:?}: {e}")))
}
