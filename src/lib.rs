//! Policy conformance harness.
//!
//! Checks that every policy in a catalog rejects a known-bad fixture and
//! accepts a known-good one. The policy engine, fixture store and report
//! output sit behind traits ([`evaluator::PolicyEvaluator`],
//! [`fixture::FixtureResolver`], [`sink::ReportSink`]) so the core can run
//! against OPA, an in-process rule table, or anything else.
//!
//! ```ignore
//! let catalog = Catalog::builtin()?;
//! let runner = ConformanceRunner::new(
//!     Arc::new(CommandEvaluator::opa().with_policy_dir("policies")),
//!     Arc::new(DirectoryFixtureResolver::new("fixtures")),
//!     RunnerConfig::default(),
//! )?;
//! let report = runner.run(&catalog)?;
//! std::process::exit(report.exit_code());
//! ```

#![forbid(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod fixture;
pub mod namespace;
pub mod policy_path;
pub mod report;
pub mod runner;
pub mod sink;

pub use catalog::{Catalog, TestCase};
pub use config::RunnerConfig;
pub use error::{Error, Result};
pub use evaluator::{CommandEvaluator, Evaluation, EvaluationError, PolicyEvaluator, Verdict};
pub use fixture::{DirectoryFixtureResolver, FixtureResolver, ResolveError, StaticFixtureResolver};
pub use namespace::{Namespace, validate_namespaces};
pub use policy_path::PolicyPath;
pub use report::{Failure, FailureKind, Report};
pub use runner::ConformanceRunner;
