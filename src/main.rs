//! CLI binary: run the policy conformance catalog against an OPA-compatible
//! evaluator and a directory of fixtures.
//!
//! ```text
//! cargo run --bin conformance -- \
//!   --policy-dir policies \
//!   --fixtures e2e/fixtures \
//!   --namespace repository \
//!   --out /tmp/conformance.json \
//!   --log-out /tmp/conformance-failures.jsonl
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use conformance::catalog::Catalog;
use conformance::config::RunnerConfig;
use conformance::evaluator::{CommandEvaluator, DEFAULT_EVALUATOR_PROGRAM};
use conformance::fixture::DirectoryFixtureResolver;
use conformance::namespace::{Namespace, validate_namespaces};
use conformance::runner::ConformanceRunner;
use conformance::sink::{JsonFileSink, JsonlFailureLog, ReportSink, SummarySink};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CONFORMANCE_LOG";

#[derive(Debug, Parser)]
#[command(name = "conformance")]
#[command(about = "Check that every policy rejects its bad fixture and accepts its good one")]
struct Args {
    /// Catalog JSON file. Defaults to the built-in catalog.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Root directory of fixture documents (`<root>/<namespace>/<name>.json`).
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Policy directory passed to the evaluator as `--data` (repeatable).
    #[arg(long = "policy-dir")]
    policy_dirs: Vec<PathBuf>,

    /// Evaluator program.
    #[arg(long, env = "CONFORMANCE_EVALUATOR", default_value = DEFAULT_EVALUATOR_PROGRAM)]
    evaluator: String,

    /// Restrict the run to these namespaces (repeatable).
    #[arg(long = "namespace")]
    namespaces: Vec<String>,

    /// Runner config JSON file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-evaluation timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Extra attempts after an evaluator error or timeout.
    #[arg(long)]
    evaluator_retries: Option<u32>,

    /// Output path for the JSON report.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Output path for the JSONL failure log.
    #[arg(long)]
    log_out: Option<PathBuf>,

    /// Print the selected catalog and exit.
    #[arg(long)]
    list: bool,

    /// Suppress the summary on stderr.
    #[arg(long)]
    quiet: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(args: &Args) -> Result<RunnerConfig> {
    let mut config = RunnerConfig::load(args.config.as_deref())?.apply_env()?;
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.evaluation_timeout_ms = timeout_ms;
    }
    if let Some(retries) = args.evaluator_retries {
        config.evaluator_retries = retries;
    }
    config.validate()?;
    Ok(config)
}

fn selected_namespaces(args: &Args) -> Result<Vec<Namespace>> {
    validate_namespaces(&args.namespaces)?;
    Ok(args
        .namespaces
        .iter()
        .filter_map(|token| Namespace::parse(token))
        .collect())
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging();

    // Configuration problems abort before anything is evaluated.
    let namespaces = selected_namespaces(&args)?;
    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin()?,
    }
    .filter_namespaces(&namespaces);

    if args.list {
        println!("{}", catalog.to_json_pretty()?);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(fixtures) = &args.fixtures else {
        bail!("--fixtures is required unless --list is given");
    };
    let config = load_config(&args)?;

    let evaluator = args
        .policy_dirs
        .iter()
        .fold(
            CommandEvaluator::new(&args.evaluator).with_timeout(config.evaluation_timeout()),
            |evaluator, dir| evaluator.with_policy_dir(dir),
        );
    let runner = ConformanceRunner::new(
        Arc::new(evaluator),
        Arc::new(DirectoryFixtureResolver::new(fixtures)),
        config,
    )?;

    let report = runner.run(&catalog)?;

    if let Some(out) = &args.out {
        JsonFileSink::new(out)
            .publish(&report)
            .with_context(|| format!("writing report to {}", out.display()))?;
    }
    if let Some(log_out) = &args.log_out {
        JsonlFailureLog::new(log_out)
            .publish(&report)
            .with_context(|| format!("writing failure log to {}", log_out.display()))?;
    }
    if !args.quiet {
        SummarySink::new(std::io::stderr()).publish(&report)?;
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
