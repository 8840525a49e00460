//! `xswitch probe`: url-test one subscription and print the ranking.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use uuid::Uuid;
use xs_core::{LogHub, ProbeResult, UrlTestReport};

use crate::cli::{build_orchestrator, load_settings, output, Format};

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Subscription to test
    #[arg(long)]
    pub subscription: Uuid,

    /// Override `probe.timeout_ms`
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long, value_enum, default_value = "human")]
    pub format: Format,
}

#[derive(Serialize)]
struct ProbeReport<'a> {
    subscription_id: Uuid,
    subscription_name: &'a str,
    total_servers: usize,
    successful_tests: usize,
    failed_tests: usize,
    best: Option<&'a ProbeResult>,
    results: &'a [ProbeResult],
}

pub async fn run(config: Option<&PathBuf>, args: ProbeArgs) -> Result<()> {
    let mut settings = load_settings(config)?;
    if let Some(timeout_ms) = args.timeout_ms {
        settings.probe.timeout_ms = timeout_ms;
        settings.validate()?;
    }

    let orchestrator = build_orchestrator(&settings, LogHub::default())?;
    let report = orchestrator
        .url_test(args.subscription)
        .await
        .with_context(|| format!("url-test subscription {}", args.subscription))?;

    output::emit(
        args.format,
        || render_human(&report),
        &ProbeReport {
            subscription_id: report.subscription.id,
            subscription_name: &report.subscription.name,
            total_servers: report.total(),
            successful_tests: report.successful(),
            failed_tests: report.failed(),
            best: report.best(),
            results: &report.results,
        },
    );
    Ok(())
}

fn render_human(report: &UrlTestReport) -> String {
    let mut out = format!(
        "{}: {} servers, {} reachable, {} failed\n",
        report.subscription.name,
        report.total(),
        report.successful(),
        report.failed()
    );
    for (rank, result) in report.ranked().iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}. {:>6} ms  {}",
            rank + 1,
            result.latency_ms().unwrap_or_default(),
            result.remarks
        );
    }
    for result in report.results.iter().filter(|r| !r.success()) {
        let _ = writeln!(
            out,
            "   -  failed  {}: {}",
            result.remarks,
            result.error().unwrap_or_default()
        );
    }
    out.trim_end().to_owned()
}
