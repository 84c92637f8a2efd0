//! Enrich command - runs one of the three enrichment concurrency variants over a repo's
//! pending spans.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use llmc_core::{enrichment::engine_v1, enrichment::engine_v2, repo_paths, SpanStore};
use serde::Serialize;

use super::load_config;

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum EnrichMode {
    V1,
    V2,
}

/// Written to `.llmc/enrich_summary.json` after every pass, for operators inspecting a
/// repo's state without re-running the pass.
#[derive(Debug, Serialize)]
struct EnrichSummary {
    mode: &'static str,
    attempted: usize,
    succeeded: usize,
    failed: usize,
    timed_out: bool,
    finished_at: String,
}

fn write_summary(repo: &Path, summary: &EnrichSummary) -> Result<()> {
    let path = repo_paths::enrich_summary_json(repo);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

/// Exit code 2 indicates a systemic failure (no backend reachable), per the CLI's error
/// taxonomy: a single item failing is never fatal, but every attempted item failing with
/// zero successes means the cascade never had anywhere to land.
fn exit_if_no_backend_reachable(attempted: usize, succeeded: usize, failed: usize) {
    if attempted > 0 && succeeded == 0 && failed == attempted {
        eprintln!("no backend reachable: all {attempted} attempted item(s) failed");
        std::process::exit(2);
    }
}

pub async fn run(repo: &Path, mode: EnrichMode, limit: usize, concurrency: usize, timeout_secs: u64) -> Result<()> {
    let config = load_config(repo)?;
    if config.enrichment.backends.is_empty() {
        bail!("invalid configuration: enrichment.backends is empty");
    }
    let mut store = SpanStore::open(&repo_paths::span_store_db(repo)).context("opening span store")?;

    match mode {
        EnrichMode::V1 => {
            let report = engine_v1::run_v1(
                repo,
                &mut store,
                &config.enrichment,
                config.work_queue.cooldown_seconds,
                limit,
                engine_v1::StarvationRatio::default(),
            )
            .await
            .context("running v1 enrichment pass")?;
            println!("attempted={} succeeded={} failed={}", report.attempted, report.succeeded, report.failed);
            write_summary(
                repo,
                &EnrichSummary {
                    mode: "v1",
                    attempted: report.attempted,
                    succeeded: report.succeeded,
                    failed: report.failed,
                    timed_out: false,
                    finished_at: Utc::now().to_rfc3339(),
                },
            )
            .context("writing enrich_summary.json")?;
            exit_if_no_backend_reachable(report.attempted, report.succeeded, report.failed);
        }
        EnrichMode::V2 => {
            let report = engine_v2::run_v2(
                repo,
                &mut store,
                &config.enrichment,
                config.work_queue.cooldown_seconds,
                limit,
                concurrency,
                Duration::from_secs(timeout_secs),
            )
            .await
            .context("running v2 conveyor-belt enrichment pass")?;
            println!(
                "attempted={} succeeded={} failed={} timed_out={}",
                report.attempted, report.succeeded, report.failed, report.timed_out
            );
            write_summary(
                repo,
                &EnrichSummary {
                    mode: "v2",
                    attempted: report.attempted,
                    succeeded: report.succeeded,
                    failed: report.failed,
                    timed_out: report.timed_out,
                    finished_at: Utc::now().to_rfc3339(),
                },
            )
            .context("writing enrich_summary.json")?;
            exit_if_no_backend_reachable(report.attempted, report.succeeded, report.failed);
        }
    }

    Ok(())
}
