//! Doctor command - operational health report over a repo's Span Store.

use std::path::Path;

use anyhow::{Context, Result};
use llmc_core::{repo_paths, run_doctor, HealthStatus, SpanStore};

pub fn run(repo: &Path) -> Result<()> {
    let store = SpanStore::open(&repo_paths::span_store_db(repo)).context("opening span store")?;
    let report = run_doctor(&store).context("running doctor checks")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if matches!(report.status, HealthStatus::Broken) {
        std::process::exit(1);
    }
    Ok(())
}
