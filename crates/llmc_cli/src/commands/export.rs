//! Export command - archives a repo's index into a portable `.tar.gz`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use llmc_core::{export_all_data, repo_paths, SpanStore};

pub fn run(repo: &Path, output: Option<&Path>) -> Result<()> {
    let store = SpanStore::open(&repo_paths::span_store_db(repo)).context("opening span store")?;
    let timestamp = Utc::now().to_rfc3339();
    let archive = export_all_data(repo, &store, output.map(PathBuf::from).as_deref(), &timestamp).context("exporting index archive")?;
    println!("exported to {}", archive.display());
    Ok(())
}
