//! Index command - incremental discovery, extraction, and differential upsert.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use chrono::Utc;
use llmc_core::{repo_paths, save_status, IndexState, IndexStatus, Indexer, RegexExtractor, SpanExtractor, SpanStore, WorkQueue};

use super::load_config;

pub fn run(repo: &Path, feed_queue: bool) -> Result<()> {
    repo_paths::ensure_rag_dir(repo).context("creating .llmc/rag directory")?;
    let config = load_config(repo)?;

    let mut store = SpanStore::open(&repo_paths::span_store_db(repo)).context("opening span store")?;

    let extractors: Vec<Box<dyn llmc_core::SpanExtractor>> =
        RegexExtractor::standard_set().into_iter().map(|e| Box::new(e) as Box<dyn llmc_core::SpanExtractor>).collect();
    let indexer = Indexer::new(repo, extractors, config.ignore.clone());

    let report = indexer.run(&mut store, &repo_paths::spans_jsonl(repo)).context("running index pass")?;
    println!(
        "changed={} unchanged={} removed={} spans_added={} spans_deleted={} spans_unchanged={}",
        report.files_changed,
        report.files_unchanged,
        report.files_removed,
        report.spans_added,
        report.spans_deleted,
        report.spans_unchanged
    );

    let status = IndexStatus {
        repo: repo.to_string_lossy().into_owned(),
        index_state: IndexState::Fresh,
        last_indexed_at: Utc::now().to_rfc3339(),
        last_indexed_commit: detect_git_head(repo),
        schema_version: llmc_core::span_store::DB_SCHEMA_VERSION.to_string(),
        last_error: None,
    };
    save_status(repo, &status).context("writing index status")?;

    if feed_queue {
        let queue = WorkQueue::open(&repo_paths::global_work_queue_db()).context("opening global work queue")?;
        let pushed = indexer
            .feed_queue(&store, &queue, 100_000, config.work_queue.cooldown_seconds)
            .context("feeding pending spans to the work queue")?;
        println!("pushed {pushed} items onto the global work queue");
    }

    Ok(())
}

fn detect_git_head(repo_root: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .arg("rev-parse")
        .arg("HEAD")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        None
    } else {
        Some(sha)
    }
}
