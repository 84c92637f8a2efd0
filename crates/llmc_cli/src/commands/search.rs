//! Search command - hybrid FTS + rerank + graph-stitch retrieval, falling back to a local
//! grep when the index is stale.

use std::path::Path;

use anyhow::{Context, Result};
use llmc_core::{repo_paths, tool_rag_search, SpanStore};

use super::load_config;

pub fn run(repo: &Path, query: &str, limit: usize) -> Result<()> {
    let config = load_config(repo)?;
    let store = SpanStore::open(&repo_paths::span_store_db(repo)).context("opening span store")?;

    let result = tool_rag_search(repo, &store, query, Some(limit), &config.retrieval);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
