//! Lineage command - upstream (callers) or downstream (callees) traversal of a symbol via
//! the graph store, falling back to a `symbol(` call-site grep.

use std::path::Path;

use anyhow::{Context, Result};
use llmc_core::{graph_store, tool_rag_lineage, GraphStore, LineageDirection};

pub fn run(repo: &Path, symbol: &str, direction: LineageDirection, limit: usize) -> Result<()> {
    let (_, graph_db) = graph_store::graph_paths(repo);
    let graph = if graph_db.exists() {
        Some(GraphStore::open(&graph_db).context("opening graph store")?)
    } else {
        None
    };

    let result = tool_rag_lineage(repo, graph.as_ref(), symbol, direction, Some(limit));
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
