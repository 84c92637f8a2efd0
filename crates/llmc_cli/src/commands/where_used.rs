//! Where-used command - resolves callers of a symbol via the graph store when the index is
//! fresh, else greps for the bare symbol name.

use std::path::Path;

use anyhow::{Context, Result};
use llmc_core::{graph_store, tool_rag_where_used, GraphStore};

pub fn run(repo: &Path, symbol: &str, limit: usize) -> Result<()> {
    let (_, graph_db) = graph_store::graph_paths(repo);
    let graph = if graph_db.exists() {
        Some(GraphStore::open(&graph_db).context("opening graph store")?)
    } else {
        None
    };

    let result = tool_rag_where_used(repo, graph.as_ref(), symbol, Some(limit));
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
