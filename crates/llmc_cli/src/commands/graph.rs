//! Graph command - builds the schema graph artifact from the span store and loads it into
//! the Graph Store.

use std::path::Path;

use anyhow::{Context, Result};
use llmc_core::{build_schema_graph, load_graph_store, repo_paths, write_schema_graph, BuildMode, SpanStore};

pub fn build(repo: &Path, allow_empty: bool) -> Result<()> {
    let store = SpanStore::open(&repo_paths::span_store_db(repo)).context("opening span store")?;
    let mode = if allow_empty { BuildMode::AllowEmpty } else { BuildMode::RequireEnrichment };

    let artifact = build_schema_graph(repo, &store, mode).context("building schema graph")?;
    write_schema_graph(repo, &artifact).context("writing schema graph artifact")?;
    let graph = load_graph_store(repo, &artifact).context("loading graph store")?;

    println!(
        "nodes={} edges={}",
        graph.node_count().unwrap_or_default(),
        graph.edge_count().unwrap_or_default()
    );
    Ok(())
}
