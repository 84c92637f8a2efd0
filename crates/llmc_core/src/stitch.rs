//! Graph-stitch: pad search results with 1-hop (or N-hop) file neighbors.
//!
//! Prefers the SQLite graph database when it exists (`.llmc/rag_graph.db`); falls back to
//! the JSON artifact (`.llmc/rag_graph.json`) rebuilt into an in-memory store only for the
//! duration of the call. Either source missing is reported as [`LlmcError::GraphNotFound`].

use std::collections::HashSet;
use std::path::Path;

use crate::error::{LlmcError, Result};
use crate::graph_store::{build_from_json, graph_paths, GraphStore};

/// A single padded neighbor suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub path: String,
    pub weight: f64,
    pub reason: String,
}

/// Expand `seed_paths` by up to `hops` edge traversals, capped at `limit` total neighbors.
/// Seed files themselves are never returned.
pub fn stitch_neighbors(repo_root: &Path, seed_paths: &[String], limit: usize, hops: u32) -> Result<Vec<Neighbor>> {
    if limit == 0 || seed_paths.is_empty() {
        return Ok(Vec::new());
    }
    let (json_path, db_path) = graph_paths(repo_root);

    let store = if db_path.exists() {
        GraphStore::open(&db_path)?
    } else if json_path.exists() {
        build_from_json(repo_root, &json_path, &db_path)?
    } else {
        return Err(LlmcError::GraphNotFound(json_path));
    };

    let mut frontier: Vec<String> = seed_paths.to_vec();
    let mut seen: HashSet<String> = seed_paths.iter().cloned().collect();
    let mut collected: Vec<Neighbor> = Vec::new();

    for _ in 0..hops.max(1) {
        if collected.len() >= limit {
            break;
        }
        let next = store.get_file_neighbors(&frontier, limit * 4)?;
        let mut new_frontier = Vec::new();
        for path in next {
            if seen.insert(path.clone()) {
                collected.push(Neighbor { path: path.clone(), weight: 1.0, reason: "edge".into() });
                new_frontier.push(path);
                if collected.len() >= limit {
                    break;
                }
            }
        }
        if new_frontier.is_empty() {
            break;
        }
        frontier = new_frontier;
    }

    collected.truncate(limit);
    Ok(collected)
}

/// Pad `existing_file_count` worth of search items with graph neighbors up to `max_expansion`
/// additional items. Returns an empty vec (never an error) when the graph is unavailable,
/// since stitching is a best-effort enrichment of already-valid results.
pub fn expand_search_items(
    repo_root: &Path,
    seed_paths: &[String],
    max_expansion: usize,
    hops: u32,
) -> Vec<Neighbor> {
    stitch_neighbors(repo_root, seed_paths, max_expansion, hops).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GraphEdge, GraphNode};

    #[test]
    fn missing_graph_is_reported_not_panicked() {
        let dir = tempfile::tempdir().unwrap();
        let err = stitch_neighbors(dir.path(), &["a.py".to_string()], 5, 1).unwrap_err();
        assert!(matches!(err, LlmcError::GraphNotFound(_)));
    }

    #[test]
    fn expand_search_items_never_errors() {
        let dir = tempfile::tempdir().unwrap();
        let neighbors = expand_search_items(dir.path(), &["a.py".to_string()], 5, 1);
        assert!(neighbors.is_empty());
    }

    #[test]
    fn one_hop_excludes_seed_and_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".llmc")).unwrap();
        let db_path = dir.path().join(".llmc").join("rag_graph.db");
        let mut store = GraphStore::open(&db_path).unwrap();
        store
            .bulk_insert_nodes(&[
                GraphNode { id: "a.py".into(), name: "a.py".into(), path: "a.py".into(), kind: Some("file".into()), start_line: None, end_line: None, metadata: None },
                GraphNode { id: "b.py".into(), name: "b.py".into(), path: "b.py".into(), kind: Some("file".into()), start_line: None, end_line: None, metadata: None },
            ])
            .unwrap();
        store
            .bulk_insert_edges(&[GraphEdge { source: "a.py".into(), target: "b.py".into(), edge_type: "IMPORTS".into(), metadata: None }])
            .unwrap();
        drop(store);

        let neighbors = stitch_neighbors(dir.path(), &["a.py".to_string()], 5, 1).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].path, "b.py");
    }
}
