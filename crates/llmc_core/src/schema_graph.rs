//! Schema/Graph Builder (C10): project spans + enrichments into a typed schema graph
//! (entities + relations), persist it as a JSON artifact, and bulk-load a Graph Store
//! from it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LlmcError, Result};
use crate::graph_store::GraphStore;
use crate::span_store::SpanStore;
use crate::types::{EnrichmentRecord, GraphEdge, GraphNode, SpanRecord};

/// Whether an empty enrichment join should be treated as a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Fail if no enrichments exist yet (the join would be AST-only, which the caller
    /// considers unacceptable for this build).
    RequireEnrichment,
    /// Allow an AST-only graph with zero enrichments (useful for a first-pass build).
    AllowEmpty,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaEntity {
    id: String,
    name: String,
    path: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enrichment_summary: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaRelation {
    edge: String,
    src: String,
    dst: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaGraphBody {
    entities: Vec<SchemaEntity>,
    relations: Vec<SchemaRelation>,
}

/// The persisted JSON artifact written to `.llmc/rag_graph.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaGraphArtifact {
    repo: String,
    schema_version: String,
    files: Vec<String>,
    schema_graph: SchemaGraphBody,
}

const SCHEMA_GRAPH_VERSION: &str = "2";

/// Build the schema graph artifact from `store`'s current spans and enrichments.
pub fn build_schema_graph(repo_root: &Path, store: &SpanStore, mode: BuildMode) -> Result<SchemaGraphArtifact> {
    let spans = store.all_spans()?;
    let enrichments = store.all_enrichments()?;

    if matches!(mode, BuildMode::RequireEnrichment) && enrichments.is_empty() && !spans.is_empty() {
        return Err(LlmcError::InvalidGraph {
            path: crate::graph_store::graph_paths(repo_root).0,
            reason: "no enrichments present; refusing to build a summary-less graph in require_enrichment mode".into(),
        });
    }

    let summaries: std::collections::HashMap<String, String> =
        enrichments.into_iter().filter_map(|e: EnrichmentRecord| e.summary.map(|s| (e.span_hash, s))).collect();

    let mut files: Vec<String> = Vec::new();
    let mut entities = Vec::new();
    let mut relations = Vec::new();

    for span in &spans {
        let path = path_str(span);
        if !files.contains(&path) {
            files.push(path.clone());
        }

        entities.push(SchemaEntity {
            id: entity_id(span),
            name: span.symbol.clone(),
            path: path.clone(),
            kind: span.kind.clone(),
            start_line: Some(span.start_line as i64),
            end_line: Some(span.end_line as i64),
            span_hash: Some(span.span_hash.clone()),
            enrichment_summary: summaries.get(&span.span_hash).cloned(),
        });

        for import in &span.imports {
            relations.push(SchemaRelation { edge: "imports".into(), src: entity_id(span), dst: import.clone() });
        }
    }

    Ok(SchemaGraphArtifact {
        repo: repo_root.to_string_lossy().into_owned(),
        schema_version: SCHEMA_GRAPH_VERSION.to_string(),
        files,
        schema_graph: SchemaGraphBody { entities, relations },
    })
}

/// Persist the artifact to `.llmc/rag_graph.json`.
pub fn write_schema_graph(repo_root: &Path, artifact: &SchemaGraphArtifact) -> Result<()> {
    let (json_path, _) = crate::graph_store::graph_paths(repo_root);
    if let Some(parent) = json_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(json_path, serde_json::to_string(artifact)?)?;
    Ok(())
}

/// Bulk-load a Graph Store directly from an in-memory artifact (no JSON round-trip).
pub fn load_graph_store(repo_root: &Path, artifact: &SchemaGraphArtifact) -> Result<GraphStore> {
    let (_, db_path) = crate::graph_store::graph_paths(repo_root);
    let mut store = GraphStore::open(&db_path)?;

    let nodes: Vec<GraphNode> = artifact
        .schema_graph
        .entities
        .iter()
        .map(|e| GraphNode {
            id: e.id.clone(),
            name: e.name.clone(),
            path: e.path.clone(),
            kind: Some(e.kind.clone()),
            start_line: e.start_line,
            end_line: e.end_line,
            metadata: Some(serde_json::json!({
                "span_hash": e.span_hash,
                "enrichment_summary": e.enrichment_summary,
            })),
        })
        .collect();
    store.bulk_insert_nodes(&nodes)?;

    let edges: Vec<GraphEdge> = artifact
        .schema_graph
        .relations
        .iter()
        .map(|r| GraphEdge { source: r.src.clone(), target: r.dst.clone(), edge_type: r.edge.to_uppercase(), metadata: None })
        .collect();
    store.bulk_insert_edges(&edges)?;

    Ok(store)
}

fn entity_id(span: &SpanRecord) -> String {
    format!("{}:{}", path_str(span), span.symbol)
}

fn path_str(span: &SpanRecord) -> String {
    span.file_path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileRecord, SliceType, SpanRecord};

    fn seed_store() -> SpanStore {
        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord { path: "a.py".into(), lang: "python".into(), file_hash: "h".into(), size: 10, mtime: 0.0 })
            .unwrap();
        store
            .replace_spans(
                "a.py",
                &[SpanRecord {
                    file_path: "a.py".into(),
                    lang: "python".into(),
                    symbol: "foo".into(),
                    kind: "function".into(),
                    start_line: 1,
                    end_line: 2,
                    byte_start: 0,
                    byte_end: 10,
                    span_hash: "hash1".into(),
                    doc_hint: None,
                    imports: vec!["os".into()],
                    slice_type: SliceType::Code,
                    slice_language: Some("python".into()),
                    classifier_confidence: 0.9,
                    classifier_version: "heuristic-v1".into(),
                }],
            )
            .unwrap();
        store
    }

    #[test]
    fn require_enrichment_fails_without_enrichments() {
        let dir = tempfile::tempdir().unwrap();
        let store = seed_store();
        let err = build_schema_graph(dir.path(), &store, BuildMode::RequireEnrichment).unwrap_err();
        assert!(matches!(err, LlmcError::InvalidGraph { .. }));
    }

    #[test]
    fn allow_empty_builds_ast_only_graph() {
        let dir = tempfile::tempdir().unwrap();
        let store = seed_store();
        let artifact = build_schema_graph(dir.path(), &store, BuildMode::AllowEmpty).unwrap();
        assert_eq!(artifact.files, vec!["a.py".to_string()]);
        assert_eq!(artifact.schema_graph.entities.len(), 1);
        assert_eq!(artifact.schema_graph.relations.len(), 1);
        assert_eq!(artifact.schema_graph.relations[0].edge, "imports");
    }

    #[test]
    fn load_graph_store_round_trips_entities() {
        let dir = tempfile::tempdir().unwrap();
        let store = seed_store();
        let artifact = build_schema_graph(dir.path(), &store, BuildMode::AllowEmpty).unwrap();
        let graph = load_graph_store(dir.path(), &artifact).unwrap();
        assert_eq!(graph.node_count().unwrap(), 1);
        assert_eq!(graph.edge_count().unwrap(), 1);
    }
}
