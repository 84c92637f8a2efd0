//! Retrieval Facade (C8): freshness-gated routing between the graph-backed path
//! (FTS → rerank → graph stitch) and a deterministic local grep fallback, plus
//! symbol where-used and lineage resolution over the graph.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::graph_store::GraphStore;
use crate::rerank::{rerank_hits, RerankWeights};
use crate::repo_paths::index_status_json;
use crate::span_store::SpanStore;
use crate::stitch::expand_search_items;
use crate::types::{FreshnessState, IndexStatus, RouteDecision};

/// Where a result envelope's items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTag {
    RagGraph,
    LocalFallback,
}

impl SourceTag {
    fn as_str(self) -> &'static str {
        match self {
            SourceTag::RagGraph => "RAG_GRAPH",
            SourceTag::LocalFallback => "LOCAL_FALLBACK",
        }
    }
}

/// Location of a snippet within a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetLocation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// A small window of source text with location metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    pub location: SnippetLocation,
}

/// Single search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchItem {
    pub file: String,
    pub snippet: Snippet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment_summary: Option<String>,
}

/// Result envelope for search queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub items: Vec<SearchItem>,
    pub truncated: bool,
    pub source: String,
    pub freshness_state: FreshnessState,
}

/// Single where-used hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereUsedItem {
    pub file: String,
    pub snippet: Snippet,
}

/// Result envelope for where-used queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereUsedResult {
    pub symbol: String,
    pub items: Vec<WhereUsedItem>,
    pub truncated: bool,
    pub source: String,
    pub freshness_state: FreshnessState,
}

/// Single lineage hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageItem {
    pub file: String,
    pub snippet: Snippet,
}

/// Direction of a lineage traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineageDirection {
    Upstream,
    Downstream,
}

/// Result envelope for lineage queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageResult {
    pub symbol: String,
    pub direction: LineageDirection,
    pub items: Vec<LineageItem>,
    pub truncated: bool,
    pub source: String,
    pub freshness_state: FreshnessState,
}

/// Load the Index Status record for `repo_root`, if present and parseable.
pub fn load_status(repo_root: &Path) -> Option<IndexStatus> {
    let path = index_status_json(repo_root);
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Persist the Index Status record for `repo_root`.
pub fn save_status(repo_root: &Path, status: &IndexStatus) -> std::io::Result<()> {
    crate::repo_paths::ensure_rag_dir(repo_root)?;
    let path = index_status_json(repo_root);
    let text = serde_json::to_string_pretty(status).unwrap_or_default();
    std::fs::write(path, text)
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

/// Decide whether a query may use the graph-backed RAG path for `repo_root`.
///
/// A pure function of `(index_status, git_HEAD)`: FRESH iff the index state is "fresh"
/// and the recorded commit matches the current HEAD. Any ambiguity (missing status,
/// no HEAD, no recorded commit) routes to the local fallback rather than risk serving
/// stale results.
pub fn compute_route(repo_root: &Path) -> RouteDecision {
    let Some(status) = load_status(repo_root) else {
        return RouteDecision { use_rag: false, freshness_state: FreshnessState::Unknown };
    };

    if !matches!(status.index_state, crate::types::IndexState::Fresh) {
        return RouteDecision { use_rag: false, freshness_state: FreshnessState::Stale };
    }

    let head = detect_git_head(repo_root);
    let (Some(head), Some(last_indexed)) = (head, status.last_indexed_commit.clone()) else {
        return RouteDecision { use_rag: false, freshness_state: FreshnessState::Unknown };
    };

    if head == last_indexed {
        RouteDecision { use_rag: true, freshness_state: FreshnessState::Fresh }
    } else {
        RouteDecision { use_rag: false, freshness_state: FreshnessState::Stale }
    }
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.filter(|l| *l > 0).unwrap_or(default)
}

/// Directories never worth descending into for the local fallback: VCS/tool metadata,
/// caches, and the same dependency/build-output directories `IgnoreConfig`'s
/// `default_exclude_patterns` excludes from real indexing.
const SKIP_DIRS: &[&str] = &[
    ".git", ".llmc", ".trash", "__pycache__", ".venv", "venv", ".mypy_cache", ".pytest_cache",
    "node_modules", "target", "dist", "build",
];

/// Extensions the fallback will actually grep: the languages the extractor understands,
/// plus the doc extensions the work queue treats as first-class content. Everything else
/// (binaries, lockfiles, vendored build artifacts) is skipped rather than read as text.
const SEARCHABLE_EXTENSIONS: &[&str] = &[
    "py", "rs", "go", "js", "jsx", "ts", "tsx", "c", "cc", "cpp", "h", "hpp", "java", "md", "rst", "txt",
];

fn is_searchable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SEARCHABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn iter_repo_files(repo_root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![repo_root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.is_dir() {
                if !SKIP_DIRS.contains(&name.as_ref()) {
                    stack.push(path);
                }
            } else if is_searchable(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// Grep-based local fallback: line-by-line substring search with a +-2 line context
/// window, used whenever the graph-backed path is unavailable or untrusted.
pub fn grep_snippets(repo_root: &Path, needle: &str, max_items: usize) -> Vec<(String, u32, u32, String)> {
    let mut items = Vec::new();
    for path in iter_repo_files(repo_root) {
        let Ok(text) = std::fs::read_to_string(&path) else { continue };
        let lines: Vec<&str> = text.lines().collect();
        let relative = path.strip_prefix(repo_root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
        for (idx, line) in lines.iter().enumerate() {
            if line.contains(needle) {
                let i = idx + 1;
                let start = i.saturating_sub(2).max(1);
                let end = (i + 2).min(lines.len());
                let snippet = lines[start - 1..end].join("\n");
                items.push((relative.clone(), start as u32, end as u32, snippet));
                if items.len() >= max_items {
                    return items;
                }
            }
        }
    }
    items
}

/// Search using FTS + reranker + 1-hop graph stitch when the route allows RAG; otherwise
/// a deterministic local grep over the repository.
pub fn tool_rag_search(repo_root: &Path, store: &SpanStore, query: &str, limit: Option<usize>, cfg: &RetrievalConfig) -> SearchResult {
    let route = compute_route(repo_root);
    let max_results = clamp_limit(limit, cfg.default_limit);

    if route.use_rag {
        match store.search_fts(query, (max_results * 3).max(100)) {
            Ok(hits) => {
                let weights = RerankWeights::default();
                let ranked = rerank_hits(query, &hits, max_results, weights);
                let truncated = hits.len() > ranked.len();
                let mut items: Vec<SearchItem> = ranked
                    .into_iter()
                    .map(|h| {
                        let enrichment_summary =
                            annotate(store, &h.file, h.start_line, h.end_line, cfg);
                        SearchItem {
                            file: h.file.clone(),
                            snippet: Snippet {
                                text: h.text,
                                location: SnippetLocation { path: h.file, start_line: h.start_line, end_line: h.end_line },
                            },
                            enrichment_summary,
                        }
                    })
                    .collect();

                let remaining = max_results.saturating_sub(items.len());
                if remaining > 0 {
                    let seen: std::collections::HashSet<String> = items.iter().map(|i| i.file.clone()).collect();
                    let seeds: Vec<String> = items.iter().map(|i| i.file.clone()).collect();
                    let neighbors = expand_search_items(repo_root, &seeds, remaining.min(cfg.max_graph_expansion), cfg.graph_hops);
                    for n in neighbors {
                        if items.len() >= max_results {
                            break;
                        }
                        if seen.contains(&n.path) {
                            continue;
                        }
                        items.push(SearchItem {
                            file: n.path.clone(),
                            snippet: Snippet { text: String::new(), location: SnippetLocation { path: n.path, start_line: 1, end_line: 1 } },
                            enrichment_summary: None,
                        });
                    }
                }

                return SearchResult {
                    query: query.to_string(),
                    items,
                    truncated,
                    source: SourceTag::RagGraph.as_str().to_string(),
                    freshness_state: route.freshness_state,
                };
            }
            Err(e) => {
                debug!(error = %e, "FTS search failed, falling back to local grep");
            }
        }
    }

    let grep_hits = grep_snippets(repo_root, query, max_results);
    let items = grep_hits
        .into_iter()
        .map(|(rel, sl, el, text)| {
            let enrichment_summary = annotate(store, &rel, sl, el, cfg);
            SearchItem {
                file: rel.clone(),
                snippet: Snippet { text, location: SnippetLocation { path: rel, start_line: sl, end_line: el } },
                enrichment_summary,
            }
        })
        .collect();
    SearchResult {
        query: query.to_string(),
        items,
        truncated: false,
        source: SourceTag::LocalFallback.as_str().to_string(),
        freshness_state: route.freshness_state,
    }
}

/// Look up and char-budget-truncate an enrichment summary for a (file, line-range) hit,
/// if annotation is enabled. Used by both the RAG and local-fallback branches of
/// [`tool_rag_search`] so every result carries the same best-effort context.
fn annotate(store: &SpanStore, file: &str, start_line: u32, end_line: u32, cfg: &RetrievalConfig) -> Option<String> {
    if !cfg.annotate_enrichments {
        return None;
    }
    let summary = store.enrichment_summary_for_location(file, start_line, end_line).ok().flatten()?;
    if summary.len() > cfg.enrichment_char_budget {
        Some(summary.chars().take(cfg.enrichment_char_budget).collect())
    } else {
        Some(summary)
    }
}

/// Where-used query: resolves callers of `symbol` via the graph's incoming-edge index
/// when routed to RAG, else greps for the bare symbol name.
pub fn tool_rag_where_used(repo_root: &Path, graph: Option<&GraphStore>, symbol: &str, limit: Option<usize>) -> WhereUsedResult {
    let route = compute_route(repo_root);
    let max_results = clamp_limit(limit, 50);

    if route.use_rag {
        if let Some(graph) = graph {
            if let Ok(files) = graph.get_incoming_neighbors(&[symbol.to_string()], None) {
                let truncated = files.len() > max_results;
                let items: Vec<WhereUsedItem> = files
                    .into_iter()
                    .take(max_results)
                    .map(|path| WhereUsedItem {
                        file: path.clone(),
                        snippet: Snippet { text: String::new(), location: SnippetLocation { path, start_line: 1, end_line: 1 } },
                    })
                    .collect();
                return WhereUsedResult {
                    symbol: symbol.to_string(),
                    items,
                    truncated,
                    source: SourceTag::RagGraph.as_str().to_string(),
                    freshness_state: route.freshness_state,
                };
            }
        }
    }

    let grep_hits = grep_snippets(repo_root, symbol, max_results);
    let items = grep_hits
        .into_iter()
        .map(|(rel, sl, el, text)| WhereUsedItem {
            file: rel.clone(),
            snippet: Snippet { text, location: SnippetLocation { path: rel, start_line: sl, end_line: el } },
        })
        .collect();
    WhereUsedResult {
        symbol: symbol.to_string(),
        items,
        truncated: false,
        source: SourceTag::LocalFallback.as_str().to_string(),
        freshness_state: route.freshness_state,
    }
}

/// Lineage query: upstream (callers) or downstream (callees) traversal of `symbol` via the
/// graph when routed to RAG, else a naive `symbol(` call-site grep as a pseudo-lineage.
pub fn tool_rag_lineage(
    repo_root: &Path,
    graph: Option<&GraphStore>,
    symbol: &str,
    direction: LineageDirection,
    limit: Option<usize>,
) -> LineageResult {
    let route = compute_route(repo_root);
    let max_results = clamp_limit(limit, 50);

    if route.use_rag {
        if let Some(graph) = graph {
            let files = match direction {
                LineageDirection::Upstream => graph.get_incoming_neighbors(&[symbol.to_string()], None),
                LineageDirection::Downstream => graph.get_outgoing_neighbors(&[symbol.to_string()], None),
            };
            if let Ok(files) = files {
                let truncated = files.len() > max_results;
                let items: Vec<LineageItem> = files
                    .into_iter()
                    .take(max_results)
                    .map(|path| LineageItem {
                        file: path.clone(),
                        snippet: Snippet { text: String::new(), location: SnippetLocation { path, start_line: 1, end_line: 1 } },
                    })
                    .collect();
                return LineageResult {
                    symbol: symbol.to_string(),
                    direction,
                    items,
                    truncated,
                    source: SourceTag::RagGraph.as_str().to_string(),
                    freshness_state: route.freshness_state,
                };
            }
        }
    }

    let needle = format!("{symbol}(");
    let grep_hits = grep_snippets(repo_root, &needle, max_results);
    let items = grep_hits
        .into_iter()
        .map(|(rel, sl, el, text)| LineageItem {
            file: rel.clone(),
            snippet: Snippet { text, location: SnippetLocation { path: rel, start_line: sl, end_line: el } },
        })
        .collect();
    LineageResult {
        symbol: symbol.to_string(),
        direction,
        items,
        truncated: false,
        source: SourceTag::LocalFallback.as_str().to_string(),
        freshness_state: route.freshness_state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndexState;

    #[test]
    fn no_status_routes_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let route = compute_route(dir.path());
        assert!(!route.use_rag);
        assert_eq!(route.freshness_state, FreshnessState::Unknown);
    }

    #[test]
    fn stale_status_routes_stale() {
        let dir = tempfile::tempdir().unwrap();
        let status = IndexStatus {
            repo: dir.path().to_string_lossy().into_owned(),
            index_state: IndexState::Stale,
            last_indexed_at: "2024-01-01T00:00:00Z".into(),
            last_indexed_commit: Some("deadbeef".into()),
            schema_version: "7".into(),
            last_error: None,
        };
        save_status(dir.path(), &status).unwrap();
        let route = compute_route(dir.path());
        assert!(!route.use_rag);
        assert_eq!(route.freshness_state, FreshnessState::Stale);
    }

    #[test]
    fn fresh_status_without_git_repo_routes_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let status = IndexStatus {
            repo: dir.path().to_string_lossy().into_owned(),
            index_state: IndexState::Fresh,
            last_indexed_at: "2024-01-01T00:00:00Z".into(),
            last_indexed_commit: Some("deadbeef".into()),
            schema_version: "7".into(),
            last_error: None,
        };
        save_status(dir.path(), &status).unwrap();
        let route = compute_route(dir.path());
        assert!(!route.use_rag);
        assert_eq!(route.freshness_state, FreshnessState::Unknown);
    }

    #[test]
    fn grep_fallback_skips_build_dirs_and_non_source_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "needle in dependency\n").unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("target/debug/build.log"), "needle in build output\n").unwrap();
        std::fs::write(dir.path().join("binary.bin"), b"needle\x00\x01\x02".to_vec()).unwrap();
        std::fs::write(dir.path().join("src.py"), "needle here\n").unwrap();

        let hits = grep_snippets(dir.path(), "needle", 100);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "src.py");
    }

    #[test]
    fn grep_fallback_returns_context_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "line1\nline2\nneedle here\nline4\nline5\nline6\n").unwrap();
        let hits = grep_snippets(dir.path(), "needle", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, 1);
        assert_eq!(hits[0].2, 5);
    }

    #[test]
    fn local_fallback_search_when_no_status() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target(): pass\n").unwrap();
        let store = SpanStore::open_in_memory().unwrap();
        let cfg = RetrievalConfig::default();
        let result = tool_rag_search(dir.path(), &store, "target", None, &cfg);
        assert_eq!(result.source, "LOCAL_FALLBACK");
        assert_eq!(result.items.len(), 1);
    }

    #[test]
    fn fallback_search_attaches_enrichment_annotation() {
        use crate::types::{BackendMeta, EnrichmentPayload, FileRecord, SliceType, SpanRecord};

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target(): pass\n").unwrap();

        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord {
                path: PathBuf::from("a.py"),
                lang: "python".into(),
                file_hash: "h1".into(),
                size: 20,
                mtime: 0.0,
            })
            .unwrap();
        let span = SpanRecord {
            file_path: PathBuf::from("a.py"),
            lang: "python".into(),
            symbol: "target".into(),
            kind: "function".into(),
            start_line: 1,
            end_line: 1,
            byte_start: 0,
            byte_end: 19,
            span_hash: "hash-target".into(),
            doc_hint: None,
            imports: vec![],
            slice_type: SliceType::Code,
            slice_language: None,
            classifier_confidence: 1.0,
            classifier_version: "v1".into(),
        };
        store.replace_spans("a.py", &[span]).unwrap();
        store
            .store_enrichment(
                "hash-target",
                "target",
                &EnrichmentPayload {
                    summary_120w: "Returns nothing, used as a placeholder.".into(),
                    inputs: vec![],
                    outputs: vec![],
                    side_effects: vec![],
                    pitfalls: vec![],
                    usage_snippet: None,
                    evidence: vec![],
                    model: None,
                    schema_version: None,
                    tags: None,
                },
                &BackendMeta::default(),
            )
            .unwrap();

        let cfg = RetrievalConfig::default();
        let result = tool_rag_search(dir.path(), &store, "target", None, &cfg);
        assert_eq!(result.items.len(), 1);
        assert_eq!(
            result.items[0].enrichment_summary.as_deref(),
            Some("Returns nothing, used as a placeholder.")
        );
    }

    #[test]
    fn annotation_disabled_by_config_yields_no_summary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def target(): pass\n").unwrap();
        let store = SpanStore::open_in_memory().unwrap();
        let mut cfg = RetrievalConfig::default();
        cfg.annotate_enrichments = false;
        let result = tool_rag_search(dir.path(), &store, "target", None, &cfg);
        assert!(result.items[0].enrichment_summary.is_none());
    }
}
