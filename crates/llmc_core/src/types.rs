//! Core data types shared across llmc_core's components.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A discovered source file tracked by the Span Store.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Repo-relative POSIX path.
    pub path: PathBuf,
    /// Language tag (extractor-provided).
    pub lang: String,
    /// SHA-256 of the file's bytes.
    pub file_hash: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, Unix seconds (fractional).
    pub mtime: f64,
}

/// Content routing classification attached to a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceType {
    /// Executable code.
    Code,
    /// Prose documentation.
    Docs,
    /// Configuration data.
    Config,
    /// Anything else.
    Other,
}

impl SliceType {
    /// String form used in storage (`spans.slice_type`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Docs => "docs",
            Self::Config => "config",
            Self::Other => "other",
        }
    }

    /// Parse the storage string form, defaulting to `Other` for anything unrecognized.
    pub fn parse(s: &str) -> Self {
        match s {
            "code" => Self::Code,
            "docs" => Self::Docs,
            "config" => Self::Config,
            _ => Self::Other,
        }
    }
}

/// A contiguous byte range within a file with semantic identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    /// Owning file's repo-relative path.
    pub file_path: PathBuf,
    /// Language tag.
    pub lang: String,
    /// Dotted qualified symbol name.
    pub symbol: String,
    /// function / class / method / module / ...
    pub kind: String,
    /// 1-based inclusive start line.
    pub start_line: u32,
    /// 1-based inclusive end line.
    pub end_line: u32,
    /// Byte offset of the span's start within the file.
    pub byte_start: u64,
    /// Byte offset of the span's end within the file (exclusive).
    pub byte_end: u64,
    /// SHA-256 over (lang, bytes); globally unique.
    pub span_hash: String,
    /// Optional doc-hint extracted alongside the span.
    pub doc_hint: Option<String>,
    /// Dotted names imported by this span, if applicable.
    pub imports: Vec<String>,
    /// Content routing classification.
    pub slice_type: SliceType,
    /// Classifier-detected language, if different/finer-grained than `lang`.
    pub slice_language: Option<String>,
    /// Classifier confidence in [0, 1].
    pub classifier_confidence: f64,
    /// Classifier implementation version string.
    pub classifier_version: String,
}

impl SpanRecord {
    /// Read the span's raw bytes from disk relative to `repo_root`.
    pub fn read_bytes(&self, repo_root: &Path) -> std::io::Result<Vec<u8>> {
        let data = std::fs::read(repo_root.join(&self.file_path))?;
        let start = self.byte_start as usize;
        let end = self.byte_end as usize;
        Ok(data.get(start..end).unwrap_or_default().to_vec())
    }

    /// Read the span's bytes decoded as (lossy) UTF-8.
    pub fn read_source(&self, repo_root: &Path) -> std::io::Result<String> {
        Ok(String::from_utf8_lossy(&self.read_bytes(repo_root)?).into_owned())
    }
}

/// A span queued for enrichment or embedding (a lighter projection of `SpanRecord`).
#[derive(Debug, Clone, PartialEq)]
pub struct SpanWorkItem {
    /// Span identity.
    pub span_hash: String,
    /// Owning file path.
    pub file_path: PathBuf,
    /// Language tag.
    pub lang: String,
    /// 1-based inclusive start line.
    pub start_line: u32,
    /// 1-based inclusive end line.
    pub end_line: u32,
    /// Byte offset start.
    pub byte_start: u64,
    /// Byte offset end.
    pub byte_end: u64,
    /// Content routing classification.
    pub slice_type: SliceType,
    /// Classifier-detected finer-grained language.
    pub slice_language: Option<String>,
    /// Classifier confidence.
    pub classifier_confidence: f64,
    /// Dotted symbol name, when known (present for embedding work items).
    pub symbol: Option<String>,
}

impl SpanWorkItem {
    /// Read the span's raw bytes from disk relative to `repo_root`.
    pub fn read_bytes(&self, repo_root: &Path) -> std::io::Result<Vec<u8>> {
        let data = std::fs::read(repo_root.join(&self.file_path))?;
        let start = self.byte_start as usize;
        let end = self.byte_end as usize;
        Ok(data.get(start..end).unwrap_or_default().to_vec())
    }

    /// Read the span's bytes decoded as (lossy) UTF-8.
    pub fn read_source(&self, repo_root: &Path) -> std::io::Result<String> {
        Ok(String::from_utf8_lossy(&self.read_bytes(repo_root)?).into_owned())
    }
}

/// One piece of evidence tying an enrichment claim to specific source lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Which enrichment field this evidence supports (e.g. "summary_120w").
    pub field: String,
    /// `[start, end]` line pair, both inside the owning span's range.
    pub lines: [u32; 2],
}

/// The LLM-facing enrichment payload (wire schema, `schema_version` = "enrichment.v1").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentPayload {
    /// Summary of the span, at most 120 words.
    pub summary_120w: String,
    /// Inputs the span consumes.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Outputs the span produces.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Side effects caused by the span.
    #[serde(default)]
    pub side_effects: Vec<String>,
    /// Pitfalls or gotchas when calling the span.
    #[serde(default)]
    pub pitfalls: Vec<String>,
    /// Usage example, at most 12 lines, nullable.
    #[serde(default)]
    pub usage_snippet: Option<String>,
    /// Evidence for summary/field claims.
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// LLM model identifier, if the backend reports one in-band.
    #[serde(default)]
    pub model: Option<String>,
    /// Schema version tag.
    #[serde(default)]
    pub schema_version: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Canonical enrichment schema version this crate produces and expects.
pub const ENRICHMENT_SCHEMA_VERSION: &str = "enrichment.v1";

/// Performance metadata reported by a backend alongside its generation result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendMeta {
    /// Model identifier actually used.
    pub model: Option<String>,
    /// Tokens generated per second.
    pub tokens_per_second: Option<f64>,
    /// Number of tokens evaluated (generation).
    pub eval_count: Option<i64>,
    /// Generation duration in nanoseconds.
    pub eval_duration_ns: Option<i64>,
    /// Number of tokens evaluated (prompt).
    pub prompt_eval_count: Option<i64>,
    /// Total duration in nanoseconds (prompt + generation).
    pub total_duration_ns: Option<i64>,
    /// Host that served the request.
    pub host: Option<String>,
}

/// A row-level projection of a stored enrichment, joined with its span's symbol.
#[derive(Debug, Clone)]
pub struct EnrichmentRecord {
    /// Owning span's hash.
    pub span_hash: String,
    /// Owning span's dotted symbol.
    pub symbol: String,
    /// Summary text.
    pub summary: Option<String>,
    /// JSON-encoded evidence list.
    pub evidence: Option<String>,
    /// JSON-encoded inputs list.
    pub inputs: Option<String>,
    /// JSON-encoded outputs list.
    pub outputs: Option<String>,
    /// JSON-encoded side_effects list.
    pub side_effects: Option<String>,
    /// JSON-encoded pitfalls list.
    pub pitfalls: Option<String>,
    /// Usage snippet text.
    pub usage_snippet: Option<String>,
    /// Comma-joined tags.
    pub tags: Option<String>,
    /// Model id used.
    pub model: Option<String>,
    /// Creation timestamp (Unix seconds, as stored).
    pub created_at: Option<i64>,
    /// Schema version string.
    pub schema_ver: Option<String>,
}

/// A work item pulled from the global Work Queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Row id in the work queue database.
    pub id: i64,
    /// Absolute path to the repository root.
    pub repo_path: String,
    /// Span identity.
    pub span_hash: String,
    /// File path relative to the repo root.
    pub file_path: String,
    /// Priority (lower = more urgent).
    pub priority: i64,
    /// Unix timestamp (fractional) when the item was pushed.
    pub created_at: i64,
    /// Number of attempts recorded at the current tier.
    pub attempts: i64,
    /// Current escalation tier.
    pub escalation_tier: i64,
}

/// A node in the symbol/file graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Stable symbol string (e.g. `sym:module.Class.func`) or file path.
    pub id: String,
    /// Short display name.
    pub name: String,
    /// Owning file path.
    pub path: String,
    /// Node kind (function, class, file, ...).
    pub kind: Option<String>,
    /// Start line, if applicable.
    pub start_line: Option<i64>,
    /// End line, if applicable.
    pub end_line: Option<i64>,
    /// Arbitrary JSON metadata (includes `span_hash` when derived from a span).
    pub metadata: Option<serde_json::Value>,
}

/// A directed labeled edge between two graph node ids.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Edge label (CALLS, IMPORTS, EXTENDS, READS, WRITES, USES, REFERENCES, REQUIRES, WARNS_ABOUT).
    pub edge_type: String,
    /// Arbitrary JSON metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Per-repo freshness record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Repository identifier (typically its absolute path).
    pub repo: String,
    /// Current index state.
    pub index_state: IndexState,
    /// ISO-8601 UTC timestamp of the last successful index run.
    pub last_indexed_at: String,
    /// Git commit indexed at `last_indexed_at`, if known.
    pub last_indexed_commit: Option<String>,
    /// Schema version string.
    pub schema_version: String,
    /// Last error message, if the most recent run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Index freshness state as recorded in `index_status.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// Index reflects the current working tree.
    Fresh,
    /// Index is known to lag behind the working tree.
    Stale,
    /// An index run is currently in progress.
    Rebuilding,
    /// The last index run failed.
    Error,
}

/// Freshness as determined by the retrieval facade's `compute_route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreshnessState {
    /// Index state is fresh and matches the current git HEAD.
    Fresh,
    /// Index lags the working tree or a prior run failed.
    Stale,
    /// No freshness signal is available (missing status file, no HEAD, ...).
    Unknown,
}

/// Routing decision produced by `compute_route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    /// Whether to use the graph-backed (RAG) retrieval path.
    pub use_rag: bool,
    /// The freshness state that produced this decision.
    pub freshness_state: FreshnessState,
}
