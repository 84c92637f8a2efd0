//! llmc Core Library
//!
//! A repository-aware code indexing and retrieval engine, providing:
//! - Content-addressed span storage with differential reindexing
//! - A multi-backend LLM enrichment engine (single-threaded, async conveyor, and
//!   multi-process pool-worker concurrency models)
//! - A derived symbol/call graph for navigation (where-used, lineage)
//! - Hybrid retrieval: full-text search + reranking + graph stitch, with a
//!   deterministic local fallback when the index is stale
//!
//! # Quick Start
//!
//! ```
//! use llmc_core::{SpanStore, FileRecord};
//! use std::path::PathBuf;
//!
//! let store = SpanStore::open_in_memory().unwrap();
//! let file = FileRecord {
//!     path: PathBuf::from("src/lib.rs"),
//!     lang: "rust".into(),
//!     file_hash: "deadbeef".into(),
//!     size: 42,
//!     mtime: 0.0,
//! };
//! store.upsert_file(&file).unwrap();
//! ```
//!
//! # Differential Reindexing
//!
//! Spans are keyed by a content-addressed hash, so re-extracting a file whose
//! functions didn't change preserves their enrichments across edits:
//!
//! ```
//! use llmc_core::{SpanStore, FileRecord, SpanRecord, SliceType};
//! use std::path::PathBuf;
//!
//! let mut store = SpanStore::open_in_memory().unwrap();
//! store.upsert_file(&FileRecord {
//!     path: PathBuf::from("a.py"), lang: "python".into(),
//!     file_hash: "h1".into(), size: 10, mtime: 0.0,
//! }).unwrap();
//!
//! let span = SpanRecord {
//!     file_path: PathBuf::from("a.py"), lang: "python".into(),
//!     symbol: "bar".into(), kind: "function".into(),
//!     start_line: 1, end_line: 1, byte_start: 0, byte_end: 10,
//!     span_hash: "same-hash".into(), doc_hint: None, imports: vec![],
//!     slice_type: SliceType::Code, slice_language: None,
//!     classifier_confidence: 1.0, classifier_version: "v1".into(),
//! };
//! store.replace_spans("a.py", &[span.clone()]).unwrap();
//! // Re-extracting the same content yields the same span_hash; replacing with
//! // an identical set is a no-op for the unchanged row.
//! store.replace_spans("a.py", &[span]).unwrap();
//! assert_eq!(store.spans_for_file("a.py").unwrap().len(), 1);
//! ```

pub mod classifier;
pub mod config;
pub mod doctor;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod extractor;
pub mod facade;
pub mod graph_store;
pub mod hashing;
pub mod ignore_rules;
pub mod indexer;
pub mod repo_paths;
pub mod rerank;
pub mod schema_graph;
pub mod scoring;
pub mod span_store;
pub mod stitch;
pub mod types;
pub mod work_queue;

pub use classifier::{classify, Classification};
pub use config::{
    BackendConfig, Config, EnrichmentConfig, IgnoreConfig, RerankConfig, RetrievalConfig,
    ScoringConfig, WorkQueueConfig,
};
pub use doctor::{run_doctor, DoctorReport, HealthStatus, PendingFile};
pub use enrichment::{enrichment_item_for, process_item, EnrichmentItem, ItemOutcome};
pub use error::{LlmcError, Result};
pub use export::export_all_data;
pub use extractor::{ExtractedSpan, RegexExtractor, SpanExtractor};
pub use facade::{
    compute_route, grep_snippets, load_status, save_status, tool_rag_lineage, tool_rag_search,
    tool_rag_where_used, LineageDirection, LineageItem, LineageResult, SearchItem, SearchResult,
    Snippet, SnippetLocation, SourceTag, WhereUsedItem, WhereUsedResult,
};
pub use graph_store::{build_from_json, graph_paths, GraphStore};
pub use hashing::{file_hash, sha256_hex, span_hash};
pub use ignore_rules::{discover_files, DiscoveredFile};
pub use indexer::{IndexRunReport, Indexer};
pub use rerank::{normalize_bm25, rerank_hits, RankedHit, RerankWeights};
pub use schema_graph::{build_schema_graph, load_graph_store, write_schema_graph, BuildMode, SchemaGraphArtifact};
pub use scoring::{detect_intent, score_extension, score_filename_match, QueryIntent};
pub use span_store::{FtsHit, SpanStore, SpanStoreStats};
pub use stitch::{expand_search_items, stitch_neighbors, Neighbor};
pub use types::{
    BackendMeta, EnrichmentPayload, EnrichmentRecord, Evidence, FileRecord, FreshnessState,
    GraphEdge, GraphNode, IndexState, IndexStatus, RouteDecision, SliceType, SpanRecord,
    SpanWorkItem, WorkItem, ENRICHMENT_SCHEMA_VERSION,
};
pub use work_queue::{calculate_priority, QueueStats, WorkQueue};
