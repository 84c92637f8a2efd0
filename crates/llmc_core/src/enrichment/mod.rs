//! Multi-backend enrichment engine: route → prompt → cascade → parse → validate → persist.
//!
//! Three concurrency variants share the same single-item contract: [`engine_v1`] processes
//! items on a single thread (tests, debugging, and the code-first scheduler), [`engine_v2`]
//! runs a conveyor belt of async worker pools feeding a single serialized writer, and
//! [`engine_v3`] is the multi-process pool-worker mode bound to the global work queue.

pub mod backend;
pub mod cascade;
pub mod engine_v1;
pub mod engine_v2;
pub mod engine_v3;
pub mod parse;
pub mod prompt;
pub mod router;
pub mod validate;

use crate::enrichment::backend::HttpBackend;
use crate::enrichment::cascade::run_cascade;
use crate::enrichment::parse::parse_enrichment;
use crate::enrichment::prompt::PromptBuilder;
use crate::enrichment::validate::validate;
use crate::types::{BackendMeta, EnrichmentPayload, SpanWorkItem};

/// Outcome of processing a single work item through the shared pipeline.
#[derive(Debug)]
pub enum ItemOutcome {
    /// Enrichment succeeded and was persisted.
    Success {
        /// The validated payload that was written.
        payload: EnrichmentPayload,
        /// Backend performance metadata.
        meta: BackendMeta,
    },
    /// Enrichment failed; the item should be requeued (or escalated/permanently failed by
    /// the caller, via the work queue's `fail_work`).
    Failed {
        /// Human-readable failure reason, stored as `last_error`.
        reason: String,
    },
}

/// Input to the shared single-item pipeline.
#[derive(Debug, Clone)]
pub struct EnrichmentItem {
    /// Span identity.
    pub span_hash: String,
    /// Source code (or doc text) snippet for the span.
    pub code_snippet: String,
    /// Owning file path, for prompt context and path-based routing.
    pub file_path: String,
    /// 1-based inclusive line range.
    pub line_range: (u32, u32),
    /// Content routing type (code/docs/config/other), as a string for prompt templating.
    pub content_type: String,
    /// Classifier confidence for this span.
    pub classifier_confidence: f64,
}

/// Run the shared route → prompt → cascade → parse → validate pipeline for one item against
/// an already-built backend chain. All three concurrency variants call this; only how they
/// obtain items and persist outcomes differs.
pub async fn process_item(
    item: &EnrichmentItem,
    backends: &[HttpBackend],
    prompt_builder: &PromptBuilder,
    max_tokens: u32,
    enforce_latin1: bool,
) -> ItemOutcome {
    let prompt = prompt_builder.build(item);

    let (result, _attempts) = match run_cascade(backends, &prompt, max_tokens).await {
        Ok(r) => r,
        Err(e) => return ItemOutcome::Failed { reason: e.to_string() },
    };

    let payload = match parse_enrichment(&result.text) {
        Ok(p) => p,
        Err(e) => return ItemOutcome::Failed { reason: e.to_string() },
    };

    if let Err(e) = validate(&payload, item.line_range.0, item.line_range.1, enforce_latin1) {
        return ItemOutcome::Failed { reason: e.to_string() };
    }

    ItemOutcome::Success { payload, meta: result.meta }
}

/// Project a [`SpanWorkItem`] into the pipeline's [`EnrichmentItem`] input, reading the
/// span's source text from disk.
pub fn enrichment_item_for(repo_root: &std::path::Path, span: &SpanWorkItem) -> std::io::Result<EnrichmentItem> {
    Ok(EnrichmentItem {
        span_hash: span.span_hash.clone(),
        code_snippet: span.read_source(repo_root)?,
        file_path: span.file_path.to_string_lossy().into_owned(),
        line_range: (span.start_line, span.end_line),
        content_type: span.slice_type.as_str().to_string(),
        classifier_confidence: span.classifier_confidence,
    })
}
