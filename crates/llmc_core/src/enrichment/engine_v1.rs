//! V1 — single-threaded enrichment loop, suitable for tests and debugging.
//!
//! Includes a code-first scheduler: pending items are bucketed by path-weight priority
//! (the same weighting the work queue uses) into a "code-ish" queue and a "docs" queue,
//! then interleaved at a configurable starvation ratio so a repo with many doc spans
//! doesn't starve code enrichment (or vice versa).

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{BackendConfig, EnrichmentConfig};
use crate::enrichment::backend::HttpBackend;
use crate::enrichment::prompt::PromptBuilder;
use crate::enrichment::router::Router;
use crate::enrichment::{enrichment_item_for, process_item, ItemOutcome};
use crate::error::Result;
use crate::span_store::SpanStore;
use crate::types::SpanWorkItem;
use crate::work_queue::calculate_priority;

/// Ratio of code-ish items to doc items drawn per scheduling round.
#[derive(Debug, Clone, Copy)]
pub struct StarvationRatio {
    pub high: usize,
    pub low: usize,
}

impl Default for StarvationRatio {
    fn default() -> Self {
        Self { high: 5, low: 1 }
    }
}

const DOC_PRIORITY_THRESHOLD: i64 = 7;

/// Orders pending items so docs get a guaranteed, but minority, share of each pass.
pub struct CodeFirstScheduler {
    ratio: StarvationRatio,
}

impl CodeFirstScheduler {
    pub fn new(ratio: StarvationRatio) -> Self {
        Self { ratio }
    }

    /// Interleave `items` (already fetched from the store) into processing order.
    pub fn schedule(&self, items: Vec<SpanWorkItem>) -> Vec<SpanWorkItem> {
        let mut code_ish: Vec<SpanWorkItem> = Vec::new();
        let mut docs: Vec<SpanWorkItem> = Vec::new();
        for item in items {
            let path = item.file_path.to_string_lossy().into_owned();
            if calculate_priority(&path) >= DOC_PRIORITY_THRESHOLD {
                docs.push(item);
            } else {
                code_ish.push(item);
            }
        }

        let mut ordered = Vec::with_capacity(code_ish.len() + docs.len());
        let mut code_iter = code_ish.into_iter();
        let mut doc_iter = docs.into_iter();
        loop {
            let mut took_any = false;
            for _ in 0..self.ratio.high {
                if let Some(item) = code_iter.next() {
                    ordered.push(item);
                    took_any = true;
                }
            }
            for _ in 0..self.ratio.low {
                if let Some(item) = doc_iter.next() {
                    ordered.push(item);
                    took_any = true;
                }
            }
            if !took_any {
                break;
            }
        }
        ordered
    }
}

/// Summary of a single V1 enrichment pass.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentRunReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

fn build_backends(specs: &[BackendConfig], timeout: Duration) -> Vec<HttpBackend> {
    specs.iter().cloned().map(|c| HttpBackend::new(c, timeout)).collect()
}

/// Run one single-threaded enrichment pass over up to `limit` pending spans in `repo_root`.
pub async fn run_v1(
    repo_root: &Path,
    store: &mut SpanStore,
    cfg: &EnrichmentConfig,
    cooldown_seconds: i64,
    limit: usize,
    ratio: StarvationRatio,
) -> Result<EnrichmentRunReport> {
    let pending = store.pending_enrichments(limit, cooldown_seconds)?;
    let scheduler = CodeFirstScheduler::new(ratio);
    let ordered = scheduler.schedule(pending);

    let router = Router::new(cfg.backends.clone());
    let prompt_builder = PromptBuilder::new(None, 8000);
    let timeout = Duration::from_secs(cfg.timeout_seconds);

    let mut report = EnrichmentRunReport::default();
    for span in &ordered {
        let item = match enrichment_item_for(repo_root, span) {
            Ok(i) => i,
            Err(e) => {
                warn!(span_hash = %span.span_hash, error = %e, "failed to read span source, skipping");
                continue;
            }
        };
        report.attempted += 1;

        let route = router.route(&item);
        let backends = build_backends(&route.backend_specs, timeout);
        let outcome = process_item(&item, &backends, &prompt_builder, cfg.max_tokens, false).await;

        match outcome {
            ItemOutcome::Success { payload, meta } => {
                let symbol = span.symbol.as_deref().unwrap_or_default();
                store.store_enrichment(&span.span_hash, symbol, &payload, &meta)?;
                report.succeeded += 1;
            }
            ItemOutcome::Failed { reason } => {
                warn!(span_hash = %span.span_hash, reason, "enrichment failed");
                report.failed += 1;
            }
        }
    }

    info!(attempted = report.attempted, succeeded = report.succeeded, failed = report.failed, "v1 enrichment pass complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SliceType;
    use std::path::PathBuf;

    fn item(path: &str) -> SpanWorkItem {
        SpanWorkItem {
            span_hash: format!("hash-{path}"),
            file_path: PathBuf::from(path),
            lang: "python".into(),
            start_line: 1,
            end_line: 2,
            byte_start: 0,
            byte_end: 1,
            slice_type: SliceType::Code,
            slice_language: Some("python".into()),
            classifier_confidence: 0.9,
            symbol: Some("x".into()),
        }
    }

    #[test]
    fn scheduler_interleaves_at_configured_ratio() {
        let code_items: Vec<SpanWorkItem> = (0..10).map(|i| item(&format!("src/a{i}.rs"))).collect();
        let doc_items: Vec<SpanWorkItem> = (0..10).map(|i| item(&format!("docs/b{i}.md"))).collect();
        let mut all = code_items;
        all.extend(doc_items);

        let scheduler = CodeFirstScheduler::new(StarvationRatio { high: 5, low: 1 });
        let ordered = scheduler.schedule(all);

        assert_eq!(ordered.len(), 20);
        let is_doc = |p: &SpanWorkItem| p.file_path.to_string_lossy().contains("docs/");
        // First six items should be 5 code + 1 doc per the configured ratio.
        let first_six_docs = ordered[..6].iter().filter(|i| is_doc(i)).count();
        assert_eq!(first_six_docs, 1);
    }

    #[test]
    fn scheduler_never_fully_starves_docs() {
        let code_items: Vec<SpanWorkItem> = (0..50).map(|i| item(&format!("src/a{i}.rs"))).collect();
        let doc_items: Vec<SpanWorkItem> = (0..3).map(|i| item(&format!("docs/b{i}.md"))).collect();
        let mut all = code_items;
        all.extend(doc_items);

        let scheduler = CodeFirstScheduler::new(StarvationRatio::default());
        let ordered = scheduler.schedule(all);
        let doc_count = ordered.iter().filter(|i| i.file_path.to_string_lossy().contains("docs/")).count();
        assert_eq!(doc_count, 3);
    }
}
