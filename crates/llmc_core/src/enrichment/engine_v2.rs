//! V2 — the conveyor belt: a single-process, async concurrency model.
//!
//! A feeder task pulls pending spans from the Span Store and hands each one to the worker
//! pool bound to its routed backend. Each pool is its own bounded channel plus a semaphore
//! of depth `pool_concurrency`, so a slow or overloaded backend can't starve requests routed
//! to another. Every pool still runs the full cascade (its assigned backend first, the rest
//! as fallback) so a single unreachable backend doesn't fail items outright. Completed items
//! are posted to one completion channel drained by a single writer task, which is the only
//! task that ever touches the Span Store connection — batching commits up to 50 items or
//! every 5 seconds, whichever comes first.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::EnrichmentConfig;
use crate::enrichment::backend::HttpBackend;
use crate::enrichment::prompt::PromptBuilder;
use crate::enrichment::router::Router;
use crate::enrichment::{enrichment_item_for, process_item, ItemOutcome};
use crate::error::Result;
use crate::span_store::SpanStore;
use crate::types::{BackendMeta, EnrichmentPayload, SpanWorkItem};

/// Maximum items the writer batches before forcing a commit.
const WRITER_BATCH_SIZE: usize = 50;
/// Maximum time the writer waits before flushing a partial batch.
const WRITER_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Depth of each per-backend feed channel.
const FEED_QUEUE_DEPTH: usize = 256;
/// Depth of the worker-pool -> writer completion channel.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Summary of one conveyor-belt run.
#[derive(Debug, Clone, Default)]
pub struct ConveyorReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: bool,
}

struct WriteRequest {
    span_hash: String,
    symbol: String,
    outcome: WriteOutcome,
}

enum WriteOutcome {
    Success { payload: EnrichmentPayload, meta: BackendMeta },
    Failed,
}

/// Run the conveyor belt over up to `limit` pending spans in `repo_root`, with an overall
/// wall-clock budget. On expiry, in-flight futures are cancelled (aborted) and whatever the
/// writer already committed stands — no partial item is left half-written.
pub async fn run_v2(
    repo_root: &Path,
    store: &mut SpanStore,
    cfg: &EnrichmentConfig,
    cooldown_seconds: i64,
    limit: usize,
    pool_concurrency: usize,
    overall_timeout: Duration,
) -> Result<ConveyorReport> {
    let pending = store.pending_enrichments(limit, cooldown_seconds)?;
    if pending.is_empty() {
        return Ok(ConveyorReport::default());
    }
    if cfg.backends.is_empty() {
        return Ok(ConveyorReport { attempted: pending.len(), failed: pending.len(), ..Default::default() });
    }

    let attempted = pending.len();
    let router = Router::new(cfg.backends.clone());
    let prompt_builder = Arc::new(PromptBuilder::new(None, 8000));
    let backend_timeout = Duration::from_secs(cfg.timeout_seconds);
    let repo_root = Arc::new(repo_root.to_path_buf());
    let max_tokens = cfg.max_tokens;

    let (write_tx, mut write_rx) = mpsc::channel::<WriteRequest>(WRITE_QUEUE_DEPTH);

    // One bounded channel + worker pool per configured backend. Each pool's cascade list is
    // the full backend set, rotated so its assigned backend is tried first.
    let mut feed_senders = Vec::with_capacity(cfg.backends.len());
    let mut pool_handles = Vec::with_capacity(cfg.backends.len());
    for pool_index in 0..cfg.backends.len() {
        let (feed_tx, mut feed_rx) = mpsc::channel::<SpanWorkItem>(FEED_QUEUE_DEPTH);
        feed_senders.push(feed_tx);

        let mut cascade_specs = cfg.backends.clone();
        cascade_specs.rotate_left(pool_index);
        let backends: Vec<HttpBackend> = cascade_specs.into_iter().map(|c| HttpBackend::new(c, backend_timeout)).collect();
        let semaphore = Arc::new(Semaphore::new(pool_concurrency.max(1)));
        let write_tx = write_tx.clone();
        let prompt_builder = Arc::clone(&prompt_builder);
        let repo_root = Arc::clone(&repo_root);

        let handle = tokio::spawn(async move {
            let backends = Arc::new(backends);
            while let Some(span) = feed_rx.recv().await {
                let permit = semaphore.clone().acquire_owned().await;
                let backends = Arc::clone(&backends);
                let write_tx = write_tx.clone();
                let prompt_builder = Arc::clone(&prompt_builder);
                let repo_root = Arc::clone(&repo_root);

                tokio::spawn(async move {
                    let _permit = permit;
                    let item = match enrichment_item_for(&repo_root, &span) {
                        Ok(i) => i,
                        Err(e) => {
                            warn!(span_hash = %span.span_hash, error = %e, "failed to read span source");
                            return;
                        }
                    };
                    let outcome = process_item(&item, &backends, &prompt_builder, max_tokens, false).await;
                    let write_outcome = match outcome {
                        ItemOutcome::Success { payload, meta } => WriteOutcome::Success { payload, meta },
                        ItemOutcome::Failed { reason } => {
                            warn!(span_hash = %span.span_hash, reason, "enrichment failed");
                            WriteOutcome::Failed
                        }
                    };
                    let _ = write_tx
                        .send(WriteRequest {
                            span_hash: span.span_hash.clone(),
                            symbol: span.symbol.clone().unwrap_or_default(),
                            outcome: write_outcome,
                        })
                        .await;
                });
            }
        });
        pool_handles.push(handle);
    }
    drop(write_tx);

    // Feeder: route every pending span to the pool whose backend chain puts it first.
    let backend_names: Vec<String> = cfg.backends.iter().map(|b| b.name.clone()).collect();
    let feeder = tokio::spawn(async move {
        for span in pending {
            let item = match enrichment_item_for(&repo_root, &span) {
                Ok(i) => i,
                Err(_) => continue,
            };
            let route = router.route(&item);
            let preferred = route.backend_specs.first().map(|b| b.name.as_str()).unwrap_or("");
            let pool_index = backend_names.iter().position(|n| n == preferred).unwrap_or(0);
            if feed_senders[pool_index].send(span).await.is_err() {
                break;
            }
        }
    });

    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let deadline = Instant::now() + overall_timeout;
    let mut batch = Vec::with_capacity(WRITER_BATCH_SIZE);
    let mut last_flush = Instant::now();
    let mut timed_out = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            timed_out = true;
            break;
        }
        let flush_wait = WRITER_FLUSH_INTERVAL.saturating_sub(last_flush.elapsed());

        tokio::select! {
            maybe_req = write_rx.recv() => {
                match maybe_req {
                    Some(req) => {
                        batch.push(req);
                        if batch.len() >= WRITER_BATCH_SIZE {
                            flush_batch(store, &mut batch, &succeeded, &failed);
                            last_flush = Instant::now();
                        }
                    }
                    None => {
                        flush_batch(store, &mut batch, &succeeded, &failed);
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(flush_wait) => {
                if !batch.is_empty() {
                    flush_batch(store, &mut batch, &succeeded, &failed);
                    last_flush = Instant::now();
                }
            }
            _ = tokio::time::sleep(remaining) => {
                timed_out = true;
                flush_batch(store, &mut batch, &succeeded, &failed);
                break;
            }
        }
    }

    if timed_out {
        feeder.abort();
        for handle in &pool_handles {
            handle.abort();
        }
    } else {
        let _ = feeder.await;
        for handle in pool_handles {
            let _ = handle.await;
        }
    }

    let report = ConveyorReport {
        attempted,
        succeeded: succeeded.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
        timed_out,
    };
    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed,
        timed_out = report.timed_out,
        "v2 conveyor belt pass complete"
    );
    Ok(report)
}

fn flush_batch(store: &SpanStore, batch: &mut Vec<WriteRequest>, succeeded: &AtomicUsize, failed: &AtomicUsize) {
    for req in batch.drain(..) {
        match req.outcome {
            WriteOutcome::Success { payload, meta } => match store.store_enrichment(&req.span_hash, &req.symbol, &payload, &meta) {
                Ok(()) => {
                    succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(span_hash = %req.span_hash, error = %e, "writer failed to commit enrichment");
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            },
            WriteOutcome::Failed => {
                failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Resolve a repo's spans.jsonl export path relative to its root, for callers that need it
/// alongside a V2 run (kept here rather than duplicated at call sites).
pub fn spans_jsonl_for(repo_root: &Path) -> PathBuf {
    crate::repo_paths::spans_jsonl(repo_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_pending_queue_returns_immediately() {
        let mut store = SpanStore::open_in_memory().unwrap();
        let cfg = EnrichmentConfig::default();
        let report = run_v2(Path::new("/tmp"), &mut store, &cfg, 0, 10, 2, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.attempted, 0);
        assert!(!report.timed_out);
    }

    #[tokio::test]
    async fn no_backends_fails_every_pending_item() {
        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&crate::types::FileRecord {
                path: PathBuf::from("a.py"),
                lang: "python".into(),
                file_hash: "h".into(),
                size: 1,
                mtime: 0.0,
            })
            .unwrap();
        store
            .replace_spans(
                "a.py",
                &[crate::types::SpanRecord {
                    file_path: PathBuf::from("a.py"),
                    lang: "python".into(),
                    symbol: "bar".into(),
                    kind: "function".into(),
                    start_line: 1,
                    end_line: 1,
                    byte_start: 0,
                    byte_end: 1,
                    span_hash: "h1".into(),
                    doc_hint: None,
                    imports: vec![],
                    slice_type: crate::types::SliceType::Code,
                    slice_language: None,
                    classifier_confidence: 1.0,
                    classifier_version: "v1".into(),
                }],
            )
            .unwrap();

        let mut cfg = EnrichmentConfig::default();
        cfg.backends.clear();
        let report = run_v2(Path::new("/tmp"), &mut store, &cfg, 0, 10, 2, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
    }
}
