//! V3 — multi-process pool workers, each bound at startup to one backend (host + model) via
//! environment inputs, pulling from the **global** Work Queue (C3) shared by every repo on
//! the machine. Each worker is internally synchronous: wait on the FIFO (timeout 5s) -> pull
//! 1 item -> fetch the span from the owning repo's Span Store -> build prompt -> call the
//! backend -> parse/validate -> store -> complete_work (or fail_work on any error, which
//! applies the tier escalation policy).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::BackendConfig;
use crate::enrichment::backend::HttpBackend;
use crate::enrichment::prompt::PromptBuilder;
use crate::enrichment::{enrichment_item_for, process_item, ItemOutcome};
use crate::error::{LlmcError, Result};
use crate::span_store::SpanStore;
use crate::types::WorkItem;
use crate::work_queue::WorkQueue;

/// How long `wait_for_work` blocks on the notification FIFO before falling back to a poll.
const FIFO_WAIT_MS: u64 = 5_000;
/// Items pulled per `pull_work` call. V3 workers process one at a time (per spec's
/// per-worker loop), but `pull_work` itself supports a batch size for future tuning.
const PULL_LIMIT: i64 = 1;

/// A pool worker's environment-derived configuration (`LLMC_WORKER_*`).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `LLMC_WORKER_ID` — required, unique per process.
    pub worker_id: String,
    /// `LLMC_WORKER_HOST` — required, backend base URL.
    pub host: String,
    /// `LLMC_WORKER_PORT` — required, backend port.
    pub port: u16,
    /// `LLMC_WORKER_MODEL` — required, model identifier to request.
    pub model: String,
    /// `LLMC_WORKER_TIER` — escalation tier this worker pulls from (default 0).
    pub tier: i64,
    /// `LLMC_MAX_TIER` — highest tier before permanent failure (default 1).
    pub max_tier: i64,
    /// `LLMC_WORKER_TIMEOUT` — per-request timeout, seconds (default 60).
    pub timeout_seconds: u64,
    /// `LLMC_WORKER_OPTIONS` — raw JSON passed through to the backend, currently unused by
    /// the Ollama-compatible adapter beyond `num_predict` (kept for forward compatibility).
    pub options_json: Option<String>,
    /// `LLMC_WORKER_MAX_ATTEMPTS` — attempts per tier before escalation (default 3).
    pub attempts_per_tier: i64,
    /// `LLMC_QUEUE_DB` — override path to the global work queue database.
    pub queue_db: Option<PathBuf>,
}

impl WorkerConfig {
    /// Read configuration from the process environment. Missing required variables fail
    /// fast per the config error taxonomy — a worker never silently guesses a host or model.
    pub fn from_env() -> Result<Self> {
        let worker_id = require_env("LLMC_WORKER_ID")?;
        let host = require_env("LLMC_WORKER_HOST")?;
        let port: u16 = require_env("LLMC_WORKER_PORT")?
            .parse()
            .map_err(|_| LlmcError::MissingConfig("LLMC_WORKER_PORT must be a valid port number".into()))?;
        let model = require_env("LLMC_WORKER_MODEL")?;

        let tier = optional_env("LLMC_WORKER_TIER").and_then(|v| v.parse().ok()).unwrap_or(0);
        let max_tier = optional_env("LLMC_MAX_TIER").and_then(|v| v.parse().ok()).unwrap_or(1);
        let timeout_seconds = optional_env("LLMC_WORKER_TIMEOUT").and_then(|v| v.parse().ok()).unwrap_or(60);
        let options_json = optional_env("LLMC_WORKER_OPTIONS");
        let attempts_per_tier = optional_env("LLMC_WORKER_MAX_ATTEMPTS").and_then(|v| v.parse().ok()).unwrap_or(3);
        let queue_db = optional_env("LLMC_QUEUE_DB").map(PathBuf::from);

        Ok(Self { worker_id, host, port, model, tier, max_tier, timeout_seconds, options_json, attempts_per_tier, queue_db })
    }

    fn backend_config(&self) -> BackendConfig {
        BackendConfig { name: self.worker_id.clone(), base_url: format!("{}:{}", self.host, self.port), model: self.model.clone(), api_key_env: None }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| LlmcError::MissingConfig(key.to_string()))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Summary of a worker's run, for process exit-code decisions.
#[derive(Debug, Clone, Default)]
pub struct WorkerRunReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Flags set by the process-wide SIGTERM/SIGINT handler, checked by every running worker's
/// main loop. The handler itself only sets an atomic, which is async-signal-safe; it never
/// touches the queue or span store directly.
static RUNNING_FLAGS: std::sync::Mutex<Vec<Arc<AtomicBool>>> = std::sync::Mutex::new(Vec::new());

extern "C" fn clear_running_flags(_signum: i32) {
    if let Ok(flags) = RUNNING_FLAGS.lock() {
        for f in flags.iter() {
            f.store(false, Ordering::SeqCst);
        }
    }
}

/// Install a SIGTERM/SIGINT handler that flips the returned flag to false. The worker's main
/// loop checks this flag between items, letting the current item finish before exiting —
/// never interrupting an in-flight backend call or store write.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    RUNNING_FLAGS.lock().unwrap().push(Arc::clone(&running));

    let handler = nix::sys::signal::SigHandler::Handler(clear_running_flags);
    unsafe {
        nix::sys::signal::signal(nix::sys::signal::Signal::SIGTERM, handler)
            .map_err(|e| LlmcError::Config(format!("failed to install SIGTERM handler: {e}")))?;
        nix::sys::signal::signal(nix::sys::signal::Signal::SIGINT, handler)
            .map_err(|e| LlmcError::Config(format!("failed to install SIGINT handler: {e}")))?;
    }
    Ok(running)
}

/// Run the worker's main loop until `running` is cleared (by a signal) or `max_iterations`
/// items have been processed (tests pass a small cap instead of running forever).
pub async fn run_worker(cfg: &WorkerConfig, running: Arc<AtomicBool>, max_iterations: Option<usize>) -> Result<WorkerRunReport> {
    let queue_db = cfg.queue_db.clone().unwrap_or_else(crate::repo_paths::global_work_queue_db);
    if let Some(parent) = queue_db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut queue = WorkQueue::open(&queue_db)?;

    let backend = HttpBackend::new(cfg.backend_config(), Duration::from_secs(cfg.timeout_seconds));
    let backends = [backend];
    let prompt_builder = PromptBuilder::new(None, 8000);

    let mut report = WorkerRunReport::default();
    let mut iterations = 0usize;

    while running.load(Ordering::SeqCst) {
        if let Some(max) = max_iterations {
            if iterations >= max {
                break;
            }
        }
        iterations += 1;

        if !queue.wait_for_work(FIFO_WAIT_MS)? {
            // Best-effort signal; a negative/timeout result just means poll again. Since
            // there's no separate poll interval configured, the FIFO wait itself doubles
            // as the poll cadence.
            continue;
        }

        let items = queue.pull_work(&cfg.worker_id, cfg.tier, PULL_LIMIT)?;
        let Some(item) = items.into_iter().next() else {
            continue;
        };

        report.processed += 1;
        match process_one(&item, &cfg.worker_id, &backends, &prompt_builder, &queue).await {
            Ok(()) => {
                report.succeeded += 1;
            }
            Err(e) => {
                warn!(item_id = item.id, span_hash = %item.span_hash, error = %e, "work item failed");
                if let Err(fail_err) = queue.fail_work(item.id, &e.to_string(), Some(&cfg.worker_id), cfg.max_tier, cfg.attempts_per_tier) {
                    warn!(item_id = item.id, error = %fail_err, "failed to record work-item failure");
                }
                report.failed += 1;
            }
        }
    }

    info!(worker_id = %cfg.worker_id, processed = report.processed, succeeded = report.succeeded, failed = report.failed, "worker drained");
    Ok(report)
}

async fn process_one(
    item: &WorkItem,
    worker_id: &str,
    backends: &[HttpBackend],
    prompt_builder: &PromptBuilder,
    queue: &WorkQueue,
) -> Result<()> {
    let repo_root = Path::new(&item.repo_path);
    let store_path = crate::repo_paths::span_store_db(repo_root);
    let store = SpanStore::open(&store_path)?;

    let Some(span) = store.span_by_hash(&item.span_hash)? else {
        // Source file vanished mid-enrichment: clean up the queue entry and move on rather
        // than treating a missing span as a retryable failure.
        queue.complete_work(item.id, Some(worker_id))?;
        return Ok(());
    };

    let work_item = crate::types::SpanWorkItem {
        span_hash: span.span_hash.clone(),
        file_path: span.file_path.clone(),
        lang: span.lang.clone(),
        start_line: span.start_line,
        end_line: span.end_line,
        byte_start: span.byte_start,
        byte_end: span.byte_end,
        slice_type: span.slice_type.clone(),
        slice_language: span.slice_language.clone(),
        classifier_confidence: span.classifier_confidence,
        symbol: Some(span.symbol.clone()),
    };
    let enrichment_item = enrichment_item_for(repo_root, &work_item).map_err(LlmcError::Io)?;

    let outcome = process_item(&enrichment_item, backends, prompt_builder, 1024, false).await;

    match outcome {
        ItemOutcome::Success { payload, meta } => {
            store.store_enrichment(&span.span_hash, &span.symbol, &payload, &meta)?;
            queue.complete_work(item.id, Some(worker_id))?;
            Ok(())
        }
        ItemOutcome::Failed { reason } => Err(LlmcError::EnrichmentInvalid(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_requires_worker_id_host_port_model() {
        for key in ["LLMC_WORKER_ID", "LLMC_WORKER_HOST", "LLMC_WORKER_PORT", "LLMC_WORKER_MODEL"] {
            std::env::remove_var(key);
        }
        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, LlmcError::MissingConfig(_)));
    }

    #[test]
    fn from_env_reads_all_required_and_defaults_optional() {
        std::env::set_var("LLMC_WORKER_ID", "w1");
        std::env::set_var("LLMC_WORKER_HOST", "http://localhost");
        std::env::set_var("LLMC_WORKER_PORT", "11434");
        std::env::set_var("LLMC_WORKER_MODEL", "qwen2.5-coder:7b");
        std::env::remove_var("LLMC_WORKER_TIER");
        std::env::remove_var("LLMC_MAX_TIER");

        let cfg = WorkerConfig::from_env().unwrap();
        assert_eq!(cfg.worker_id, "w1");
        assert_eq!(cfg.tier, 0);
        assert_eq!(cfg.max_tier, 1);
        assert_eq!(cfg.attempts_per_tier, 3);

        for key in ["LLMC_WORKER_ID", "LLMC_WORKER_HOST", "LLMC_WORKER_PORT", "LLMC_WORKER_MODEL"] {
            std::env::remove_var(key);
        }
    }
}
