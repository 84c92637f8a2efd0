//! Canonical filesystem layout for per-repo and global persistent state.
//!
//! Keeping every path in one place means a layout change (e.g. relocating the span
//! store) only needs to happen here.

use std::path::{Path, PathBuf};

/// `.llmc/rag/index_v2.db` — the Span Store database.
pub fn span_store_db(repo_root: &Path) -> PathBuf {
    rag_dir(repo_root).join("index_v2.db")
}

/// `.llmc/rag/spans.jsonl` — append-only export of newly added spans.
pub fn spans_jsonl(repo_root: &Path) -> PathBuf {
    rag_dir(repo_root).join("spans.jsonl")
}

/// `.llmc/rag/index_status.json` — the Index Status record consulted by `compute_route`.
pub fn index_status_json(repo_root: &Path) -> PathBuf {
    rag_dir(repo_root).join("index_status.json")
}

/// `.llmc/enrich_summary.json` — per-run enrichment summary.
pub fn enrich_summary_json(repo_root: &Path) -> PathBuf {
    llmc_dir(repo_root).join("enrich_summary.json")
}

fn llmc_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".llmc")
}

fn rag_dir(repo_root: &Path) -> PathBuf {
    llmc_dir(repo_root).join("rag")
}

/// Ensure `.llmc/rag/` exists under `repo_root`.
pub fn ensure_rag_dir(repo_root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(rag_dir(repo_root))
}

/// `~/.llmc/work_queue.db` — the shared global Work Queue database.
pub fn global_work_queue_db() -> PathBuf {
    global_llmc_dir().join("work_queue.db")
}

/// `~/.llmc/run/work-notify` — the shared named FIFO used for best-effort wake-ups.
pub fn global_work_notify_fifo() -> PathBuf {
    global_llmc_dir().join("run").join("work-notify")
}

fn global_llmc_dir() -> PathBuf {
    home_dir().join(".llmc")
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_repo_paths_nest_under_dot_llmc() {
        let root = Path::new("/repo");
        assert_eq!(span_store_db(root), Path::new("/repo/.llmc/rag/index_v2.db"));
        assert_eq!(spans_jsonl(root), Path::new("/repo/.llmc/rag/spans.jsonl"));
        assert_eq!(index_status_json(root), Path::new("/repo/.llmc/rag/index_status.json"));
        assert_eq!(enrich_summary_json(root), Path::new("/repo/.llmc/enrich_summary.json"));
    }

    #[test]
    fn global_paths_nest_under_home() {
        assert!(global_work_queue_db().ends_with(".llmc/work_queue.db"));
        assert!(global_work_notify_fifo().ends_with(".llmc/run/work-notify"));
    }
}
