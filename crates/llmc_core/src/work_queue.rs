//! Global, cross-repo work queue for enrichment jobs, backed by a single SQLite database
//! shared by every repo's indexer and every enrichment worker on the machine.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::fcntl::{open, OFlag};
use nix::sys::select::{select, FdSet};
use nix::sys::stat::Mode;
use nix::sys::time::TimeVal;
use nix::unistd::{close, mkfifo, write};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{LlmcError, Result};
use crate::types::WorkItem;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_enrichments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_path TEXT NOT NULL,
    span_hash TEXT NOT NULL,
    file_path TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 5,
    created_at REAL NOT NULL,
    claimed_by TEXT,
    claimed_at REAL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    escalation_tier INTEGER NOT NULL DEFAULT 0,
    UNIQUE(repo_path, span_hash)
);

CREATE INDEX IF NOT EXISTS idx_pending_unclaimed ON pending_enrichments(priority, created_at)
    WHERE claimed_by IS NULL;
CREATE INDEX IF NOT EXISTS idx_pending_repo ON pending_enrichments(repo_path);
CREATE INDEX IF NOT EXISTS idx_pending_tier ON pending_enrichments(escalation_tier);

CREATE TABLE IF NOT EXISTS permanent_failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_path TEXT NOT NULL,
    span_hash TEXT NOT NULL,
    file_path TEXT NOT NULL,
    reason TEXT,
    failed_at REAL NOT NULL
);
"#;

/// Code-extension/doc-extension priority buckets used by [`calculate_priority`].
const CODE_EXTENSIONS: &[&str] = &["py", "rs", "go", "js", "ts", "c", "cpp", "java"];
const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt"];

/// Handle to the shared `~/.llmc/work_queue.db` and its notification FIFO.
pub struct WorkQueue {
    conn: Connection,
    db_path: PathBuf,
    pipe_fd: Option<RawFd>,
    pipe_inode: Option<u64>,
}

/// Aggregate statistics across the whole queue.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Unclaimed items.
    pub pending: i64,
    /// Claimed items.
    pub claimed: i64,
    /// Items with at least one recorded failure.
    pub failed: i64,
    /// Total items (pending + claimed).
    pub total: i64,
    /// Pending count by repo path.
    pub by_repo: HashMap<String, i64>,
    /// Pending count by escalation tier.
    pub tier_counts: HashMap<i64, i64>,
    /// Count of permanently failed items.
    pub permanent_failures: i64,
}

impl WorkQueue {
    /// Open the shared work queue database at `db_path` (typically `~/.llmc/work_queue.db`).
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 30_000i64)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, db_path: db_path.to_path_buf(), pipe_fd: None, pipe_inode: None })
    }

    /// Open an in-memory queue with no notification pipe, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, db_path: PathBuf::new(), pipe_fd: None, pipe_inode: None })
    }

    fn pipe_path(&self) -> PathBuf {
        self.db_path
            .parent()
            .map(|p| p.join("run").join("work-notify"))
            .unwrap_or_else(|| PathBuf::from("work-notify"))
    }

    fn ensure_pipe(&self) -> Result<()> {
        let path = self.pipe_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                use std::os::unix::fs::FileTypeExt;
                if !meta.file_type().is_fifo() {
                    std::fs::remove_file(&path)?;
                    let _ = mkfifo(&path, Mode::from_bits_truncate(0o600));
                }
            }
            Err(_) => {
                let _ = mkfifo(&path, Mode::from_bits_truncate(0o600));
            }
        }
        Ok(())
    }

    /// Best-effort wake-up signal to any worker blocked in [`Self::wait_for_work`]. Never a
    /// correctness dependency: workers fall back to polling if this doesn't get through.
    fn notify_workers(&self) {
        if self.ensure_pipe().is_err() {
            return;
        }
        let path = self.pipe_path();
        match open(&path, OFlag::O_WRONLY | OFlag::O_NONBLOCK, Mode::empty()) {
            Ok(fd) => {
                let _ = write(fd, b"1");
                let _ = close(fd);
            }
            Err(nix::errno::Errno::ENXIO) => {
                // No reader has the pipe open; nothing to notify.
            }
            Err(nix::errno::Errno::ENOENT) => {
                let _ = self.ensure_pipe();
            }
            Err(e) => {
                debug!(error = %e, "notify_workers: non-fatal pipe write failure");
            }
        }
    }

    /// Push a new work item. Returns `Ok(false)` (without erroring) if an item for this
    /// `(repo_path, span_hash)` is already queued.
    pub fn push_work(&self, repo_path: &str, span_hash: &str, file_path: &str, priority: i64) -> Result<bool> {
        let result = self.conn.execute(
            "INSERT INTO pending_enrichments (repo_path, span_hash, file_path, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![repo_path, span_hash, file_path, priority, unix_now()],
        );
        match result {
            Ok(_) => {
                self.notify_workers();
                Ok(true)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically claim up to `limit` unclaimed items at `tier` for `worker_id`, ordered by
    /// priority then age. SQLite's `RETURNING` doesn't preserve the `ORDER BY` of the
    /// underlying `UPDATE`'s subquery, so results are re-sorted after the fetch.
    pub fn pull_work(&self, worker_id: &str, tier: i64, limit: i64) -> Result<Vec<WorkItem>> {
        let mut stmt = self.conn.prepare(
            "UPDATE pending_enrichments
             SET claimed_by = ?1, claimed_at = ?2
             WHERE id IN (
                SELECT id FROM pending_enrichments
                WHERE claimed_by IS NULL AND escalation_tier = ?3
                ORDER BY priority ASC, created_at ASC LIMIT ?4
             )
             RETURNING id, repo_path, span_hash, file_path, priority, created_at, attempts, escalation_tier",
        )?;
        let rows = stmt.query_map(params![worker_id, unix_now(), tier, limit], |row| {
            Ok(WorkItem {
                id: row.get(0)?,
                repo_path: row.get(1)?,
                span_hash: row.get(2)?,
                file_path: row.get(3)?,
                priority: row.get(4)?,
                created_at: row.get::<_, f64>(5)? as i64,
                attempts: row.get(6)?,
                escalation_tier: row.get(7)?,
            })
        })?;
        let mut items: Vec<WorkItem> = rows.collect::<rusqlite::Result<_>>()?;
        items.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(items)
    }

    /// Block (up to `timeout`) until work is available or the timeout expires. Opens the
    /// notification FIFO read-write nonblocking (so there's no EOF-on-last-writer-close and
    /// no block if no writer currently has it open), then `select`s on it. Any error falls
    /// back to `Ok(false)`, meaning the caller should just poll.
    pub fn wait_for_work(&mut self, timeout_ms: u64) -> Result<bool> {
        if self.ensure_pipe().is_err() {
            return Ok(false);
        }
        let path = self.pipe_path();

        let current_inode = std::fs::metadata(&path).ok().map(|m| m.ino());
        if self.pipe_fd.is_some() && self.pipe_inode != current_inode {
            if let Some(fd) = self.pipe_fd.take() {
                let _ = close(fd);
            }
            self.pipe_inode = None;
        }

        if self.pipe_fd.is_none() {
            match open(&path, OFlag::O_RDWR | OFlag::O_NONBLOCK, Mode::empty()) {
                Ok(fd) => {
                    self.pipe_fd = Some(fd);
                    self.pipe_inode = current_inode;
                }
                Err(_) => return Ok(false),
            }
        }

        let fd = self.pipe_fd.unwrap();
        let mut read_set = FdSet::new();
        read_set.insert(fd);
        let mut tv = TimeVal::new((timeout_ms / 1000) as i64, ((timeout_ms % 1000) * 1000) as i64);

        let ready = select(fd + 1, Some(&mut read_set), None, None, Some(&mut tv));
        match ready {
            Ok(n) if n > 0 && read_set.contains(fd) => {
                let mut buf = [0u8; 4096];
                loop {
                    match nix::unistd::read(fd, &mut buf) {
                        Ok(0) => break,
                        Ok(_) => continue,
                        Err(nix::errno::Errno::EAGAIN) => break,
                        Err(_) => break,
                    }
                }
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(_) => {
                if let Some(fd) = self.pipe_fd.take() {
                    let _ = close(fd);
                }
                Ok(false)
            }
        }
    }

    /// Mark `item_id` complete and remove it. If `worker_id` is given, the delete is scoped
    /// to items currently claimed by that worker; a mismatch or already-gone item raises
    /// [`LlmcError::OwnershipError`].
    pub fn complete_work(&self, item_id: i64, worker_id: Option<&str>) -> Result<()> {
        let affected = match worker_id {
            Some(w) => self.conn.execute(
                "DELETE FROM pending_enrichments WHERE id = ?1 AND claimed_by = ?2",
                params![item_id, w],
            )?,
            None => self.conn.execute("DELETE FROM pending_enrichments WHERE id = ?1", params![item_id])?,
        };
        if affected == 0 {
            if let Some(w) = worker_id {
                return Err(LlmcError::OwnershipError { worker_id: w.to_string(), item_id });
            }
        }
        Ok(())
    }

    /// Record a failed attempt. Depending on `attempts_per_tier` and `max_tier`, the item is
    /// either requeued at the same tier, escalated to the next tier, or moved to
    /// `permanent_failures` and removed from the active queue.
    pub fn fail_work(
        &self,
        item_id: i64,
        error: &str,
        worker_id: Option<&str>,
        max_tier: i64,
        attempts_per_tier: i64,
    ) -> Result<()> {
        let row: Option<(Option<String>, i64, i64, String, String)> = self
            .conn
            .query_row(
                "SELECT claimed_by, escalation_tier, attempts, repo_path, span_hash
                 FROM pending_enrichments WHERE id = ?1",
                params![item_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((claimed_by, current_tier, current_attempts, repo_path, span_hash)) = row else {
            return Ok(());
        };

        if let Some(w) = worker_id {
            if claimed_by.as_deref() != Some(w) {
                return Err(LlmcError::OwnershipError { worker_id: w.to_string(), item_id });
            }
        }

        let should_escalate = current_attempts + 1 >= attempts_per_tier;

        if current_tier >= max_tier && should_escalate {
            let file_path: String = self
                .conn
                .query_row("SELECT file_path FROM pending_enrichments WHERE id = ?1", params![item_id], |r| r.get(0))?;
            self.conn.execute(
                "INSERT INTO permanent_failures (repo_path, span_hash, file_path, reason, failed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![repo_path, span_hash, file_path, error, unix_now()],
            )?;
            self.conn.execute("DELETE FROM pending_enrichments WHERE id = ?1", params![item_id])?;
            warn!(item_id, %repo_path, %span_hash, "work item permanently failed after exhausting all tiers");
        } else if should_escalate {
            self.conn.execute(
                "UPDATE pending_enrichments
                 SET claimed_by = NULL, claimed_at = NULL, attempts = 0,
                     escalation_tier = escalation_tier + 1, last_error = ?2
                 WHERE id = ?1",
                params![item_id, error],
            )?;
        } else {
            self.conn.execute(
                "UPDATE pending_enrichments
                 SET claimed_by = NULL, claimed_at = NULL, attempts = attempts + 1, last_error = ?2
                 WHERE id = ?1",
                params![item_id, error],
            )?;
        }
        Ok(())
    }

    /// Refresh `claimed_at` for a batch of in-progress items so [`Self::orphan_recovery`]
    /// doesn't reclaim work that's merely slow.
    pub fn heartbeat_items(&self, item_ids: &[i64]) -> Result<usize> {
        if item_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = (0..item_ids.len()).map(|i| format!("?{}", i + 2)).collect::<Vec<_>>().join(", ");
        let sql = format!("UPDATE pending_enrichments SET claimed_at = ?1 WHERE id IN ({placeholders})");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(unix_now())];
        for id in item_ids {
            params.push(Box::new(*id));
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
        Ok(self.conn.execute(&sql, param_refs.as_slice())?)
    }

    /// Unclaim items whose `claimed_at` is older than `timeout_seconds`, returning how many
    /// were reclaimed. Recovers work from workers that died without calling `fail_work`.
    pub fn orphan_recovery(&self, timeout_seconds: i64) -> Result<usize> {
        let cutoff = unix_now() - timeout_seconds as f64;
        Ok(self.conn.execute(
            "UPDATE pending_enrichments SET claimed_by = NULL, claimed_at = NULL
             WHERE claimed_by IS NOT NULL AND claimed_at < ?1",
            params![cutoff],
        )?)
    }

    /// Delete all queue items belonging to repo paths that no longer exist on disk.
    pub fn cleanup_missing_repos(&self) -> Result<HashMap<String, usize>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT repo_path FROM pending_enrichments")?;
        let repo_paths: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
        let mut deleted = HashMap::new();
        for repo_path in repo_paths {
            if !Path::new(&repo_path).exists() {
                let count = self
                    .conn
                    .execute("DELETE FROM pending_enrichments WHERE repo_path = ?1", params![repo_path])?;
                deleted.insert(repo_path, count);
            }
        }
        Ok(deleted)
    }

    /// Aggregate queue statistics.
    pub fn stats(&self) -> Result<QueueStats> {
        let (pending, claimed, failed, total): (i64, i64, i64, i64) = self.conn.query_row(
            "SELECT
                COUNT(*) FILTER (WHERE claimed_by IS NULL),
                COUNT(*) FILTER (WHERE claimed_by IS NOT NULL),
                COUNT(*) FILTER (WHERE last_error IS NOT NULL),
                COUNT(*)
             FROM pending_enrichments",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut by_repo = HashMap::new();
        let mut stmt = self.conn.prepare("SELECT repo_path, COUNT(*) FROM pending_enrichments GROUP BY repo_path")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (repo, count) = row?;
            by_repo.insert(repo, count);
        }
        drop(stmt);

        let mut tier_counts = HashMap::new();
        let mut stmt = self.conn.prepare("SELECT escalation_tier, COUNT(*) FROM pending_enrichments GROUP BY escalation_tier")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (tier, count) = row?;
            tier_counts.insert(tier, count);
        }
        drop(stmt);

        let permanent_failures: i64 = self.conn.query_row("SELECT COUNT(*) FROM permanent_failures", [], |r| r.get(0))?;

        Ok(QueueStats { pending, claimed, failed, total, by_repo, tier_counts, permanent_failures })
    }

    /// Remove every item from the active queue. Destructive; use only for test setup or an
    /// explicit operator reset.
    pub fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM pending_enrichments", [])?)
    }

    /// Most recent permanently-failed items, newest first.
    pub fn list_permanent_failures(&self, limit: i64) -> Result<Vec<(String, String, String, Option<String>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT repo_path, span_hash, file_path, reason FROM permanent_failures
             ORDER BY failed_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Clear the permanent-failure log.
    pub fn clear_permanent_failures(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM permanent_failures", [])?)
    }
}

/// Priority bucket for a file path: code gets priority 3 (most urgent), docs get 7, anything
/// else gets the default of 5.
pub fn calculate_priority(file_path: &str) -> i64 {
    let ext = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if CODE_EXTENSIONS.contains(&ext.as_str()) {
        3
    } else if DOC_EXTENSIONS.contains(&ext.as_str()) {
        7
    } else {
        5
    }
}

fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        if let Some(fd) = self.pipe_fd.take() {
            let _ = close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_duplicate() {
        let q = WorkQueue::open_in_memory().unwrap();
        assert!(q.push_work("/repo", "hash1", "a.rs", 3).unwrap());
        assert!(!q.push_work("/repo", "hash1", "a.rs", 3).unwrap());
    }

    #[test]
    fn pull_respects_priority_and_age_order() {
        let q = WorkQueue::open_in_memory().unwrap();
        q.push_work("/repo", "hash1", "a.md", 7).unwrap();
        q.push_work("/repo", "hash2", "b.rs", 3).unwrap();
        let items = q.pull_work("worker-1", 0, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].span_hash, "hash2");
    }

    #[test]
    fn complete_work_requires_ownership() {
        let q = WorkQueue::open_in_memory().unwrap();
        q.push_work("/repo", "hash1", "a.rs", 3).unwrap();
        let items = q.pull_work("worker-1", 0, 10).unwrap();
        let id = items[0].id;
        let err = q.complete_work(id, Some("worker-2"));
        assert!(err.is_err());
        q.complete_work(id, Some("worker-1")).unwrap();
    }

    #[test]
    fn fail_work_escalates_then_permanently_fails() {
        let q = WorkQueue::open_in_memory().unwrap();
        q.push_work("/repo", "hash1", "a.rs", 3).unwrap();
        let id = q.pull_work("w1", 0, 10).unwrap()[0].id;

        for _ in 0..3 {
            q.fail_work(id, "boom", Some("w1"), 1, 3).unwrap();
            let _ = q.pull_work("w1", 0, 10);
        }
        let stats = q.stats().unwrap();
        assert_eq!(stats.tier_counts.get(&1).copied().unwrap_or(0), 1);

        for _ in 0..3 {
            q.fail_work(id, "boom again", Some("w1"), 1, 3).unwrap();
            let _ = q.pull_work("w1", 1, 10);
        }
        let stats = q.stats().unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.permanent_failures, 1);
    }

    #[test]
    fn orphan_recovery_unclaims_stale_items() {
        let q = WorkQueue::open_in_memory().unwrap();
        q.push_work("/repo", "hash1", "a.rs", 3).unwrap();
        q.pull_work("w1", 0, 10).unwrap();
        q.conn.execute("UPDATE pending_enrichments SET claimed_at = 0", []).unwrap();
        let recovered = q.orphan_recovery(1).unwrap();
        assert_eq!(recovered, 1);
    }

    #[test]
    fn calculate_priority_buckets_by_extension() {
        assert_eq!(calculate_priority("src/main.rs"), 3);
        assert_eq!(calculate_priority("README.md"), 7);
        assert_eq!(calculate_priority("data.bin"), 5);
    }
}
