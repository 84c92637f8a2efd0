//! Per-repo span storage: files, spans, enrichments and embeddings in SQLite.
//!
//! Schema version 7. Older databases are migrated in place by inspecting
//! which columns exist rather than trusting a stored version number, since
//! a database can be copied between llmc versions without ever going
//! through an explicit migration step.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{LlmcError, Result};
use crate::types::{BackendMeta, EnrichmentPayload, EnrichmentRecord, FileRecord, SliceType, SpanRecord, SpanWorkItem};

/// Current schema version this crate writes and expects.
pub const DB_SCHEMA_VERSION: i64 = 7;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    lang TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS spans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    lang TEXT NOT NULL,
    symbol TEXT NOT NULL,
    kind TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    byte_start INTEGER NOT NULL,
    byte_end INTEGER NOT NULL,
    span_hash TEXT NOT NULL UNIQUE,
    doc_hint TEXT,
    imports TEXT,
    slice_type TEXT NOT NULL DEFAULT 'other',
    slice_language TEXT,
    classifier_confidence REAL NOT NULL DEFAULT 0.0,
    classifier_version TEXT NOT NULL DEFAULT '',
    FOREIGN KEY (file_path) REFERENCES files(path) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_spans_file_path ON spans(file_path);
CREATE INDEX IF NOT EXISTS idx_spans_symbol ON spans(symbol);

CREATE TABLE IF NOT EXISTS embeddings_meta (
    route_name TEXT NOT NULL,
    profile_name TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    model TEXT,
    PRIMARY KEY (route_name, profile_name)
);

CREATE TABLE IF NOT EXISTS embeddings (
    span_hash TEXT NOT NULL,
    route_name TEXT NOT NULL DEFAULT 'docs',
    profile_name TEXT NOT NULL DEFAULT 'default',
    vector BLOB NOT NULL,
    PRIMARY KEY (span_hash, route_name, profile_name)
);

CREATE TABLE IF NOT EXISTS emb_code (
    span_hash TEXT NOT NULL,
    route_name TEXT NOT NULL DEFAULT 'code',
    profile_name TEXT NOT NULL DEFAULT 'default',
    vector BLOB NOT NULL,
    PRIMARY KEY (span_hash, route_name, profile_name)
);

CREATE TABLE IF NOT EXISTS enrichments (
    span_hash TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    summary TEXT,
    evidence TEXT,
    inputs TEXT,
    outputs TEXT,
    side_effects TEXT,
    pitfalls TEXT,
    usage_snippet TEXT,
    tags TEXT,
    model TEXT,
    created_at REAL,
    schema_ver TEXT,
    content_type TEXT,
    content_language TEXT,
    content_type_confidence REAL,
    content_type_source TEXT,
    tokens_per_second REAL,
    eval_count INTEGER,
    eval_duration_ns INTEGER,
    prompt_eval_count INTEGER,
    total_duration_ns INTEGER,
    backend_host TEXT,
    FOREIGN KEY (span_hash) REFERENCES spans(span_hash) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS file_descriptions (
    path TEXT PRIMARY KEY,
    description TEXT,
    created_at REAL
);

CREATE VIRTUAL TABLE IF NOT EXISTS spans_fts USING fts5(
    span_hash UNINDEXED,
    file_path UNINDEXED,
    start_line UNINDEXED,
    end_line UNINDEXED,
    symbol,
    summary,
    tokenize = 'unicode61'
);
"#;

/// Handle to a single repo's span store database.
pub struct SpanStore {
    conn: Connection,
}

impl SpanStore {
    /// Open (creating if absent) the span store at `path`, migrating and recovering as needed.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_and_prepare(path)?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database, useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&mut self) -> Result<()> {
        let version = infer_schema_version(&self.conn)?;
        run_versioned_migrations(&self.conn, version)?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert or update a file record, keyed by path.
    pub fn upsert_file(&self, file: &FileRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO files (path, lang, file_hash, size, mtime) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET lang = excluded.lang, file_hash = excluded.file_hash,
                size = excluded.size, mtime = excluded.mtime",
            params![
                path_str(&file.path),
                file.lang,
                file.file_hash,
                file.size as i64,
                file.mtime
            ],
        )?;
        Ok(())
    }

    /// Look up the stored file record for `path`.
    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        self.conn
            .query_row(
                "SELECT path, lang, file_hash, size, mtime FROM files WHERE path = ?1",
                params![path],
                |row| {
                    Ok(FileRecord {
                        path: PathBuf::from(row.get::<_, String>(0)?),
                        lang: row.get(1)?,
                        file_hash: row.get(2)?,
                        size: row.get::<_, i64>(3)? as u64,
                        mtime: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(LlmcError::from)
    }

    /// Remove a file and (via cascade) its spans, enrichments and embeddings.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        self.conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(())
    }

    /// Differentially replace a file's spans: only inserts new spans and deletes vanished
    /// ones, leaving spans whose hash is unchanged (and their enrichments/embeddings) intact.
    ///
    /// If `new_spans` is empty but the file currently has spans, this is treated as a
    /// parse failure rather than a deletion: the existing spans are preserved and a warning
    /// is logged. Pass an explicit `remove_file` call first if the file is genuinely gone.
    pub fn replace_spans(&mut self, file_path: &str, new_spans: &[SpanRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;

        let existing_hashes: HashSet<String> = {
            let mut stmt = tx.prepare("SELECT span_hash FROM spans WHERE file_path = ?1")?;
            let rows = stmt.query_map(params![file_path], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let new_hashes: HashSet<String> = new_spans.iter().map(|s| s.span_hash.clone()).collect();

        if new_hashes.is_empty() && !existing_hashes.is_empty() {
            warn!(
                file_path,
                existing = existing_hashes.len(),
                "replace_spans called with zero new spans for a file with existing spans; \
                 preserving existing spans (likely a parse failure, not a real deletion)"
            );
            tx.commit()?;
            return Ok(());
        }

        let to_delete: Vec<&String> = existing_hashes.difference(&new_hashes).collect();
        let to_add: Vec<&SpanRecord> = new_spans
            .iter()
            .filter(|s| !existing_hashes.contains(&s.span_hash))
            .collect();
        let unchanged = existing_hashes.intersection(&new_hashes).count();

        for hash in &to_delete {
            tx.execute("DELETE FROM spans WHERE span_hash = ?1", params![hash])?;
        }

        for span in &to_add {
            tx.execute(
                "INSERT OR REPLACE INTO spans
                    (file_path, lang, symbol, kind, start_line, end_line, byte_start, byte_end,
                     span_hash, doc_hint, imports, slice_type, slice_language,
                     classifier_confidence, classifier_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    path_str(&span.file_path),
                    span.lang,
                    span.symbol,
                    span.kind,
                    span.start_line,
                    span.end_line,
                    span.byte_start as i64,
                    span.byte_end as i64,
                    span.span_hash,
                    span.doc_hint,
                    serde_json::to_string(&span.imports)?,
                    span.slice_type.as_str(),
                    span.slice_language,
                    span.classifier_confidence,
                    span.classifier_version,
                ],
            )?;
        }

        debug!(
            file_path,
            added = to_add.len(),
            deleted = to_delete.len(),
            unchanged,
            "replace_spans delta"
        );

        tx.commit()?;
        Ok(())
    }

    /// Fetch every span currently stored for `file_path`.
    pub fn spans_for_file(&self, file_path: &str) -> Result<Vec<SpanRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, lang, symbol, kind, start_line, end_line, byte_start, byte_end,
                    span_hash, doc_hint, imports, slice_type, slice_language,
                    classifier_confidence, classifier_version
             FROM spans WHERE file_path = ?1",
        )?;
        let rows = stmt.query_map(params![file_path], span_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Fetch a single span by its content-addressed hash, if present.
    ///
    /// Used by the pool-worker enrichment engine (V3), which only carries `span_hash` and
    /// `file_path` across the global work queue and must look the rest of the span up from
    /// the owning repo's own store before it can build a prompt.
    pub fn span_by_hash(&self, span_hash: &str) -> Result<Option<SpanRecord>> {
        self.conn
            .query_row(
                "SELECT file_path, lang, symbol, kind, start_line, end_line, byte_start, byte_end,
                        span_hash, doc_hint, imports, slice_type, slice_language,
                        classifier_confidence, classifier_version
                 FROM spans WHERE span_hash = ?1",
                params![span_hash],
                span_from_row,
            )
            .optional()
            .map_err(LlmcError::from)
    }

    /// Fetch every span in the store (used by export and full rescans).
    pub fn all_spans(&self) -> Result<Vec<SpanRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, lang, symbol, kind, start_line, end_line, byte_start, byte_end,
                    span_hash, doc_hint, imports, slice_type, slice_language,
                    classifier_confidence, classifier_version
             FROM spans ORDER BY file_path, start_line",
        )?;
        let rows = stmt.query_map([], span_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Store (upsert) an enrichment payload for `span_hash`, along with backend performance
    /// metadata reported alongside it.
    pub fn store_enrichment(
        &self,
        span_hash: &str,
        symbol: &str,
        payload: &EnrichmentPayload,
        meta: &BackendMeta,
    ) -> Result<()> {
        let tags = payload
            .tags
            .as_ref()
            .map(|t| t.join(","))
            .unwrap_or_default();
        let created_at = unix_now();

        self.conn.execute(
            "INSERT INTO enrichments
                (span_hash, symbol, summary, evidence, inputs, outputs, side_effects, pitfalls,
                 usage_snippet, tags, model, created_at, schema_ver,
                 tokens_per_second, eval_count, eval_duration_ns, prompt_eval_count,
                 total_duration_ns, backend_host)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(span_hash) DO UPDATE SET
                symbol = excluded.symbol, summary = excluded.summary, evidence = excluded.evidence,
                inputs = excluded.inputs, outputs = excluded.outputs,
                side_effects = excluded.side_effects, pitfalls = excluded.pitfalls,
                usage_snippet = excluded.usage_snippet, tags = excluded.tags, model = excluded.model,
                created_at = excluded.created_at, schema_ver = excluded.schema_ver,
                tokens_per_second = excluded.tokens_per_second, eval_count = excluded.eval_count,
                eval_duration_ns = excluded.eval_duration_ns,
                prompt_eval_count = excluded.prompt_eval_count,
                total_duration_ns = excluded.total_duration_ns, backend_host = excluded.backend_host",
            params![
                span_hash,
                symbol,
                payload.summary_120w,
                serde_json::to_string(&payload.evidence)?,
                serde_json::to_string(&payload.inputs)?,
                serde_json::to_string(&payload.outputs)?,
                serde_json::to_string(&payload.side_effects)?,
                serde_json::to_string(&payload.pitfalls)?,
                payload.usage_snippet,
                tags,
                payload.model.clone().or_else(|| meta.model.clone()),
                created_at,
                payload.schema_version.clone().unwrap_or_else(|| crate::types::ENRICHMENT_SCHEMA_VERSION.to_string()),
                meta.tokens_per_second,
                meta.eval_count,
                meta.eval_duration_ns,
                meta.prompt_eval_count,
                meta.total_duration_ns,
                meta.host,
            ],
        )?;
        Ok(())
    }

    /// Store an embedding vector, packed little-endian float32, into either the `embeddings`
    /// or `emb_code` table. `table_name` must be exactly one of those two names; the caller
    /// decides routing, there is no content-type gating here.
    pub fn store_embedding(
        &self,
        span_hash: &str,
        vector: &[f32],
        route_name: &str,
        profile_name: &str,
        table_name: &str,
    ) -> Result<()> {
        let table = match table_name {
            "embeddings" => "embeddings",
            "emb_code" => "emb_code",
            other => {
                return Err(LlmcError::Config(format!(
                    "store_embedding: invalid table_name '{other}', must be 'embeddings' or 'emb_code'"
                )))
            }
        };
        let blob = pack_f32le(vector);
        let sql = format!(
            "INSERT INTO {table} (span_hash, route_name, profile_name, vector) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(span_hash, route_name, profile_name) DO UPDATE SET vector = excluded.vector"
        );
        self.conn.execute(&sql, params![span_hash, route_name, profile_name, blob])?;
        Ok(())
    }

    /// Fetch all enrichment records, joined with their span's symbol.
    pub fn all_enrichments(&self) -> Result<Vec<EnrichmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT span_hash, symbol, summary, evidence, inputs, outputs, side_effects,
                    pitfalls, usage_snippet, tags, model, created_at, schema_ver
             FROM enrichments",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EnrichmentRecord {
                span_hash: row.get(0)?,
                symbol: row.get(1)?,
                summary: row.get(2)?,
                evidence: row.get(3)?,
                inputs: row.get(4)?,
                outputs: row.get(5)?,
                side_effects: row.get(6)?,
                pitfalls: row.get(7)?,
                usage_snippet: row.get(8)?,
                tags: row.get(9)?,
                model: row.get(10)?,
                created_at: row.get::<_, Option<f64>>(11)?.map(|v| v as i64),
                schema_ver: row.get(12)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    /// Select spans needing enrichment, respecting a settle-after-edit cooldown.
    ///
    /// For small backlogs this is a simple ordered scan; for large backlogs it samples
    /// randomly across the id range so a single huge file doesn't starve the rest of the
    /// repo, then shuffles before truncating to `limit`.
    pub fn pending_enrichments(&self, limit: usize, cooldown_seconds: i64) -> Result<Vec<SpanWorkItem>> {
        let pending_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM spans s LEFT JOIN enrichments e ON s.span_hash = e.span_hash
             WHERE e.span_hash IS NULL",
            [],
            |row| row.get(0),
        )?;

        let rows: Vec<(i64, SpanWorkItem, f64)> = if pending_count <= 500 || pending_count <= (limit as i64) * 3 {
            self.pending_simple_scan(limit * 2)?
        } else {
            self.pending_sampled_scan(limit)?
        };

        let now = unix_now();
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut candidates = rows;
        if pending_count > 500 && pending_count > (limit as i64) * 3 {
            candidates.shuffle(&mut rand::thread_rng());
        }

        for (_, item, mtime) in candidates {
            if now - mtime < cooldown_seconds as f64 {
                continue;
            }
            if !seen.insert(item.span_hash.clone()) {
                continue;
            }
            items.push(item);
            if items.len() >= limit {
                break;
            }
        }

        Ok(items)
    }

    fn pending_simple_scan(&self, limit: usize) -> Result<Vec<(i64, SpanWorkItem, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.span_hash, s.file_path, s.lang, s.start_line, s.end_line,
                    s.byte_start, s.byte_end, s.slice_type, s.slice_language,
                    s.classifier_confidence, s.symbol, f.mtime
             FROM spans s
             LEFT JOIN enrichments e ON s.span_hash = e.span_hash
             JOIN files f ON s.file_path = f.path
             WHERE e.span_hash IS NULL
             ORDER BY s.id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], pending_row_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }

    fn pending_sampled_scan(&self, limit: usize) -> Result<Vec<(i64, SpanWorkItem, f64)>> {
        let (min_id, max_id): (i64, i64) = self.conn.query_row(
            "SELECT MIN(s.id), MAX(s.id) FROM spans s
             LEFT JOIN enrichments e ON s.span_hash = e.span_hash
             WHERE e.span_hash IS NULL",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let batch_size = (limit / 4).max(10);
        let sample_offsets = 20usize;
        let span = (max_id - min_id).max(1);
        let mut rng = rand::thread_rng();
        let mut collected = Vec::new();

        for _ in 0..sample_offsets {
            let offset = min_id + (rand::Rng::gen_range(&mut rng, 0..=span));
            let mut stmt = self.conn.prepare(
                "SELECT s.id, s.span_hash, s.file_path, s.lang, s.start_line, s.end_line,
                        s.byte_start, s.byte_end, s.slice_type, s.slice_language,
                        s.classifier_confidence, s.symbol, f.mtime
                 FROM spans s
                 LEFT JOIN enrichments e ON s.span_hash = e.span_hash
                 JOIN files f ON s.file_path = f.path
                 WHERE e.span_hash IS NULL AND s.id >= ?1
                 ORDER BY s.id LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![offset, batch_size as i64], pending_row_from_row)?;
            for row in rows {
                collected.push(row?);
            }
        }

        Ok(collected)
    }

    /// Aggregate stats: file/span/enrichment/embedding counts.
    pub fn stats(&self) -> Result<SpanStoreStats> {
        let files: i64 = self.conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let spans: i64 = self.conn.query_row("SELECT COUNT(*) FROM spans", [], |r| r.get(0))?;
        let enrichments: i64 = self.conn.query_row("SELECT COUNT(*) FROM enrichments", [], |r| r.get(0))?;
        let embeddings: i64 = self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM embeddings) + (SELECT COUNT(*) FROM emb_code)",
            [],
            |r| r.get(0),
        )?;
        Ok(SpanStoreStats { files, spans, enrichments, embeddings })
    }

    /// Look up the enrichment summary for whichever span in `file_path` overlaps
    /// `[start_line, end_line]`, preferring the span with the greatest line overlap.
    ///
    /// Used by the Retrieval Facade to annotate search/fallback hits, which carry a
    /// location but not a `span_hash` (the grep fallback has no span concept at all).
    pub fn enrichment_summary_for_location(
        &self,
        file_path: &str,
        start_line: u32,
        end_line: u32,
    ) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.summary,
                    MIN(s.end_line, ?3) - MAX(s.start_line, ?2) AS overlap
             FROM spans s
             JOIN enrichments e ON s.span_hash = e.span_hash
             WHERE s.file_path = ?1 AND s.start_line <= ?3 AND s.end_line >= ?2
                   AND e.summary IS NOT NULL
             ORDER BY overlap DESC
             LIMIT 1",
        )?;
        stmt.query_row(params![file_path, start_line, end_line], |row| row.get::<_, Option<String>>(0))
            .optional()
            .map(|v| v.flatten())
            .map_err(LlmcError::from)
    }

    /// Access the underlying connection for modules that need raw SQL (FTS, rerank).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Rebuild `spans_fts` from the current (spans ⋈ enrichments ⋈ files) join.
    ///
    /// Safe to call at any time: the index is a projection of the source tables, never
    /// a source of truth itself, so a full rebuild is just a delete-and-reinsert.
    pub fn rebuild_fts(&self) -> Result<()> {
        let tx_conn = &self.conn;
        tx_conn.execute("DELETE FROM spans_fts", [])?;
        let mut stmt = tx_conn.prepare(
            "SELECT s.span_hash, s.file_path, s.start_line, s.end_line, s.symbol,
                    COALESCE(e.summary, '')
             FROM spans s
             LEFT JOIN enrichments e ON s.span_hash = e.span_hash",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut insert = tx_conn.prepare(
            "INSERT INTO spans_fts (span_hash, file_path, start_line, end_line, symbol, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut count = 0;
        for row in rows {
            let (span_hash, file_path, start_line, end_line, symbol, summary) = row?;
            insert.execute(params![span_hash, file_path, start_line, end_line, symbol, summary])?;
            count += 1;
        }
        debug!(rows = count, "rebuilt spans_fts index");
        Ok(())
    }

    /// Run an FTS MATCH query, returning up to `limit` raw hits ordered by BM25 (best first).
    ///
    /// `bm25()` returns lower-is-better scores in SQLite's native convention; callers that
    /// want a higher-is-better normalized score should run this through [`crate::rerank`].
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, start_line, end_line, symbol, summary, bm25(spans_fts) as rank
             FROM spans_fts WHERE spans_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok(FtsHit {
                file_path: row.get(0)?,
                start_line: row.get::<_, i64>(1)? as u32,
                end_line: row.get::<_, i64>(2)? as u32,
                text: {
                    let symbol: String = row.get(3)?;
                    let summary: String = row.get(4)?;
                    if summary.is_empty() { symbol } else { format!("{symbol}: {summary}") }
                },
                bm25_raw: row.get(5)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(LlmcError::from)
    }
}

/// A single raw FTS hit, prior to reranking.
#[derive(Debug, Clone)]
pub struct FtsHit {
    /// Repo-relative path of the file containing the match.
    pub file_path: String,
    /// 1-based start line of the matched span.
    pub start_line: u32,
    /// 1-based end line of the matched span.
    pub end_line: u32,
    /// Text surfaced for ranking/snippet purposes (symbol, plus summary when enriched).
    pub text: String,
    /// Raw `bm25()` score from SQLite: lower is better.
    pub bm25_raw: f64,
}

/// Aggregate counters for a span store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanStoreStats {
    /// Number of tracked files.
    pub files: i64,
    /// Number of stored spans.
    pub spans: i64,
    /// Number of stored enrichments.
    pub enrichments: i64,
    /// Number of stored embedding vectors (both routes combined).
    pub embeddings: i64,
}

fn span_from_row(row: &rusqlite::Row) -> rusqlite::Result<SpanRecord> {
    let imports_json: Option<String> = row.get(10)?;
    let imports = imports_json
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    Ok(SpanRecord {
        file_path: PathBuf::from(row.get::<_, String>(0)?),
        lang: row.get(1)?,
        symbol: row.get(2)?,
        kind: row.get(3)?,
        start_line: row.get::<_, i64>(4)? as u32,
        end_line: row.get::<_, i64>(5)? as u32,
        byte_start: row.get::<_, i64>(6)? as u64,
        byte_end: row.get::<_, i64>(7)? as u64,
        span_hash: row.get(8)?,
        doc_hint: row.get(9)?,
        imports,
        slice_type: SliceType::parse(&row.get::<_, String>(11)?),
        slice_language: row.get(12)?,
        classifier_confidence: row.get(13)?,
        classifier_version: row.get(14)?,
    })
}

fn pending_row_from_row(row: &rusqlite::Row) -> rusqlite::Result<(i64, SpanWorkItem, f64)> {
    let id: i64 = row.get(0)?;
    let item = SpanWorkItem {
        span_hash: row.get(1)?,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        lang: row.get(3)?,
        start_line: row.get::<_, i64>(4)? as u32,
        end_line: row.get::<_, i64>(5)? as u32,
        byte_start: row.get::<_, i64>(6)? as u64,
        byte_end: row.get::<_, i64>(7)? as u64,
        slice_type: SliceType::parse(&row.get::<_, String>(8)?),
        slice_language: row.get(9)?,
        classifier_confidence: row.get(10)?,
        symbol: row.get(11)?,
    };
    let mtime: f64 = row.get(12)?;
    Ok((id, item, mtime))
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn pack_f32le(vector: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Unpack a little-endian float32 blob back into a vector (used by export/rerank).
pub fn unpack_f32le(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Open a database file, quarantining and retrying once if it's corrupted.
fn open_and_prepare(path: &Path) -> Result<Connection> {
    match try_open(path) {
        Ok(conn) => Ok(conn),
        Err(e) if is_corruption_error(&e) => {
            quarantine(path)?;
            try_open(path).map_err(|_| LlmcError::CorruptedDatabase {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn try_open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    // Touch the schema so a corrupted file surfaces its error immediately.
    conn.query_row("SELECT name FROM sqlite_master LIMIT 1", [], |_| Ok(()))
        .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(()) } else { Err(e) })?;
    Ok(conn)
}

fn is_corruption_error(e: &rusqlite::Error) -> bool {
    let msg = e.to_string();
    msg.contains("file is not a database") || msg.contains("database disk image is malformed")
}

fn quarantine(path: &Path) -> Result<()> {
    let ts = unix_now() as i64;
    let quarantined = path.with_extension(format!("corrupt.{ts}"));
    std::fs::rename(path, &quarantined)?;
    warn!(original = %path.display(), quarantined = %quarantined.display(), "quarantined corrupted database");
    Ok(())
}

/// Infer a legacy schema version from which columns exist, for databases created by an
/// older version of this crate (or the system it interoperates with) with no stored version.
fn infer_schema_version(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, "spans")? {
        return Ok(DB_SCHEMA_VERSION);
    }
    if column_exists(conn, "spans", "imports")? {
        return Ok(7);
    }
    if column_exists(conn, "enrichments", "tokens_per_second")? {
        return Ok(6);
    }
    if column_exists(conn, "enrichments", "content_type")? {
        return Ok(5);
    }
    if column_exists(conn, "embeddings", "route_name")? {
        return Ok(4);
    }
    if column_exists(conn, "spans", "slice_type")? {
        return Ok(3);
    }
    if column_exists(conn, "enrichments", "inputs")? {
        return Ok(2);
    }
    Ok(1)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }
    let sql = format!("PRAGMA table_info({table})");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Apply only the ALTER TABLE deltas needed to bring `version` up to [`DB_SCHEMA_VERSION`].
/// Each step is wrapped so an already-applied delta (idempotency, or a partially-migrated
/// database) doesn't abort the whole migration.
fn run_versioned_migrations(conn: &Connection, version: i64) -> Result<()> {
    if version >= DB_SCHEMA_VERSION {
        return Ok(());
    }
    let steps: &[&str] = &[
        "ALTER TABLE enrichments ADD COLUMN inputs TEXT",
        "ALTER TABLE enrichments ADD COLUMN outputs TEXT",
        "ALTER TABLE spans ADD COLUMN slice_type TEXT NOT NULL DEFAULT 'other'",
        "ALTER TABLE embeddings ADD COLUMN route_name TEXT NOT NULL DEFAULT 'docs'",
        "ALTER TABLE enrichments ADD COLUMN content_type TEXT",
        "ALTER TABLE enrichments ADD COLUMN tokens_per_second REAL",
        "ALTER TABLE spans ADD COLUMN imports TEXT",
    ];
    for step in steps {
        if let Err(e) = conn.execute(step, []) {
            debug!(statement = step, error = %e, "migration step skipped (likely already applied)");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_span(hash: &str, line: u32) -> SpanRecord {
        SpanRecord {
            file_path: PathBuf::from("src/lib.rs"),
            lang: "rust".into(),
            symbol: "lib::foo".into(),
            kind: "function".into(),
            start_line: line,
            end_line: line + 5,
            byte_start: 0,
            byte_end: 50,
            span_hash: hash.into(),
            doc_hint: None,
            imports: vec![],
            slice_type: SliceType::Code,
            slice_language: None,
            classifier_confidence: 0.9,
            classifier_version: "v1".into(),
        }
    }

    #[test]
    fn replace_spans_adds_and_deletes_differentially() {
        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord {
                path: PathBuf::from("src/lib.rs"),
                lang: "rust".into(),
                file_hash: "h1".into(),
                size: 100,
                mtime: 0.0,
            })
            .unwrap();

        store
            .replace_spans("src/lib.rs", &[sample_span("a", 1), sample_span("b", 10)])
            .unwrap();
        assert_eq!(store.spans_for_file("src/lib.rs").unwrap().len(), 2);

        store
            .replace_spans("src/lib.rs", &[sample_span("b", 10), sample_span("c", 20)])
            .unwrap();
        let remaining: HashSet<String> = store
            .spans_for_file("src/lib.rs")
            .unwrap()
            .into_iter()
            .map(|s| s.span_hash)
            .collect();
        assert_eq!(remaining, HashSet::from(["b".to_string(), "c".to_string()]));
    }

    #[test]
    fn replace_spans_with_empty_new_preserves_existing() {
        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord {
                path: PathBuf::from("src/lib.rs"),
                lang: "rust".into(),
                file_hash: "h1".into(),
                size: 100,
                mtime: 0.0,
            })
            .unwrap();
        store.replace_spans("src/lib.rs", &[sample_span("a", 1)]).unwrap();
        store.replace_spans("src/lib.rs", &[]).unwrap();
        assert_eq!(store.spans_for_file("src/lib.rs").unwrap().len(), 1);
    }

    #[test]
    fn store_and_unpack_embedding_round_trips() {
        let store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord {
                path: PathBuf::from("src/lib.rs"),
                lang: "rust".into(),
                file_hash: "h1".into(),
                size: 100,
                mtime: 0.0,
            })
            .unwrap();
        store.replace_spans("src/lib.rs", &[sample_span("a", 1)]).unwrap();
        let vector = vec![0.1f32, 0.2, -0.3];
        store.store_embedding("a", &vector, "docs", "default", "embeddings").unwrap();

        let blob: Vec<u8> = store
            .connection()
            .query_row("SELECT vector FROM embeddings WHERE span_hash = 'a'", [], |r| r.get(0))
            .unwrap();
        let round_tripped = unpack_f32le(&blob);
        assert_eq!(round_tripped, vector);
    }

    #[test]
    fn store_embedding_rejects_unknown_table() {
        let store = SpanStore::open_in_memory().unwrap();
        let err = store.store_embedding("a", &[1.0], "docs", "default", "bogus_table");
        assert!(err.is_err());
    }

    #[test]
    fn pending_enrichments_skips_recently_modified_files() {
        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord {
                path: PathBuf::from("src/lib.rs"),
                lang: "rust".into(),
                file_hash: "h1".into(),
                size: 100,
                mtime: unix_now(),
            })
            .unwrap();
        store.replace_spans("src/lib.rs", &[sample_span("a", 1)]).unwrap();
        let pending = store.pending_enrichments(10, 30).unwrap();
        assert!(pending.is_empty());
    }
}
