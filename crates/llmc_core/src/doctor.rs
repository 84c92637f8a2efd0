//! Doctor (C9): an operational health report over a repo's Span Store.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::span_store::SpanStore;

/// Coarse health verdict, used for operational gating (e.g. CI checks, pre-enrichment gates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Index looks populated and internally consistent.
    Ok,
    /// Index has no files/spans yet — not a failure, just unbuilt.
    Empty,
    /// Index is usable but has a notable backlog or inconsistency.
    Warn,
    /// Index shows signs of corruption or data loss (e.g. orphan enrichments).
    Broken,
}

/// A file and how many of its spans are still awaiting enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFile {
    pub file_path: String,
    pub pending_count: i64,
}

/// Full health report for a Span Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub files: i64,
    pub spans: i64,
    pub enrichments: i64,
    pub embeddings: i64,
    pub pending_without_enrichment: i64,
    pub pending_without_embedding: i64,
    pub orphan_enrichments: i64,
    pub top_pending_files: Vec<PendingFile>,
    pub status: HealthStatus,
}

const WARN_PENDING_RATIO: f64 = 0.5;
const TOP_N: usize = 10;

/// Run all doctor checks against `store`.
pub fn run_doctor(store: &SpanStore) -> Result<DoctorReport> {
    let stats = store.stats()?;
    let conn = store.connection();

    let pending_without_enrichment: i64 = conn.query_row(
        "SELECT COUNT(*) FROM spans s LEFT JOIN enrichments e ON s.span_hash = e.span_hash
         WHERE e.span_hash IS NULL",
        [],
        |r| r.get(0),
    )?;

    let pending_without_embedding: i64 = conn.query_row(
        "SELECT COUNT(*) FROM spans s
         WHERE NOT EXISTS (SELECT 1 FROM embeddings em WHERE em.span_hash = s.span_hash)
           AND NOT EXISTS (SELECT 1 FROM emb_code ec WHERE ec.span_hash = s.span_hash)",
        [],
        |r| r.get(0),
    )?;

    let orphan_enrichments: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enrichments e
         WHERE NOT EXISTS (SELECT 1 FROM spans s WHERE s.span_hash = e.span_hash)",
        [],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT file_path, COUNT(*) as pending FROM spans s
         LEFT JOIN enrichments e ON s.span_hash = e.span_hash
         WHERE e.span_hash IS NULL
         GROUP BY file_path ORDER BY pending DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([TOP_N as i64], |row| {
        Ok(PendingFile { file_path: row.get(0)?, pending_count: row.get(1)? })
    })?;
    let top_pending_files: Vec<PendingFile> = rows.collect::<rusqlite::Result<Vec<_>>>()?;

    let status = derive_status(stats.files, stats.spans, pending_without_enrichment, orphan_enrichments);

    Ok(DoctorReport {
        files: stats.files,
        spans: stats.spans,
        enrichments: stats.enrichments,
        embeddings: stats.embeddings,
        pending_without_enrichment,
        pending_without_embedding,
        orphan_enrichments,
        top_pending_files,
        status,
    })
}

fn derive_status(files: i64, spans: i64, pending: i64, orphans: i64) -> HealthStatus {
    if files == 0 && spans == 0 {
        return HealthStatus::Empty;
    }
    if orphans > 0 {
        return HealthStatus::Broken;
    }
    if spans > 0 && (pending as f64 / spans as f64) > WARN_PENDING_RATIO {
        return HealthStatus::Warn;
    }
    HealthStatus::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendMeta, EnrichmentPayload, FileRecord, SpanRecord};

    fn sample_span(symbol: &str, hash: &str) -> SpanRecord {
        SpanRecord {
            file_path: "a.py".into(),
            lang: "python".into(),
            symbol: symbol.into(),
            kind: "function".into(),
            start_line: 1,
            end_line: 2,
            byte_start: 0,
            byte_end: 10,
            span_hash: hash.into(),
            doc_hint: None,
            imports: vec![],
            slice_type: crate::types::SliceType::Code,
            slice_language: Some("python".into()),
            classifier_confidence: 0.9,
            classifier_version: "heuristic-v1".into(),
        }
    }

    #[test]
    fn empty_store_reports_empty_status() {
        let store = SpanStore::open_in_memory().unwrap();
        let report = run_doctor(&store).unwrap();
        assert_eq!(report.status, HealthStatus::Empty);
    }

    #[test]
    fn fully_enriched_store_reports_ok() {
        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord { path: "a.py".into(), lang: "python".into(), file_hash: "h".into(), size: 10, mtime: 0.0 })
            .unwrap();
        let span = sample_span("foo", "hash1");
        store.replace_spans("a.py", &[span]).unwrap();
        store
            .store_enrichment(
                "hash1",
                "foo",
                &EnrichmentPayload {
                    summary_120w: "s".into(),
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
        let report = run_doctor(&store).unwrap();
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.pending_without_enrichment, 0);
    }

    #[test]
    fn heavy_backlog_reports_warn() {
        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord { path: "a.py".into(), lang: "python".into(), file_hash: "h".into(), size: 10, mtime: 0.0 })
            .unwrap();
        let spans: Vec<SpanRecord> = (0..4).map(|i| sample_span(&format!("s{i}"), &format!("hash{i}"))).collect();
        store.replace_spans("a.py", &spans).unwrap();
        let report = run_doctor(&store).unwrap();
        assert_eq!(report.status, HealthStatus::Warn);
        assert_eq!(report.top_pending_files[0].pending_count, 4);
    }
}
