//! Export (C9): archive a repo's index into a single portable tarball.
//!
//! Mirrors the layout of the original index exporter: a chunks JSONL (one line per
//! span, joined with its file and enrichment), a packed float32 embeddings matrix
//! when any exist, and a metadata JSON describing the export.

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tar::Builder;
use tracing::info;

use crate::error::Result;
use crate::span_store::{unpack_f32le, SpanStore};

/// Schema-version tag embedded in export metadata, bumped alongside [`crate::span_store::DB_SCHEMA_VERSION`].
const EXPORT_FORMAT_VERSION: &str = "2.2.0";

#[derive(Serialize)]
struct ChunkRow<'a> {
    file_path: String,
    language: &'a str,
    symbol: &'a str,
    kind: &'a str,
    start_line: u32,
    end_line: u32,
    span_hash: &'a str,
    doc_hint: &'a Option<String>,
}

#[derive(Serialize)]
struct ExportMetadata {
    export_timestamp: String,
    repo_root: String,
    files: i64,
    spans: i64,
    embeddings: i64,
    export_format_version: &'static str,
}

/// Export `repo_root`'s index (read from `store`) to a `.tar.gz` archive.
///
/// `output_path` defaults to `<repo_root>/llmc-export-<timestamp>.tar.gz` when `None`.
/// `timestamp` is caller-supplied (ISO-8601-ish, used verbatim in the filename and
/// metadata) since this crate never calls wall-clock time internally.
pub fn export_all_data(repo_root: &Path, store: &SpanStore, output_path: Option<&Path>, timestamp: &str) -> Result<PathBuf> {
    let default_name = format!("llmc-export-{}.tar.gz", timestamp.replace([':', ' '], "-"));
    let output_path = output_path.map(PathBuf::from).unwrap_or_else(|| repo_root.join(default_name));

    let temp_dir = repo_root.join(".rag").join("export_temp");
    std::fs::create_dir_all(&temp_dir)?;

    let chunks_path = temp_dir.join("chunks.jsonl");
    let spans_written = write_chunks(store, &chunks_path)?;

    let embeddings_path = temp_dir.join("embeddings.bin");
    let embeddings_written = write_embeddings(store, &embeddings_path)?;

    let metadata_path = temp_dir.join("metadata.json");
    let stats = store.stats()?;
    let metadata = ExportMetadata {
        export_timestamp: timestamp.to_string(),
        repo_root: repo_root.to_string_lossy().into_owned(),
        files: stats.files,
        spans: stats.spans,
        embeddings: stats.embeddings,
        export_format_version: EXPORT_FORMAT_VERSION,
    };
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    let tar_gz = File::create(&output_path)?;
    let encoder = GzEncoder::new(tar_gz, Compression::default());
    let mut archive = Builder::new(encoder);
    archive.append_path_with_name(&chunks_path, "chunks.jsonl")?;
    if embeddings_written > 0 {
        archive.append_path_with_name(&embeddings_path, "embeddings.bin")?;
    }
    archive.append_path_with_name(&metadata_path, "metadata.json")?;
    archive.into_inner()?.finish()?;

    std::fs::remove_dir_all(&temp_dir).ok();

    info!(path = %output_path.display(), spans = spans_written, embeddings = embeddings_written, "exported index archive");
    Ok(output_path)
}

fn write_chunks(store: &SpanStore, path: &Path) -> Result<usize> {
    let mut file = File::create(path)?;
    let spans = store.all_spans()?;
    let count = spans.len();
    for span in &spans {
        let row = ChunkRow {
            file_path: span.file_path.to_string_lossy().into_owned(),
            language: &span.lang,
            symbol: &span.symbol,
            kind: &span.kind,
            start_line: span.start_line,
            end_line: span.end_line,
            span_hash: &span.span_hash,
            doc_hint: &span.doc_hint,
        };
        writeln!(file, "{}", serde_json::to_string(&row)?)?;
    }
    Ok(count)
}

fn write_embeddings(store: &SpanStore, path: &Path) -> Result<usize> {
    let conn = store.connection();
    let mut stmt = conn.prepare("SELECT vector FROM embeddings UNION ALL SELECT vector FROM emb_code")?;
    let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

    let mut file = File::create(path)?;
    let mut count = 0;
    for row in rows {
        let blob = row?;
        let vector = unpack_f32le(&blob);
        for v in vector {
            file.write_all(&v.to_le_bytes())?;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileRecord, SliceType, SpanRecord};

    #[test]
    fn exports_chunks_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SpanStore::open_in_memory().unwrap();
        store
            .upsert_file(&FileRecord { path: "a.py".into(), lang: "python".into(), file_hash: "h".into(), size: 10, mtime: 0.0 })
            .unwrap();
        store
            .replace_spans(
                "a.py",
                &[SpanRecord {
                    file_path: "a.py".into(),
                    lang: "python".into(),
                    symbol: "foo".into(),
                    kind: "function".into(),
                    start_line: 1,
                    end_line: 2,
                    byte_start: 0,
                    byte_end: 10,
                    span_hash: "hash1".into(),
                    doc_hint: None,
                    imports: vec![],
                    slice_type: SliceType::Code,
                    slice_language: Some("python".into()),
                    classifier_confidence: 0.9,
                    classifier_version: "heuristic-v1".into(),
                }],
            )
            .unwrap();

        let archive_path = export_all_data(dir.path(), &store, None, "2026-01-01T00-00-00Z").unwrap();
        assert!(archive_path.exists());
        assert!(archive_path.to_string_lossy().ends_with(".tar.gz"));
    }
}
