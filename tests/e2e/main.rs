//! End-to-end scenarios from the system's testable-properties checklist: incremental
//! preservation across reindex, tier escalation, the freshness gate, the FTS stopword
//! regression, and differential safety when an extractor returns zero spans.

use std::path::PathBuf;

use llmc_core::{
    compute_route, save_status, BackendMeta, EnrichmentPayload, FileRecord, FreshnessState,
    IndexState, IndexStatus, RegexExtractor, SliceType, SpanExtractor, SpanRecord, SpanStore,
    WorkQueue,
};

fn extractors() -> Vec<Box<dyn SpanExtractor>> {
    RegexExtractor::standard_set().into_iter().map(|e| Box::new(e) as Box<dyn SpanExtractor>).collect()
}

/// S1 - incremental preservation: appending a new function to a file must leave the
/// existing function's span_hash (and its enrichment) untouched.
#[test]
fn s1_incremental_preservation_across_reindex() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("foo.py"), "def bar(): return 42\n").unwrap();

    let mut store = SpanStore::open_in_memory().unwrap();
    let indexer = llmc_core::Indexer::new(dir.path(), extractors(), Default::default());
    let jsonl = dir.path().join("spans.jsonl");

    let report = indexer.run(&mut store, &jsonl).unwrap();
    assert_eq!(report.spans_added, 1);

    let spans = store.spans_for_file("foo.py").unwrap();
    assert_eq!(spans.len(), 1);
    let bar_hash = spans[0].span_hash.clone();

    store
        .store_enrichment(
            &bar_hash,
            "bar",
            &EnrichmentPayload {
                summary_120w: "test summary".into(),
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

    std::fs::write(dir.path().join("foo.py"), "def bar(): return 42\ndef baz(): return 7\n").unwrap();
    // Force the hash path rather than the mtime/size fast-path, since both could land in
    // the same wall-clock second in a fast test run.
    std::thread::sleep(std::time::Duration::from_millis(5));

    let report2 = indexer.run(&mut store, &jsonl).unwrap();
    assert_eq!(report2.spans_added, 1, "only baz should be newly added");

    let spans_after = store.spans_for_file("foo.py").unwrap();
    assert_eq!(spans_after.len(), 2);

    let bar_after = spans_after.iter().find(|s| s.symbol == "bar").unwrap();
    assert_eq!(bar_after.span_hash, bar_hash, "bar's span_hash must be stable across the edit");

    let enrichment = store.all_enrichments().unwrap();
    assert!(enrichment.iter().any(|e| e.span_hash == bar_hash), "bar's enrichment must survive reindex");
}

/// S3 - tier escalation: attempts reaching attempts_per_tier escalate the item (attempts
/// reset); hitting max_tier deletes the item and records a permanent failure.
#[test]
fn s3_tier_escalation_and_permanent_failure() {
    let queue = WorkQueue::open_in_memory().unwrap();
    queue.push_work("/repo", "hash1", "a.py", 3).unwrap();

    let items = queue.pull_work("w1", 0, 10).unwrap();
    assert_eq!(items.len(), 1);
    let id = items[0].id;

    // fail_work without a worker_id skips the ownership check, matching a tier-0 item that
    // keeps failing without another worker re-claiming it in between attempts.
    for _ in 0..3 {
        queue.fail_work(id, "boom", None, 1, 3).unwrap();
    }

    let stats = queue.stats().unwrap();
    assert_eq!(stats.pending, 1, "item should still be queued after escalating, not dropped");

    let escalated = queue.pull_work("w1", 1, 10).unwrap();
    assert_eq!(escalated.len(), 1, "item should now be claimable at tier 1");
    assert_eq!(escalated[0].id, id);

    for _ in 0..3 {
        queue.fail_work(id, "boom again", None, 1, 3).unwrap();
    }

    let stats_after = queue.stats().unwrap();
    assert_eq!(stats_after.pending, 0, "item must be removed from the queue after max_tier is exhausted");

    let failures = queue.list_permanent_failures(10).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1, "hash1");
}

/// S4 - freshness gate: compute_route is a pure function of (index_status, git HEAD).
#[test]
fn s4_freshness_gate_matches_and_mismatches_head() {
    let dir = tempfile::tempdir().unwrap();
    std::process::Command::new("git").arg("init").arg("-q").current_dir(dir.path()).status().unwrap();
    std::process::Command::new("git")
        .args(["config", "user.email", "test@example.com"])
        .current_dir(dir.path())
        .status()
        .unwrap();
    std::process::Command::new("git").args(["config", "user.name", "test"]).current_dir(dir.path()).status().unwrap();
    std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
    std::process::Command::new("git").args(["add", "."]).current_dir(dir.path()).status().unwrap();
    std::process::Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir.path()).status().unwrap();

    let head = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    let head_sha = String::from_utf8_lossy(&head.stdout).trim().to_string();

    let status = IndexStatus {
        repo: dir.path().to_string_lossy().into_owned(),
        index_state: IndexState::Fresh,
        last_indexed_at: "2026-01-01T00:00:00Z".into(),
        last_indexed_commit: Some(head_sha.clone()),
        schema_version: "7".into(),
        last_error: None,
    };
    save_status(dir.path(), &status).unwrap();

    let route = compute_route(dir.path());
    assert!(route.use_rag);
    assert_eq!(route.freshness_state, FreshnessState::Fresh);

    let stale_status = IndexStatus { last_indexed_commit: Some("0000000deadbeef".into()), ..status };
    save_status(dir.path(), &stale_status).unwrap();
    let route2 = compute_route(dir.path());
    assert!(!route2.use_rag);
    assert_eq!(route2.freshness_state, FreshnessState::Stale);
}

/// S5 - FTS stopword regression: a Porter-tokenized index would drop "model" as a
/// stopword; the required unicode61 tokenizer must not.
#[test]
fn s5_fts_does_not_drop_domain_stopwords() {
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
                symbol: "train_model".into(),
                kind: "function".into(),
                start_line: 1,
                end_line: 3,
                byte_start: 0,
                byte_end: 30,
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
    store
        .store_enrichment(
            "hash1",
            "train_model",
            &EnrichmentPayload {
                summary_120w: "Trains the model using the system's data pipeline.".into(),
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

    store.rebuild_fts().unwrap();

    for keyword in ["model", "system", "data"] {
        let hits = store.search_fts(keyword, 10).unwrap();
        assert!(!hits.is_empty(), "keyword {keyword:?} must not be filtered as a stopword");
    }
}

/// S6 - differential safety: an extractor returning zero spans for a previously
/// non-empty file must not delete existing spans.
#[test]
fn s6_empty_replacement_preserves_existing_spans() {
    let mut store = SpanStore::open_in_memory().unwrap();
    store
        .upsert_file(&FileRecord { path: "a.py".into(), lang: "python".into(), file_hash: "h".into(), size: 10, mtime: 0.0 })
        .unwrap();

    let spans: Vec<SpanRecord> = (0..5)
        .map(|i| SpanRecord {
            file_path: PathBuf::from("a.py"),
            lang: "python".into(),
            symbol: format!("s{i}"),
            kind: "function".into(),
            start_line: 1,
            end_line: 2,
            byte_start: 0,
            byte_end: 10,
            span_hash: format!("hash{i}"),
            doc_hint: None,
            imports: vec![],
            slice_type: SliceType::Code,
            slice_language: Some("python".into()),
            classifier_confidence: 0.9,
            classifier_version: "heuristic-v1".into(),
        })
        .collect();
    store.replace_spans("a.py", &spans).unwrap();
    assert_eq!(store.spans_for_file("a.py").unwrap().len(), 5);

    store.replace_spans("a.py", &[]).unwrap();
    assert_eq!(store.spans_for_file("a.py").unwrap().len(), 5, "empty replacement must be a no-op, not a deletion");
}

/// Round-trip law: reindexing an unchanged tree reports zero churn.
#[test]
fn reindexing_unchanged_tree_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "def f(): pass\n").unwrap();

    let mut store = SpanStore::open_in_memory().unwrap();
    let indexer = llmc_core::Indexer::new(dir.path(), extractors(), Default::default());
    let jsonl = dir.path().join("spans.jsonl");

    let first = indexer.run(&mut store, &jsonl).unwrap();
    assert_eq!(first.files_changed, 1);

    let second = indexer.run(&mut store, &jsonl).unwrap();
    assert_eq!(second.files_changed, 0);
    assert_eq!(second.files_unchanged, 1);
}
