//! Query-intent-aware adjustments layered on top of rerank scores: extension and
//! filename-match boosts/penalties that push code results up for code-shaped queries
//! and docs up for doc-shaped queries.

use crate::config::ScoringConfig;

/// Coarse classification of what a query is probably looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Docs,
    Code,
    Neutral,
}

const DOC_KEYWORDS: &[&str] = &["how to", "guide", "tutorial", "explain", "overview", "what is"];
const CODE_KEYWORDS: &[&str] = &["function", "class", "def ", "import ", "return ", "async "];

const CODE_EXTENSIONS: &[&str] =
    &["rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "cc", "cpp", "h", "hpp", "rb", "php", "cs"];
const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt", "adoc"];

/// Classify `query`'s intent from simple keyword and identifier-casing heuristics.
pub fn detect_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();
    if DOC_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return QueryIntent::Docs;
    }
    if CODE_KEYWORDS.iter().any(|k| lower.contains(k)) || looks_like_identifier(query) {
        return QueryIntent::Code;
    }
    QueryIntent::Neutral
}

fn looks_like_identifier(query: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.contains('_') && trimmed.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return true;
    }
    let has_lower = trimmed.chars().any(|c| c.is_lowercase());
    let has_upper_inside = trimmed.chars().skip(1).any(|c| c.is_uppercase());
    has_lower && has_upper_inside && !trimmed.contains(' ')
}

/// Boost or penalize a path based on its extension and the query's detected intent.
/// Test-path penalties are applied first and are not intent-sensitive.
pub fn score_extension(path: &str, intent: QueryIntent, cfg: &ScoringConfig) -> f64 {
    let lower = path.to_lowercase();
    if is_test_path(&lower) {
        return cfg.test_penalty;
    }

    let extension = lower.rsplit('.').next().unwrap_or("");
    let is_code = CODE_EXTENSIONS.contains(&extension);
    let is_doc = DOC_EXTENSIONS.contains(&extension);

    let mut score = if is_code {
        cfg.extension_boost
    } else if is_doc {
        cfg.doc_penalty
    } else {
        0.0
    };

    match (intent, is_code, is_doc) {
        (QueryIntent::Code, true, _) => score *= 1.5,
        (QueryIntent::Docs, _, true) => score *= 1.5,
        (QueryIntent::Code, _, true) => score *= -1.0,
        (QueryIntent::Docs, true, _) => score *= -1.0,
        _ => {}
    }
    score
}

fn is_test_path(lower_path: &str) -> bool {
    lower_path.contains("/test") || lower_path.contains("test_") || lower_path.contains("_test.")
}

/// Boost a path if its basename matches `query` exactly, by stem, or as a substring.
pub fn score_filename_match(query: &str, path: &str, cfg: &ScoringConfig) -> f64 {
    let basename = path.rsplit('/').next().unwrap_or(path);
    let stem = basename.rsplit_once('.').map(|(s, _)| s).unwrap_or(basename);
    let query_lower = query.trim().to_lowercase();
    if query_lower.is_empty() {
        return 0.0;
    }
    if basename.to_lowercase() == query_lower {
        return cfg.filename_match_exact;
    }
    if stem.to_lowercase() == query_lower {
        return cfg.filename_match_stem;
    }
    if basename.to_lowercase().contains(&query_lower) {
        return cfg.filename_match_partial;
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_doc_intent() {
        assert_eq!(detect_intent("how to configure logging"), QueryIntent::Docs);
    }

    #[test]
    fn detects_code_intent_from_keyword() {
        assert_eq!(detect_intent("def parse_config"), QueryIntent::Code);
    }

    #[test]
    fn detects_code_intent_from_snake_case() {
        assert_eq!(detect_intent("parse_config_file"), QueryIntent::Code);
    }

    #[test]
    fn test_paths_always_penalized() {
        let cfg = ScoringConfig::default();
        let score = score_extension("src/tests/foo_test.rs", QueryIntent::Code, &cfg);
        assert_eq!(score, cfg.test_penalty);
    }

    #[test]
    fn code_intent_amplifies_code_extension_boost() {
        let cfg = ScoringConfig::default();
        let neutral = score_extension("src/lib.rs", QueryIntent::Neutral, &cfg);
        let boosted = score_extension("src/lib.rs", QueryIntent::Code, &cfg);
        assert!(boosted > neutral);
    }

    #[test]
    fn exact_filename_match_outranks_partial() {
        let cfg = ScoringConfig::default();
        let exact = score_filename_match("lib.rs", "src/lib.rs", &cfg);
        let partial = score_filename_match("lib", "src/liblike.rs", &cfg);
        assert!(exact > partial);
    }
}
