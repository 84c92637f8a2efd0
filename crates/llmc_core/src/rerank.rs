//! Composite reranking over raw FTS hits: BM25 plus token/path/substring overlap.
//!
//! BM25 alone over-weights rare-token coincidence; blending in unigram/bigram
//! Jaccard overlap and a literal-substring bonus keeps results anchored to the
//! query's actual words even when the tokenizer's ranking is noisy.

use std::collections::HashSet;

use crate::span_store::FtsHit;

/// Per-component weights for [`rerank_hits`]. Defaults match the reference weighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    pub bm25: f64,
    pub unigram: f64,
    pub bigram: f64,
    pub path: f64,
    pub literal: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self { bm25: 0.60, unigram: 0.20, bigram: 0.15, path: 0.03, literal: 0.02 }
    }
}

/// A single reranked hit, ready for presentation.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub score: f64,
}

const MAX_TEXT_CHARS: usize = 1500;

/// Rerank raw FTS hits against `query`, returning the top `top_k` by composite score.
pub fn rerank_hits(query: &str, hits: &[FtsHit], top_k: usize, weights: RerankWeights) -> Vec<RankedHit> {
    let query_tokens = tokens(query);
    let query_bigrams = bigrams(&query_tokens);
    let query_token_set: HashSet<String> = query_tokens.iter().cloned().collect();
    let query_joined = query_tokens.join(" ");

    let mut ranked: Vec<RankedHit> = hits
        .iter()
        .map(|hit| {
            let truncated: String = hit.text.chars().take(MAX_TEXT_CHARS).collect();
            let hit_tokens = tokens(&truncated);
            let hit_bigrams = bigrams(&hit_tokens);
            let hit_token_set: HashSet<String> = hit_tokens.into_iter().collect();
            let path_tokens: HashSet<String> = tokens(&hit.file_path.replace(['/', '\\', '.', '_', '-'], " ")).into_iter().collect();

            let bm25 = normalize_bm25(hit.bm25_raw);
            let uni = jaccard(&query_token_set, &hit_token_set);
            let bi = jaccard(&query_bigrams, &hit_bigrams);
            let path = jaccard(&query_token_set, &path_tokens);
            let lit = presence(&query_joined, &truncated);

            let score = weights.bm25 * bm25
                + weights.unigram * uni
                + weights.bigram * bi
                + weights.path * path
                + weights.literal * lit;

            RankedHit {
                file: hit.file_path.clone(),
                start_line: hit.start_line,
                end_line: hit.end_line,
                text: hit.text.clone(),
                score,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);
    ranked
}

/// Normalize a raw (lower-is-better) BM25 score into a higher-is-better `(0, 1]` value.
/// Guards against NaN/negative-infinity scores some FTS backends can emit.
pub fn normalize_bm25(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    1.0 / (1.0 + raw.max(0.0))
}

/// Tokenize into lowercase alphanumeric (+ underscore) runs, preserving order and
/// duplicates — [`bigrams`] needs sequence adjacency, not just set membership.
fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            current.push(c.to_ascii_lowercase());
        } else if !current.is_empty() {
            if current.len() > 1 {
                out.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.len() > 1 {
        out.push(current);
    }
    out
}

/// Consecutive-token bigrams from an ordered token sequence, e.g. `"train model"` is
/// distinct from `"model train"`.
fn bigrams(tokens: &[String]) -> HashSet<String> {
    tokens.windows(2).map(|w| format!("{} {}", w[0], w[1])).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn presence(query: &str, text: &str) -> f64 {
    if query.trim().is_empty() {
        return 0.0;
    }
    if text.to_lowercase().contains(&query.to_lowercase()) {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(file: &str, text: &str, bm25_raw: f64) -> FtsHit {
        FtsHit { file_path: file.into(), start_line: 1, end_line: 10, text: text.into(), bm25_raw }
    }

    #[test]
    fn exact_token_overlap_outranks_pure_bm25_noise() {
        let hits = vec![
            hit("src/router.rs", "routes the request to a backend", 2.0),
            hit("src/unrelated.rs", "completely different content here", 0.1),
        ];
        let ranked = rerank_hits("route request backend", &hits, 10, RerankWeights::default());
        assert_eq!(ranked[0].file, "src/router.rs");
    }

    #[test]
    fn normalize_bm25_handles_non_finite() {
        assert_eq!(normalize_bm25(f64::NAN), 0.0);
        assert_eq!(normalize_bm25(f64::NEG_INFINITY), 0.0);
        assert!(normalize_bm25(0.0) > 0.0);
    }

    #[test]
    fn top_k_truncates() {
        let hits: Vec<FtsHit> = (0..5).map(|i| hit(&format!("f{i}.rs"), "model system data", 1.0)).collect();
        let ranked = rerank_hits("model", &hits, 2, RerankWeights::default());
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn bigrams_respect_token_order() {
        let forward = tokens("train model");
        let reversed = tokens("model train");
        assert_ne!(bigrams(&forward), bigrams(&reversed));
        assert_eq!(bigrams(&forward), HashSet::from(["train model".to_string()]));
        assert_eq!(bigrams(&reversed), HashSet::from(["model train".to_string()]));
    }

    #[test]
    fn literal_presence_matches_normalized_tokens_not_raw_punctuation() {
        let hits = vec![hit("src/a.rs", "calls train_model during setup", 1.0)];
        let ranked = rerank_hits("train_model()", &hits, 10, RerankWeights::default());
        // The raw query contains "()", which never appears in the hit text; the literal
        // signal must still fire because it compares normalized tokens ("train_model").
        assert!(ranked[0].score > 0.0);
    }
}
