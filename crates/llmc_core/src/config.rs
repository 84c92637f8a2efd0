//! Typed configuration for a repo's `llmc.toml`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LlmcError, Result};

/// Top-level configuration tree, loaded from `<repo>/llmc.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File discovery and ignore rules.
    pub ignore: IgnoreConfig,
    /// Work queue tuning.
    pub work_queue: WorkQueueConfig,
    /// Enrichment backend cascade and prompting.
    pub enrichment: EnrichmentConfig,
    /// Retrieval-time reranking.
    pub rerank: RerankConfig,
    /// Extension/filename scoring adjustments.
    pub scoring: ScoringConfig,
    /// Retrieval facade behavior.
    pub retrieval: RetrievalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore: IgnoreConfig::default(),
            work_queue: WorkQueueConfig::default(),
            enrichment: EnrichmentConfig::default(),
            rerank: RerankConfig::default(),
            scoring: ScoringConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| LlmcError::Config(e.to_string()))
    }

    /// Serialize and write configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| LlmcError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Discovery and ignore-rule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Honor `.gitignore` files.
    pub use_gitignore: bool,
    /// Honor a repo-local `.ragignore` file, layered on top of `.gitignore`.
    pub use_ragignore: bool,
    /// Extra glob patterns to exclude, beyond gitignore/ragignore.
    pub extra_patterns: Vec<String>,
    /// Maximum file size (bytes) to consider for indexing.
    pub max_file_size: u64,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            use_ragignore: true,
            extra_patterns: default_exclude_patterns(),
            max_file_size: 2_000_000,
        }
    }
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".git".into(),
        "node_modules".into(),
        "target".into(),
        "__pycache__".into(),
        ".venv".into(),
        "dist".into(),
        "build".into(),
    ]
}

/// Work Queue behavior tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkQueueConfig {
    /// Seconds a claimed-but-unheartbeaten item is considered orphaned.
    pub orphan_timeout_seconds: u64,
    /// Max escalation tier before permanent failure.
    pub max_tier: i64,
    /// Attempts per tier before escalating.
    pub attempts_per_tier: i64,
    /// Settle-after-edit window: skip files modified more recently than this many seconds.
    pub cooldown_seconds: i64,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            orphan_timeout_seconds: 600,
            max_tier: 1,
            attempts_per_tier: 3,
            cooldown_seconds: 30,
        }
    }
}

/// LLM backend cascade and enrichment prompting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Ordered list of backends to try, first to last.
    pub backends: Vec<BackendConfig>,
    /// Maximum tokens to request per enrichment call.
    pub max_tokens: u32,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Maximum number of lines to include in a usage snippet.
    pub max_usage_snippet_lines: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            backends: vec![BackendConfig::default()],
            max_tokens: 1024,
            timeout_seconds: 60,
            max_usage_snippet_lines: 12,
        }
    }
}

/// A single LLM backend endpoint in the cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Human-readable backend name, used in logs and error messages.
    pub name: String,
    /// Base URL of the backend's API.
    pub base_url: String,
    /// Model identifier to request.
    pub model: String,
    /// Optional API key environment variable name.
    pub api_key_env: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            api_key_env: None,
        }
    }
}

/// Reranking configuration for retrieval results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Whether to apply FTS5 BM25 reranking on top of vector similarity.
    pub use_fts_rerank: bool,
    /// Weight given to the BM25 score relative to vector similarity, in [0, 1].
    pub fts_weight: f64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            use_fts_rerank: true,
            fts_weight: 0.3,
        }
    }
}

/// Extension and filename-match scoring adjustments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Boost applied to code-extension files when intent is "code".
    pub extension_boost: f64,
    /// Penalty applied to doc-extension files when intent is "code".
    pub doc_penalty: f64,
    /// Penalty applied to test-path files.
    pub test_penalty: f64,
    /// Boost for an exact filename match.
    pub filename_match_exact: f64,
    /// Boost for a stem (basename without extension) match.
    pub filename_match_stem: f64,
    /// Boost for a partial filename match.
    pub filename_match_partial: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            extension_boost: 0.08,
            doc_penalty: -0.06,
            test_penalty: -0.08,
            filename_match_exact: 0.20,
            filename_match_stem: 0.15,
            filename_match_partial: 0.05,
        }
    }
}

/// Retrieval facade behavior: graph expansion limits and freshness routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default number of results to return from a search.
    pub default_limit: usize,
    /// Maximum number of graph-neighbor items to splice into a result set.
    pub max_graph_expansion: usize,
    /// Number of hops to walk when expanding via the graph.
    pub graph_hops: u32,
    /// Whether to consult the freshness status before routing to the graph-backed path.
    pub require_fresh_index: bool,
    /// Whether to attach an enrichment summary (looked up by line-overlap) to each result.
    pub annotate_enrichments: bool,
    /// Maximum characters of enrichment summary text to attach per result.
    pub enrichment_char_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_graph_expansion: 20,
            graph_hops: 1,
            require_fresh_index: true,
            annotate_enrichments: true,
            enrichment_char_budget: 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.ignore.max_file_size, cfg.ignore.max_file_size);
        assert_eq!(parsed.enrichment.backends.len(), cfg.enrichment.backends.len());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/llmc.toml")).expect("defaults");
        assert_eq!(cfg.work_queue.max_tier, 1);
    }
}
