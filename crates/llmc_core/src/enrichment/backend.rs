//! LLM backend adapter: treated as an opaque text-in/text-out HTTP endpoint with throughput
//! metadata, per the retrieval engine's "external collaborator" boundary. This module owns
//! only the wire call; prompt construction and response parsing live in [`super::prompt`]
//! and [`super::parse`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::BackendConfig;
use crate::error::{LlmcError, Result};
use crate::types::BackendMeta;

/// One backend call's raw textual result plus reported performance metadata.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    /// Raw text returned by the backend (prior to markdown/JSON parsing).
    pub text: String,
    /// Performance metadata reported alongside the text.
    pub meta: BackendMeta,
}

/// A single backend endpoint, bound to a host/model pair. Implements the shared
/// `generate(prompt) -> (result, meta)` capability that the cascade composes as a plain
/// value list — no inheritance, just a vector of these.
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
    timeout: Duration,
}

impl HttpBackend {
    /// Build an adapter for `config`, applying `timeout` to every request.
    pub fn new(config: BackendConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { client, config, timeout }
    }

    /// Backend display name, used in cascade attempt logs.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Issue a generation request. Talks an Ollama-compatible `/api/generate` JSON protocol,
    /// the common denominator across local and self-hosted backends in this ecosystem.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<GenerateResult> {
        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).timeout(self.timeout).json(&json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "options": { "num_predict": max_tokens },
        }));

        if let Some(env_var) = &self.config.api_key_env {
            if let Ok(key) = std::env::var(env_var) {
                request = request.bearer_auth(key);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmcError::Config(format!("backend '{}' request failed: {e}", self.config.name)))?;

        if !response.status().is_success() {
            return Err(LlmcError::Config(format!(
                "backend '{}' returned HTTP {}",
                self.config.name,
                response.status()
            )));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmcError::Config(format!("backend '{}' returned unparseable body: {e}", self.config.name)))?;

        if body.response.trim().is_empty() {
            return Err(LlmcError::Config(format!("backend '{}' returned an empty response", self.config.name)));
        }

        let tokens_per_second = match (body.eval_count, body.eval_duration) {
            (Some(count), Some(duration_ns)) if duration_ns > 0 => {
                Some(count as f64 / (duration_ns as f64 / 1_000_000_000.0))
            }
            _ => None,
        };

        Ok(GenerateResult {
            text: body.response,
            meta: BackendMeta {
                model: Some(self.config.model.clone()),
                tokens_per_second,
                eval_count: body.eval_count,
                eval_duration_ns: body.eval_duration,
                prompt_eval_count: body.prompt_eval_count,
                total_duration_ns: body.total_duration,
                host: Some(self.config.base_url.clone()),
            },
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    eval_count: Option<i64>,
    eval_duration: Option<i64>,
    prompt_eval_count: Option<i64>,
    total_duration: Option<i64>,
}
