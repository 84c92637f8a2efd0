//! Tries backends in order until one produces a response; records every attempt.

use crate::enrichment::backend::{GenerateResult, HttpBackend};
use crate::error::{LlmcError, Result};

/// A single backend attempt's outcome, kept regardless of success for logging.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Backend name this attempt targeted.
    pub backend_name: String,
    /// `None` on success; the error description on failure.
    pub error: Option<String>,
}

/// Try each backend in order, returning the first successful [`GenerateResult`] along with
/// the full attempt log (including the winning attempt). If every backend fails, returns
/// [`LlmcError::BackendExhausted`] carrying a description of each attempt.
pub async fn run_cascade(backends: &[HttpBackend], prompt: &str, max_tokens: u32) -> Result<(GenerateResult, Vec<Attempt>)> {
    let mut attempts = Vec::with_capacity(backends.len());
    for backend in backends {
        match backend.generate(prompt, max_tokens).await {
            Ok(result) => {
                attempts.push(Attempt { backend_name: backend.name().to_string(), error: None });
                return Ok((result, attempts));
            }
            Err(e) => {
                attempts.push(Attempt { backend_name: backend.name().to_string(), error: Some(e.to_string()) });
            }
        }
    }
    Err(LlmcError::BackendExhausted {
        attempts: attempts.iter().map(|a| format!("{}: {}", a.backend_name, a.error.as_deref().unwrap_or("?"))).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn cascade_exhausts_when_all_backends_unreachable() {
        let backends = vec![
            HttpBackend::new(
                BackendConfig { name: "b1".into(), base_url: "http://127.0.0.1:1".into(), ..Default::default() },
                Duration::from_millis(200),
            ),
            HttpBackend::new(
                BackendConfig { name: "b2".into(), base_url: "http://127.0.0.1:2".into(), ..Default::default() },
                Duration::from_millis(200),
            ),
        ];
        let result = run_cascade(&backends, "prompt", 100).await;
        match result {
            Err(LlmcError::BackendExhausted { attempts }) => assert_eq!(attempts.len(), 2),
            other => panic!("expected BackendExhausted, got {other:?}"),
        }
    }
}
