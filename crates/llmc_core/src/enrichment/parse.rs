//! Parses a backend's raw text response into an [`EnrichmentPayload`].

use crate::error::{LlmcError, Result};
use crate::types::EnrichmentPayload;

/// Strip markdown code fences, then attempt a strict JSON parse; on failure, fall back to
/// locating the outermost `{...}` block and retrying. Backends are prone to wrapping valid
/// JSON in prose or fences despite being asked not to.
pub fn parse_enrichment(raw: &str) -> Result<EnrichmentPayload> {
    let stripped = strip_fences(raw);

    if let Ok(payload) = serde_json::from_str::<EnrichmentPayload>(&stripped) {
        return Ok(payload);
    }

    let candidate = extract_outermost_braces(&stripped)
        .ok_or_else(|| LlmcError::EnrichmentInvalid("no JSON object found in response".to_string()))?;

    serde_json::from_str(&candidate)
        .map_err(|e| LlmcError::EnrichmentInvalid(format!("could not parse JSON object: {e}")))
}

fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().trim_end_matches("```").trim().to_string()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

fn extract_outermost_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json() {
        let raw = r#"{"summary_120w": "does x", "inputs": [], "outputs": [], "side_effects": [], "pitfalls": [], "usage_snippet": null, "evidence": []}"#;
        let payload = parse_enrichment(raw).unwrap();
        assert_eq!(payload.summary_120w, "does x");
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"summary_120w\": \"x\", \"inputs\": [], \"outputs\": [], \"side_effects\": [], \"pitfalls\": [], \"usage_snippet\": null, \"evidence\": []}\n```";
        let payload = parse_enrichment(raw).unwrap();
        assert_eq!(payload.summary_120w, "x");
    }

    #[test]
    fn recovers_json_embedded_in_prose() {
        let raw = "Sure, here is the summary:\n{\"summary_120w\": \"x\", \"inputs\": [], \"outputs\": [], \"side_effects\": [], \"pitfalls\": [], \"usage_snippet\": null, \"evidence\": []}\nHope that helps!";
        let payload = parse_enrichment(raw).unwrap();
        assert_eq!(payload.summary_120w, "x");
    }

    #[test]
    fn rejects_non_json_garbage() {
        assert!(parse_enrichment("not json at all").is_err());
    }
}
