//! Schema and semantic validation of a parsed enrichment payload.

use crate::error::{LlmcError, Result};
use crate::types::EnrichmentPayload;

/// Validate `payload` against the span's own `[start_line, end_line]` range and the
/// schema's semantic constraints. Returns the first violation found.
pub fn validate(payload: &EnrichmentPayload, span_start_line: u32, span_end_line: u32, enforce_latin1: bool) -> Result<()> {
    let word_count = payload.summary_120w.split_whitespace().count();
    if word_count > 120 {
        return Err(LlmcError::EnrichmentInvalid(format!("summary has {word_count} words, limit is 120")));
    }

    if let Some(snippet) = &payload.usage_snippet {
        let line_count = snippet.lines().count();
        if line_count > 12 {
            return Err(LlmcError::EnrichmentInvalid(format!("usage_snippet has {line_count} lines, limit is 12")));
        }
    }

    for evidence in &payload.evidence {
        let [a, b] = evidence.lines;
        if a < span_start_line || a > span_end_line || b < span_start_line || b > span_end_line {
            return Err(LlmcError::EnrichmentInvalid(format!(
                "evidence for '{}' references lines [{a}, {b}] outside span range [{span_start_line}, {span_end_line}]",
                evidence.field
            )));
        }
    }

    if enforce_latin1 {
        let all_text = format!(
            "{} {} {} {} {} {}",
            payload.summary_120w,
            payload.inputs.join(" "),
            payload.outputs.join(" "),
            payload.side_effects.join(" "),
            payload.pitfalls.join(" "),
            payload.usage_snippet.as_deref().unwrap_or("")
        );
        if all_text.chars().any(|c| c as u32 > 0xFF) {
            return Err(LlmcError::EnrichmentInvalid("response contains non-Latin-1 characters".to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Evidence;

    fn payload(summary: &str) -> EnrichmentPayload {
        EnrichmentPayload {
            summary_120w: summary.to_string(),
            inputs: vec![],
            outputs: vec![],
            side_effects: vec![],
            pitfalls: vec![],
            usage_snippet: None,
            evidence: vec![],
            model: None,
            schema_version: None,
            tags: None,
        }
    }

    #[test]
    fn rejects_summary_over_120_words() {
        let long_summary = "word ".repeat(121);
        let err = validate(&payload(&long_summary), 1, 10, false);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_usage_snippet_over_12_lines() {
        let mut p = payload("ok");
        p.usage_snippet = Some("line\n".repeat(13));
        assert!(validate(&p, 1, 10, false).is_err());
    }

    #[test]
    fn rejects_evidence_outside_span_range() {
        let mut p = payload("ok");
        p.evidence.push(Evidence { field: "summary_120w".into(), lines: [50, 60] });
        assert!(validate(&p, 1, 10, false).is_err());
    }

    #[test]
    fn accepts_valid_payload() {
        let mut p = payload("ok");
        p.evidence.push(Evidence { field: "summary_120w".into(), lines: [2, 4] });
        assert!(validate(&p, 1, 10, false).is_ok());
    }

    #[test]
    fn rejects_non_latin1_when_enforced() {
        let p = payload("has emoji 🎉");
        assert!(validate(&p, 1, 10, true).is_err());
        assert!(validate(&p, 1, 10, false).is_ok());
    }
}
