//! Prompt construction: merges span metadata and a code snippet into the enrichment template.

use crate::enrichment::EnrichmentItem;

/// Default prompt template, used when no override is configured. `{snippet}`, `{path}`,
/// `{lines}`, and `{content_type}` are substituted.
pub const DEFAULT_TEMPLATE: &str = r#"You are analyzing a code span from {path}, lines {lines} ({content_type}).

Respond with a single JSON object matching this schema exactly, no markdown fences:
{{"summary_120w": string, "inputs": [string], "outputs": [string], "side_effects": [string],
  "pitfalls": [string], "usage_snippet": string|null, "evidence": [{{"field": string, "lines": [int, int]}}]}}

Span:
```
{snippet}
```
"#;

/// Builds prompts from a template, truncating the code snippet to `max_chars`.
pub struct PromptBuilder {
    template: String,
    max_chars: usize,
}

impl PromptBuilder {
    /// Build a prompt builder from a config-provided template (or the built-in default) and
    /// a maximum snippet length.
    pub fn new(template: Option<String>, max_chars: usize) -> Self {
        Self { template: template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()), max_chars }
    }

    /// Render the final prompt string for `item`.
    pub fn build(&self, item: &EnrichmentItem) -> String {
        let snippet = truncate_chars(&item.code_snippet, self.max_chars);
        self.template
            .replace("{snippet}", &snippet)
            .replace("{path}", &item.file_path)
            .replace("{lines}", &format!("{}-{}", item.line_range.0, item.line_range.1))
            .replace("{content_type}", &item.content_type)
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}\n… [truncated]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_substitutes_all_placeholders() {
        let builder = PromptBuilder::new(None, 1000);
        let item = EnrichmentItem {
            span_hash: "a".into(),
            code_snippet: "def bar(): return 42".into(),
            file_path: "foo.py".into(),
            line_range: (1, 1),
            content_type: "code".into(),
            classifier_confidence: 0.9,
        };
        let prompt = builder.build(&item);
        assert!(prompt.contains("foo.py"));
        assert!(prompt.contains("1-1"));
        assert!(prompt.contains("def bar(): return 42"));
    }

    #[test]
    fn build_truncates_long_snippets() {
        let builder = PromptBuilder::new(None, 10);
        let item = EnrichmentItem {
            span_hash: "a".into(),
            code_snippet: "x".repeat(100),
            file_path: "foo.py".into(),
            line_range: (1, 1),
            content_type: "code".into(),
            classifier_confidence: 0.9,
        };
        let prompt = builder.build(&item);
        assert!(prompt.contains("[truncated]"));
    }
}
