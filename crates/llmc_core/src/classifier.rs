//! Heuristic content classifier: assigns a span's routing tags from a preview of its bytes.
//!
//! This is deliberately cheap — a handful of substring and extension checks — since it runs
//! on every span of every indexed file. It is not a language parser.

use crate::types::SliceType;

/// Implementation version stamped onto every span this classifier tags. Bump when the
/// heuristic changes meaningfully, so stored spans can be told apart from future behavior.
pub const CLASSIFIER_VERSION: &str = "heuristic-v1";

const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt", "adoc"];
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json", "ini", "cfg"];

/// Result of classifying a span preview.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Content routing bucket.
    pub slice_type: SliceType,
    /// Finer-grained language guess, if distinguishable from the file's declared language.
    pub slice_language: Option<String>,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Classify a span given its owning file's extension, declared language, and a text preview
/// of its bytes (the first few hundred bytes are sufficient; callers need not pass the whole
/// span).
pub fn classify(file_extension: &str, lang: &str, preview: &str) -> Classification {
    let ext = file_extension.trim_start_matches('.').to_lowercase();

    if DOC_EXTENSIONS.contains(&ext.as_str()) {
        return Classification { slice_type: SliceType::Docs, slice_language: Some("prose".into()), confidence: 0.95 };
    }
    if CONFIG_EXTENSIONS.contains(&ext.as_str()) {
        return Classification { slice_type: SliceType::Config, slice_language: Some(ext), confidence: 0.9 };
    }

    let trimmed = preview.trim_start();
    let looks_like_docstring = trimmed.starts_with("\"\"\"") || trimmed.starts_with("///") || trimmed.starts_with("/**");
    let has_code_markers = ["fn ", "def ", "class ", "impl ", "function ", "const ", "let ", "import ", "use "]
        .iter()
        .any(|marker| preview.contains(marker));

    if looks_like_docstring && !has_code_markers {
        Classification { slice_type: SliceType::Docs, slice_language: Some("prose".into()), confidence: 0.6 }
    } else if has_code_markers {
        Classification { slice_type: SliceType::Code, slice_language: Some(lang.to_string()), confidence: 0.85 }
    } else {
        Classification { slice_type: SliceType::Code, slice_language: Some(lang.to_string()), confidence: 0.5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_markdown_as_docs() {
        let c = classify("md", "markdown", "# Heading\n\nSome prose.");
        assert_eq!(c.slice_type, SliceType::Docs);
    }

    #[test]
    fn classifies_toml_as_config() {
        let c = classify("toml", "toml", "[package]\nname = \"x\"");
        assert_eq!(c.slice_type, SliceType::Config);
    }

    #[test]
    fn classifies_rust_function_as_code() {
        let c = classify("rs", "rust", "fn main() { println!(\"hi\"); }");
        assert_eq!(c.slice_type, SliceType::Code);
        assert!(c.confidence > 0.8);
    }
}
