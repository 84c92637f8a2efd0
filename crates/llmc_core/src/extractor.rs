//! Span extraction: the language-parser contract and a minimal reference implementation.
//!
//! The real language parser is an external collaborator — treated here purely as an
//! extractor contract. [`RegexExtractor`] is a small, dependency-free reference
//! implementation good enough to exercise the rest of the pipeline and tests; production
//! deployments are expected to supply a tree-sitter-backed (or similar) [`SpanExtractor`].

use std::path::Path;

/// One raw extracted span before hashing/classification is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSpan {
    /// Dotted qualified symbol name.
    pub symbol: String,
    /// function / class / method / module / ...
    pub kind: String,
    /// 1-based inclusive start line.
    pub start_line: u32,
    /// 1-based inclusive end line.
    pub end_line: u32,
    /// Byte offset start.
    pub byte_start: u64,
    /// Byte offset end (exclusive).
    pub byte_end: u64,
    /// Optional extracted doc-comment/docstring.
    pub doc_hint: Option<String>,
    /// Dotted names imported within this span (only meaningful for module-level spans).
    pub imports: Vec<String>,
}

/// Contract implemented by any language parser feeding the indexer.
pub trait SpanExtractor: Send + Sync {
    /// Language tag this extractor claims to handle (e.g. "python", "rust").
    fn language(&self) -> &str;

    /// Whether this extractor can handle a file with the given extension.
    fn handles_extension(&self, extension: &str) -> bool;

    /// Extract spans from a file's full byte contents.
    fn extract(&self, path: &Path, bytes: &[u8]) -> Vec<ExtractedSpan>;
}

/// A minimal regex-free, indentation/brace-aware extractor covering Python and brace-block
/// languages (Rust, JS/TS, Go, C/C++, Java) well enough for indexing and testing; it finds
/// top-level function/class-like declarations and the file's own module span.
pub struct RegexExtractor {
    lang: String,
    extensions: Vec<String>,
}

impl RegexExtractor {
    /// Build an extractor for `lang`, matching any of `extensions` (without leading dots).
    pub fn new(lang: impl Into<String>, extensions: impl IntoIterator<Item = &'static str>) -> Self {
        Self { lang: lang.into(), extensions: extensions.into_iter().map(String::from).collect() }
    }

    /// The standard extractor set covering the languages this crate ships classification
    /// heuristics for.
    pub fn standard_set() -> Vec<Self> {
        vec![
            Self::new("python", ["py"]),
            Self::new("rust", ["rs"]),
            Self::new("javascript", ["js", "jsx"]),
            Self::new("typescript", ["ts", "tsx"]),
            Self::new("go", ["go"]),
        ]
    }
}

const DECL_KEYWORDS: &[(&str, &str, &str)] = &[
    ("python", "def ", "function"),
    ("python", "class ", "class"),
    ("rust", "fn ", "function"),
    ("rust", "struct ", "struct"),
    ("rust", "impl ", "impl"),
    ("javascript", "function ", "function"),
    ("javascript", "class ", "class"),
    ("typescript", "function ", "function"),
    ("typescript", "class ", "class"),
    ("go", "func ", "function"),
];

impl SpanExtractor for RegexExtractor {
    fn language(&self) -> &str {
        &self.lang
    }

    fn handles_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension.trim_start_matches('.'))
    }

    fn extract(&self, _path: &Path, bytes: &[u8]) -> Vec<ExtractedSpan> {
        let text = String::from_utf8_lossy(bytes);
        let lines: Vec<&str> = text.lines().collect();
        let mut spans = Vec::new();

        let keywords: Vec<&(&str, &str, &str)> =
            DECL_KEYWORDS.iter().filter(|(lang, _, _)| *lang == self.lang).collect();

        let mut line_byte_offsets = Vec::with_capacity(lines.len() + 1);
        let mut offset = 0u64;
        for line in &lines {
            line_byte_offsets.push(offset);
            offset += line.len() as u64 + 1;
        }
        line_byte_offsets.push(offset);

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            for (_, marker, kind) in &keywords {
                if let Some(rest) = trimmed.strip_prefix(marker) {
                    let name = rest
                        .split(|c: char| c == '(' || c == '{' || c == '<' || c.is_whitespace() || c == ':')
                        .next()
                        .unwrap_or("")
                        .trim_matches('*')
                        .to_string();
                    if name.is_empty() {
                        continue;
                    }
                    let start_line = idx as u32 + 1;
                    let end_line = find_block_end(&lines, idx, self.lang.as_str()) as u32 + 1;
                    let byte_start = line_byte_offsets[idx];
                    let byte_end = line_byte_offsets[(end_line as usize).min(lines.len())];
                    let doc_hint = extract_doc_hint(&lines, idx, self.lang.as_str());
                    spans.push(ExtractedSpan {
                        symbol: name,
                        kind: kind.to_string(),
                        start_line,
                        end_line,
                        byte_start,
                        byte_end,
                        doc_hint,
                        imports: Vec::new(),
                    });
                }
            }
        }

        let imports = extract_imports(&lines, self.lang.as_str());
        if !lines.is_empty() {
            spans.insert(
                0,
                ExtractedSpan {
                    symbol: "<module>".to_string(),
                    kind: "module".to_string(),
                    start_line: 1,
                    end_line: lines.len() as u32,
                    byte_start: 0,
                    byte_end: bytes.len() as u64,
                    doc_hint: None,
                    imports,
                },
            );
        }

        spans
    }
}

fn find_block_end(lines: &[&str], start: usize, lang: &str) -> usize {
    if lang == "python" {
        let base_indent = indent_of(lines[start]);
        let mut end = start;
        for (i, line) in lines.iter().enumerate().skip(start + 1) {
            if line.trim().is_empty() {
                continue;
            }
            if indent_of(line) <= base_indent {
                break;
            }
            end = i;
        }
        end
    } else {
        let mut depth = 0i32;
        let mut started = false;
        let mut end = start;
        for (i, line) in lines.iter().enumerate().skip(start) {
            for ch in line.chars() {
                if ch == '{' {
                    depth += 1;
                    started = true;
                } else if ch == '}' {
                    depth -= 1;
                }
            }
            end = i;
            if started && depth <= 0 {
                break;
            }
        }
        end
    }
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

fn extract_doc_hint(lines: &[&str], decl_line: usize, lang: &str) -> Option<String> {
    let comment_prefix = match lang {
        "python" => None,
        "rust" => Some("///"),
        "javascript" | "typescript" => Some("//"),
        "go" => Some("//"),
        _ => None,
    };
    if lang == "python" {
        let next = lines.get(decl_line + 1)?.trim();
        if next.starts_with("\"\"\"") {
            return Some(next.trim_matches('"').trim().to_string());
        }
        return None;
    }
    let prefix = comment_prefix?;
    let mut collected = Vec::new();
    let mut i = decl_line;
    while i > 0 {
        let candidate = lines[i - 1].trim();
        if let Some(text) = candidate.strip_prefix(prefix) {
            collected.insert(0, text.trim().to_string());
            i -= 1;
        } else {
            break;
        }
    }
    if collected.is_empty() {
        None
    } else {
        Some(collected.join(" "))
    }
}

fn extract_imports(lines: &[&str], lang: &str) -> Vec<String> {
    let mut imports = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        match lang {
            "python" => {
                if let Some(rest) = trimmed.strip_prefix("import ") {
                    imports.push(rest.split(" as ").next().unwrap_or(rest).trim().to_string());
                } else if let Some(rest) = trimmed.strip_prefix("from ") {
                    if let Some(module) = rest.split(" import ").next() {
                        imports.push(module.trim().to_string());
                    }
                }
            }
            "rust" => {
                if let Some(rest) = trimmed.strip_prefix("use ") {
                    imports.push(rest.trim_end_matches(';').trim().to_string());
                }
            }
            "javascript" | "typescript" => {
                if trimmed.starts_with("import ") {
                    if let Some(from_idx) = trimmed.find("from ") {
                        let module = trimmed[from_idx + 5..].trim().trim_matches(|c| c == '\'' || c == '"' || c == ';');
                        imports.push(module.to_string());
                    }
                }
            }
            "go" => {
                if let Some(rest) = trimmed.strip_prefix("import ") {
                    imports.push(rest.trim_matches('"').to_string());
                }
            }
            _ => {}
        }
    }
    imports
}
