//! File discovery: walks a repo honoring `.gitignore`, an optional `.ragignore`, and the
//! crate's own default excludes, skipping anything larger than the configured size cap.

use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;

use crate::config::IgnoreConfig;
use crate::error::Result;

/// A discovered file, relative to the repo root, with its size already checked.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the repo root.
    pub relative_path: PathBuf,
    /// Absolute path on disk.
    pub absolute_path: PathBuf,
    /// File size in bytes.
    pub size: u64,
}

/// Parse `LLMC_RAG_EXCLUDE`, a comma-separated list of extra glob patterns layered on top of
/// `.gitignore`, `.ragignore`, and the configured defaults.
fn env_exclude_patterns() -> Vec<String> {
    std::env::var("LLMC_RAG_EXCLUDE")
        .ok()
        .map(|raw| raw.split(',').map(str::trim).filter(|p| !p.is_empty()).map(String::from).collect())
        .unwrap_or_default()
}

/// Walk `repo_root` applying `.gitignore`, `.ragignore`, and configured extra excludes.
pub fn discover_files(repo_root: &Path, config: &IgnoreConfig) -> Result<Vec<DiscoveredFile>> {
    let mut builder = WalkBuilder::new(repo_root);
    builder
        .hidden(false)
        .git_ignore(config.use_gitignore)
        .git_global(config.use_gitignore)
        .git_exclude(config.use_gitignore)
        .parents(true);

    if config.use_ragignore {
        let ragignore = repo_root.join(".ragignore");
        if ragignore.exists() {
            builder.add_custom_ignore_filename(".ragignore");
        }
    }

    let mut patterns = config.extra_patterns.clone();
    patterns.extend(env_exclude_patterns());

    if !patterns.is_empty() {
        let mut overrides = OverrideBuilder::new(repo_root);
        for pattern in &patterns {
            // `!` negates a glob in the `ignore` crate's override syntax; exclude patterns
            // must be negated to mean "don't walk this", matching .gitignore semantics.
            let _ = overrides.add(&format!("!{pattern}"));
            let _ = overrides.add(&format!("!{pattern}/**"));
        }
        if let Ok(built) = overrides.build() {
            builder.overrides(built);
        }
    }

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let absolute_path = entry.path().to_path_buf();
        let metadata = match std::fs::metadata(&absolute_path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.len() > config.max_file_size {
            continue;
        }
        let relative_path = absolute_path
            .strip_prefix(repo_root)
            .unwrap_or(&absolute_path)
            .to_path_buf();
        files.push(DiscoveredFile { relative_path, absolute_path, size: metadata.len() });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn discover_files_honors_ragignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("skip.rs"), "fn main() {}").unwrap();
        let mut f = std::fs::File::create(dir.path().join(".ragignore")).unwrap();
        writeln!(f, "skip.rs").unwrap();

        let config = IgnoreConfig { use_gitignore: false, ..IgnoreConfig::default() };
        let files = discover_files(dir.path(), &config).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative_path.to_string_lossy().into_owned()).collect();
        assert!(names.contains(&"keep.rs".to_string()));
        assert!(!names.contains(&"skip.rs".to_string()));
    }

    #[test]
    fn discover_files_honors_env_exclude_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("vendor.rs"), "fn main() {}").unwrap();

        // SAFETY: this test crate runs its own test binary with no other test touching this
        // variable, and the var is cleared before returning.
        unsafe { std::env::set_var("LLMC_RAG_EXCLUDE", "vendor.rs, nonexistent.xyz") };
        let config = IgnoreConfig { use_gitignore: false, use_ragignore: false, extra_patterns: vec![], ..IgnoreConfig::default() };
        let files = discover_files(dir.path(), &config);
        unsafe { std::env::remove_var("LLMC_RAG_EXCLUDE") };
        let files = files.unwrap();

        let names: Vec<_> = files.iter().map(|f| f.relative_path.to_string_lossy().into_owned()).collect();
        assert!(names.contains(&"keep.rs".to_string()));
        assert!(!names.contains(&"vendor.rs".to_string()));
    }

    #[test]
    fn discover_files_skips_oversized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![0u8; 100]).unwrap();
        let config = IgnoreConfig { max_file_size: 10, use_gitignore: false, use_ragignore: false, ..IgnoreConfig::default() };
        let files = discover_files(dir.path(), &config).unwrap();
        assert!(files.is_empty());
    }
}
