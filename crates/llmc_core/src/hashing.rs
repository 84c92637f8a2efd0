//! Content-addressing helpers.
//!
//! File and span identity both hinge on SHA-256, not BLAKE3: the spec this
//! crate implements pins SHA-256 specifically so hashes are comparable with
//! the on-disk format produced by other tooling in the same ecosystem.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of a file's full contents.
pub fn file_hash(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

/// Hash of a span: SHA-256 over `lang ‖ 0x00 ‖ span_bytes`.
///
/// Stable across edits that don't touch the span's own bytes; this is the
/// key that lets enrichments survive a reindex of the rest of the file.
pub fn span_hash(lang: &str, span_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(lang.as_bytes());
    hasher.update([0u8]);
    hasher.update(span_bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_hash_is_deterministic() {
        let a = span_hash("python", b"def bar(): return 42");
        let b = span_hash("python", b"def bar(): return 42");
        assert_eq!(a, b);
    }

    #[test]
    fn span_hash_distinguishes_language() {
        let a = span_hash("python", b"x = 1");
        let b = span_hash("rust", b"x = 1");
        assert_ne!(a, b);
    }

    #[test]
    fn span_hash_changes_with_bytes() {
        let a = span_hash("python", b"def bar(): return 42");
        let b = span_hash("python", b"def bar(): return 43");
        assert_ne!(a, b);
    }

    #[test]
    fn file_hash_matches_known_digest() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        assert_eq!(
            file_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
