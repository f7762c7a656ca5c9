// src/hash.rs

//! SHA-256 helpers for index checksums and archive digests
//!
//! Repository indexes are identified by the SHA-256 of their raw bytes, and
//! chart archives carry a SHA-256 digest in the index. Both are compared as
//! lowercase hex strings.

use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 of a byte slice
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check downloaded bytes against an index digest
///
/// An empty expected digest always matches: many repositories omit it.
/// A `sha256:` prefix is accepted since some index generators emit one.
pub fn digest_matches(data: &[u8], expected: &str) -> bool {
    let expected = expected.trim();
    if expected.is_empty() {
        return true;
    }
    let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
    sha256(data).eq_ignore_ascii_case(expected)
}
