use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Content hash of a file or chunk text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Stable chunk identity: `hash(path, chunk_index)`, truncated to 16 hex chars.
#[must_use]
pub fn chunk_id(path: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update((index as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in &digest[..8] {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable_and_position_sensitive() {
        assert_eq!(chunk_id("a.rs", 0), chunk_id("a.rs", 0));
        assert_ne!(chunk_id("a.rs", 0), chunk_id("a.rs", 1));
        assert_ne!(chunk_id("a.rs", 0), chunk_id("b.rs", 0));
        assert_eq!(chunk_id("a.rs", 3).len(), 16);
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
