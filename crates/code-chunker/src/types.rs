use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Approximate token count: ~4 chars per token for code, never zero.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Stable chunk identity, `hash(path, chunk_index)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A bounded, possibly overlapping slice of a file's text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,

    /// Workspace-relative path of the owning file
    pub path: String,

    /// Position of this chunk within the file
    pub index: usize,

    /// Byte range into the file text
    pub byte_range: Range<usize>,

    /// Start line (1-indexed)
    pub start_line: usize,

    /// End line (1-indexed, inclusive)
    pub end_line: usize,

    /// SHA-256 of `text`
    pub content_hash: String,

    pub language: Language,

    pub text: String,
}

impl Chunk {
    /// Get estimated token count
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }

    /// Get the number of lines in this chunk
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Check if chunk contains a specific line
    #[must_use]
    pub const fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_never_zero() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        // 8 chars, 16 bytes
        assert_eq!(estimate_tokens("éééééééé"), 2);
    }

    #[test]
    fn chunk_id_serializes_as_plain_string() {
        let id = ChunkId::from("deadbeef");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"deadbeef\"");
    }
}
