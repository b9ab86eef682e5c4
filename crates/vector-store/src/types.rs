use codechat_chunker::{ChunkId, Language};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;

/// Metadata stored next to each vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub path: String,
    pub byte_range: Range<usize>,
    pub start_line: usize,
    pub end_line: usize,
    pub language: Language,
}

impl EntryMetadata {
    pub fn new(
        path: impl Into<String>,
        byte_range: Range<usize>,
        start_line: usize,
        end_line: usize,
        language: Language,
    ) -> Self {
        Self {
            path: path.into(),
            byte_range,
            start_line,
            end_line,
            language,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub metadata: EntryMetadata,
}

/// Restricts a search to entries whose metadata matches.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub path_prefix: Option<String>,
    pub languages: Vec<Language>,
    pub exclude_paths: HashSet<String>,
}

impl SearchFilter {
    #[must_use]
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn language(mut self, language: Language) -> Self {
        self.languages.push(language);
        self
    }

    #[must_use]
    pub fn exclude_path(mut self, path: impl Into<String>) -> Self {
        self.exclude_paths.insert(path.into());
        self
    }

    #[must_use]
    pub fn matches(&self, metadata: &EntryMetadata) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !metadata.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.languages.is_empty() && !self.languages.contains(&metadata.language) {
            return false;
        }
        !self.exclude_paths.contains(&metadata.path)
    }
}
