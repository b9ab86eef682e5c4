use serde::{Deserialize, Serialize};

/// Running counters for the indexing pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Files whose chunks and graph were (re)built
    pub files_indexed: usize,

    /// Change events that found the stored content hash unchanged
    pub files_unchanged: usize,

    pub files_deleted: usize,
    pub files_degraded: usize,
    pub files_unindexable: usize,

    /// Chunks sent to the embedding capability
    pub chunks_embedded: usize,

    /// Chunks whose content hash matched and were kept as-is
    pub chunks_reused: usize,

    pub parse_failures: usize,

    /// Most recent error messages, oldest first
    pub errors: Vec<String>,
}

const MAX_RECENT_ERRORS: usize = 32;

impl IndexStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_indexed(&mut self, embedded: usize, reused: usize) {
        self.files_indexed += 1;
        self.chunks_embedded += embedded;
        self.chunks_reused += reused;
    }

    pub fn add_error(&mut self, error: String) {
        if self.errors.len() == MAX_RECENT_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_is_bounded() {
        let mut stats = IndexStats::new();
        for i in 0..MAX_RECENT_ERRORS + 5 {
            stats.add_error(format!("e{i}"));
        }
        assert_eq!(stats.errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(stats.errors[0], "e5");
    }
}
