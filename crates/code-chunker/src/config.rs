use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for chunk sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Target chunk size in tokens (soft limit)
    pub target_chunk_tokens: usize,

    /// Tokens of trailing context repeated at the start of the next chunk
    pub overlap_tokens: usize,

    /// Maximum chunk size in tokens (hard limit)
    pub max_chunk_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chunk_tokens: 384,
            overlap_tokens: 48,
            max_chunk_tokens: 512,
        }
    }
}

impl ChunkerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_tokens == 0 {
            return Err(ChunkerError::invalid_config("max_chunk_tokens must be > 0"));
        }

        if self.target_chunk_tokens == 0 {
            return Err(ChunkerError::invalid_config(
                "target_chunk_tokens must be > 0",
            ));
        }

        if self.target_chunk_tokens > self.max_chunk_tokens {
            return Err(ChunkerError::invalid_config(format!(
                "target_chunk_tokens ({}) cannot exceed max_chunk_tokens ({})",
                self.target_chunk_tokens, self.max_chunk_tokens
            )));
        }

        // Overlap above half a chunk would stall forward progress.
        if self.overlap_tokens * 2 > self.target_chunk_tokens {
            return Err(ChunkerError::invalid_config(format!(
                "overlap_tokens ({}) must be at most half of target_chunk_tokens ({})",
                self.overlap_tokens, self.target_chunk_tokens
            )));
        }

        Ok(())
    }
}
