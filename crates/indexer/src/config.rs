use codechat_chunker::ChunkerConfig;
use std::time::Duration;

/// Per-file indexing policy
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,

    /// Embedding attempts after the first before a file is marked degraded
    pub max_embed_retries: u32,

    /// Requeue delay is `retry_backoff * 2^attempt`
    pub retry_backoff: Duration,

    /// Consecutive parse failures of the same content before a file is unindexable
    pub max_parse_failures: u32,

    /// Chunks per embedding request
    pub embed_batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            max_embed_retries: 3,
            retry_backoff: Duration::from_millis(500),
            max_parse_failures: 3,
            embed_batch_size: 64,
        }
    }
}

impl IndexerConfig {
    /// Delay before retry number `attempt` (0-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Worker pool and persistence cadence
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Files indexed in parallel
    pub workers: usize,

    /// Quiet period after the last job before state is written to disk
    pub persist_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            persist_interval: Duration::from_secs(2),
        }
    }
}
