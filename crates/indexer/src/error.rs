use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] codechat_chunker::ChunkerError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] codechat_vector_store::VectorStoreError),

    #[error("Graph error: {0}")]
    GraphError(#[from] codechat_graph::GraphError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Embedding call failed; the file is requeued and eventually degraded
    #[error("Embedding failed for {path}: {message}")]
    EmbeddingFailure { path: String, message: String },

    #[error("Parse failed for {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub fn embedding_failure(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EmbeddingFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::EmbeddingFailure { .. })
    }
}
