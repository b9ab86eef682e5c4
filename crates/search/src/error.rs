use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] codechat_vector_store::VectorStoreError),

    #[error("Empty query")]
    EmptyQuery,

    /// An explicitly requested file is not tracked or not indexable
    #[error("Unknown file: {0}")]
    UnknownFile(String),

    #[error("{0}")]
    Other(String),
}
