//! # CodeChat Vector Store
//!
//! Similarity search over chunk embeddings, with metadata and persistence.
//!
//! ## Architecture
//!
//! ```text
//! Chunk text
//!     │
//!     ├──> Embedder (stub | OpenAI-compatible HTTP)
//!     │      └─> Vec<f32>[dimension]
//!     │
//!     ├──> FlatIndex (row-per-entry matrix, exact cosine scan)
//!     │      └─> ranked (id, score), ties broken by id
//!     │
//!     └──> Persistence (workspace-keyed cache dir)
//!            ├─> vectors.json
//!            └─> vectors.meta.json (dimension, count, sha256)
//! ```
//!
//! Mutations take the write side of a reader-writer lock, so upserts and
//! deletes are serialized while searches proceed concurrently. A search issued
//! after an `upsert` returns sees that entry; after a `delete` it never does.
//!
//! ## Example
//!
//! ```no_run
//! use codechat_vector_store::{CachePaths, EntryMetadata, StubEmbedder, Embedder, VectorStore};
//! use codechat_chunker::Language;
//!
//! # async fn demo() -> codechat_vector_store::Result<()> {
//! let embedder = StubEmbedder::new(64);
//! let store = VectorStore::new(CachePaths::new("/tmp/codechat/ws"), embedder.dimension());
//!
//! let vector = embedder.embed("fn parse_config() {}").await?;
//! store.upsert("a1".into(), vector, EntryMetadata::new("src/config.rs", 0..20, 1, 1, Language::Rust))?;
//!
//! let query = embedder.embed("configuration parsing").await?;
//! for hit in store.search(&query, 5, None)? {
//!     println!("{} {:.3}", hit.metadata.path, hit.score);
//! }
//! store.persist().await?;
//! # Ok(())
//! # }
//! ```

mod embeddings;
mod error;
mod flat_index;
mod paths;
mod store;
mod types;

pub use embeddings::{
    build_embedder, cosine_similarity, Embedder, EmbeddingConfig, EmbeddingMode, HttpEmbedder,
    StubEmbedder,
};
pub use error::{Result, VectorStoreError};
pub use flat_index::FlatIndex;
pub use paths::{workspace_id, write_atomic, CachePaths};
pub use store::{LoadOutcome, VectorStore, VECTOR_SCHEMA_VERSION};
pub use types::{EntryMetadata, SearchFilter, SearchHit};

pub use codechat_chunker::ChunkId;
