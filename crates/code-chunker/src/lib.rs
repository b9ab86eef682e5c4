//! # CodeChat Chunker
//!
//! Splits source files into token-bounded, overlapping chunks: the unit of
//! embedding and retrieval.
//!
//! ## Identity
//!
//! Every chunk carries two hashes:
//! - a stable **id** derived from `(path, chunk index)`, so the same slot of
//!   the same file always maps to the same vector-store entry;
//! - a **content hash** of the chunk text, used to skip re-embedding chunks
//!   whose text did not change.
//!
//! ```text
//! file text
//!     │
//!     ├──> line segments (oversized lines split at char boundaries)
//!     │
//!     ├──> greedy accumulation up to `target_chunk_tokens`
//!     │    (never above `max_chunk_tokens`)
//!     │
//!     └──> next chunk restarts `overlap_tokens` worth of lines earlier
//! ```
//!
//! ## Example
//!
//! ```rust
//! use codechat_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let chunks = chunker.chunk("src/lib.rs", "fn main() {}\n");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].start_line, 1);
//! ```

mod chunker;
mod config;
mod error;
mod hash;
mod language;
mod types;

pub use chunker::Chunker;
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use hash::{chunk_id, content_hash, sha256_hex};
pub use language::Language;
pub use types::{estimate_tokens, Chunk, ChunkId};
