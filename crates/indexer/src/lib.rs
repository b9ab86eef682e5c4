//! # CodeChat Indexer
//!
//! Keeps the vector store and dependency graph in step with a workspace.
//!
//! ## Pipeline
//!
//! ```text
//! notify events
//!     │
//!     ├──> ChangeWatcher (ignore rules + per-path debounce)
//!     │      └─> bounded channel of Changed/Deleted
//!     │
//!     ├──> IndexingPipeline (M workers, one job per path at a time)
//!     │      └─> retries with exponential backoff
//!     │
//!     └──> Indexer
//!            ├─ chunk + hash, embed only changed chunks
//!            ├─ Vector Store upsert/delete
//!            └─ Structural parse → Dependency Graph per-file replace
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use codechat_indexer::{initial_scan, Indexer, IndexerConfig, IndexingPipeline, PipelineConfig};
//! use codechat_vector_store::{CachePaths, StubEmbedder};
//! use std::sync::Arc;
//!
//! # async fn run() -> codechat_indexer::Result<()> {
//! let root = std::path::Path::new("/path/to/project");
//! let cache = CachePaths::for_workspace(std::path::Path::new("/tmp/codechat"), root);
//! let embedder = Arc::new(StubEmbedder::new(384));
//! let (indexer, _report) = Indexer::open(root, cache, embedder, IndexerConfig::default()).await?;
//! let indexer = Arc::new(indexer);
//!
//! let (tx, rx) = tokio::sync::mpsc::channel(1024);
//! let pipeline = IndexingPipeline::start(indexer.clone(), PipelineConfig::default(), rx);
//! initial_scan(&indexer, &tx).await?;
//! drop(tx);
//! pipeline.join().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod indexer;
mod pipeline;
mod records;
mod scanner;
mod stats;
mod watcher;

pub use config::{IndexerConfig, PipelineConfig};
pub use error::{IndexerError, Result};
pub use indexer::{IndexOutcome, IndexSummary, Indexer, StartupReport};
pub use pipeline::{initial_scan, IndexingPipeline, PipelineStatus};
pub use records::{FileRecord, FileState, RecordSet, RECORDS_SCHEMA_VERSION};
pub use scanner::{is_ignored_scope, is_source_file, relative_path, FileScanner, IGNORED_SCOPES};
pub use stats::IndexStats;
pub use watcher::{ChangeEvent, ChangeWatcher, Debouncer, IgnoreRules, WatcherConfig};
