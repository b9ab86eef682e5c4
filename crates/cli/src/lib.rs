//! # CodeChat Daemon
//!
//! Wires the indexer, context assembly and LLM routing into one process
//! and exposes them over HTTP.
//!
//! ```text
//! config.toml + env + flags ──> DaemonConfig
//!                                   │
//!          ┌────────────────────────┼──────────────────────────┐
//!          v                        v                          v
//!   ChangeWatcher ──events──> IndexingPipeline ──> Indexer   LlmRouter
//!                                                   │          │
//!                                  ContextAssembler <┘          │
//!                                          └──> QueryService <──┘
//!                                                   │
//!                              axum: GET /health, POST /query (JSON | SSE)
//! ```

pub mod config;
pub mod daemon;
pub mod http_api;
pub mod logging;
pub mod service;

pub use config::DaemonConfig;
pub use daemon::{index_once, serve, Daemon};
pub use service::{PreparedQuery, QueryError, QueryService, QueryStream};
