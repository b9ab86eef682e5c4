//! # CodeChat Search
//!
//! Assembles grounded context for a query.
//!
//! ```text
//! message ──> embed ──> Vector Store top-K ─┐
//!                                           ├─> merge by chunk id ─> rank ─> token budget
//! files ───> own chunks + graph neighbors ──┘
//! ```
//!
//! Score is `similarity_weight * similarity`, plus `graph_bonus` for chunks
//! of files one hop away from an explicitly listed file. Explicit files'
//! chunks are seeded with similarity 1.0. Inclusion is greedy in rank order
//! and the bundle never exceeds the configured budget.

mod assembler;
mod error;

pub use assembler::{AssemblerConfig, ContextAssembler, ContextBundle, ContextSnippet, SnippetOrigin};
pub use error::{Result, SearchError};
