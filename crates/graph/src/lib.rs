//! # CodeChat Graph
//!
//! Incremental two-level dependency graph over a workspace.
//!
//! ## Architecture
//!
//! ```text
//! source text
//!     │
//!     ├──> StructuralParser (tree-sitter)
//!     │      └─ captures: definitions, calls, imports
//!     │
//!     ├──> DependencyGraph (petgraph)
//!     │      ├─ file nodes + import edges
//!     │      ├─ function nodes + call edges
//!     │      └─ pending references, resolved on read
//!     │
//!     └──> traverse()
//!            └─ bounded BFS from a file or function
//! ```
//!
//! Each file owns what its parse produced. Replacing a file drops its owned
//! nodes and edges and inserts the new ones in one step, so readers never
//! observe a half-applied update. References to symbols that do not exist
//! yet are kept by name and bound lazily, which makes results independent
//! of the order in which files were indexed.

mod error;
mod graph;
mod parser;
mod resolve;
mod snapshot;
mod traverse;
mod types;

pub use error::{GraphError, Result};
pub use graph::DependencyGraph;
pub use parser::{StructuralParser, TreeSitterParser};
pub use snapshot::{FileSnapshot, GraphSnapshot, GRAPH_SCHEMA_VERSION};
pub use types::{
    CallEdge, Capture, CaptureKind, FileNode, FunctionNode, GraphStats, ImportEdge, OwnedEdge,
    ReplaceStats, SourceRange, Traversal, TraversalStart, TraversalStep,
};
