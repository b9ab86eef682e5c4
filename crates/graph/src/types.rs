use codechat_chunker::Language;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    Definition,
    Call,
    Import,
}

/// Source span of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start_byte: usize,
    pub end_byte: usize,
    /// 1-indexed
    pub start_line: usize,
    /// 1-indexed, inclusive
    pub end_line: usize,
}

impl SourceRange {
    pub const fn new(start_byte: usize, end_byte: usize, start_line: usize, end_line: usize) -> Self {
        Self {
            start_byte,
            end_byte,
            start_line,
            end_line,
        }
    }

    pub const fn contains(&self, other: &SourceRange) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }
}

/// Normalized parser output. `name` is the defined identifier, the callee's
/// last path segment, or the raw import target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capture {
    pub kind: CaptureKind,
    pub name: String,
    pub range: SourceRange,
}

impl Capture {
    pub fn definition(name: impl Into<String>, range: SourceRange) -> Self {
        Self {
            kind: CaptureKind::Definition,
            name: name.into(),
            range,
        }
    }

    pub fn call(name: impl Into<String>, range: SourceRange) -> Self {
        Self {
            kind: CaptureKind::Call,
            name: name.into(),
            range,
        }
    }

    pub fn import(name: impl Into<String>, range: SourceRange) -> Self {
        Self {
            kind: CaptureKind::Import,
            name: name.into(),
            range,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub path: String,
    pub language: Language,
}

/// Keyed by `(path, qualified_name)`; not unique across overloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionNode {
    pub path: String,
    pub name: String,
    pub qualified_name: String,
    pub line: usize,
}

/// Edges carry the file whose parse produced them and their parse position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEdge {
    pub owner: String,
    pub target: String,
    pub line: usize,
    pub seq: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEdge {
    pub owner: String,
    pub line: usize,
    pub seq: usize,
}

/// Where a live traversal begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalStart {
    File(String),
    Function { name: String, path: Option<String> },
}

impl TraversalStart {
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function {
            name: name.into(),
            path: None,
        }
    }

    pub fn function_in(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Function {
            name: name.into(),
            path: Some(path.into()),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::File(path.into())
    }
}

/// One discovered hop. `file` is the callee's file, `line` the call or import site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalStep {
    pub caller: String,
    pub callee: String,
    pub file: String,
    pub line: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traversal {
    pub steps: Vec<TraversalStep>,
    pub visited: usize,
    pub truncated: bool,
}

impl Traversal {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Outcome of a per-file replace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceStats {
    pub functions: usize,
    pub call_edges: usize,
    pub import_edges: usize,
    pub pending: usize,
    /// Captures identical to the stored ones; nothing was touched
    pub unchanged: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub files: usize,
    pub functions: usize,
    pub import_edges: usize,
    pub call_edges: usize,
    pub pending_refs: usize,
}

/// Edge owned by a file as seen by name, whether resolved or still pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnedEdge {
    Call { caller: String, callee: String, line: usize },
    Import { target: String, line: usize },
}
