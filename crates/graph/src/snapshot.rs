use crate::error::{GraphError, Result};
use crate::graph::DependencyGraph;
use crate::types::Capture;
use codechat_chunker::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GRAPH_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub language: Language,
    pub captures: Vec<Capture>,
}

/// Per-file captures; replaying them rebuilds an equivalent graph.
/// Advisory only: callers rebuild from source when it cannot be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub schema_version: u32,
    pub files: BTreeMap<String, FileSnapshot>,
}

impl GraphSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|e| GraphError::Snapshot(format!("unreadable snapshot: {e}")))?;
        if snapshot.schema_version != GRAPH_SCHEMA_VERSION {
            return Err(GraphError::Snapshot(format!(
                "unsupported schema_version {} (expected {GRAPH_SCHEMA_VERSION})",
                snapshot.schema_version
            )));
        }
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl DependencyGraph {
    pub fn snapshot(&self) -> GraphSnapshot {
        let state = self.read();
        let files = state
            .entries
            .iter()
            .map(|(path, entry)| {
                (
                    path.clone(),
                    FileSnapshot {
                        language: entry.language,
                        captures: entry.captures.clone(),
                    },
                )
            })
            .collect();
        GraphSnapshot {
            schema_version: GRAPH_SCHEMA_VERSION,
            files,
        }
    }

    pub fn restore(snapshot: &GraphSnapshot) -> Self {
        let graph = Self::new();
        for (path, file) in &snapshot.files {
            graph.replace_file(path, file.language, file.captures.clone());
        }
        graph
    }
}
