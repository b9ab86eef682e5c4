use crate::error::Result;
use codechat_chunker::{Chunk, ChunkId, Language};
use codechat_vector_store::{write_atomic, LoadOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const RECORDS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Indexed,
    /// Embedding kept failing; previous entries are served stale
    Degraded,
    /// Parsing kept failing; excluded from retrieval until the content changes
    Unindexable,
}

/// Everything the indexer knows about one tracked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: Language,

    /// SHA-256 of the content the stored chunks were built from
    pub content_hash: String,

    /// Incremented on every applied re-index
    pub revision: u64,

    pub state: FileState,

    /// Consecutive parse failures for `content_hash`
    #[serde(default)]
    pub parse_failures: u32,

    /// Content hash that led to `Degraded`/`Unindexable`; skipped until it changes
    #[serde(default)]
    pub failed_hash: Option<String>,

    pub chunks: Vec<Chunk>,
}

impl FileRecord {
    #[must_use]
    pub fn is_retrievable(&self) -> bool {
        self.state != FileState::Unindexable
    }

    pub fn chunk(&self, id: &ChunkId) -> Option<&Chunk> {
        self.chunks.iter().find(|chunk| &chunk.id == id)
    }
}

/// All FileRecords of a workspace, keyed by relative path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSet {
    schema_version: u32,
    records: BTreeMap<String, FileRecord>,
}

impl Default for RecordSet {
    fn default() -> Self {
        Self {
            schema_version: RECORDS_SCHEMA_VERSION,
            records: BTreeMap::new(),
        }
    }
}

impl RecordSet {
    /// Load persisted records; a missing or unreadable file yields an empty set
    pub async fn open(path: &Path) -> (Self, LoadOutcome) {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return (Self::default(), LoadOutcome::Missing);
            }
            Err(err) => {
                log::warn!("Failed to read {}: {err}", path.display());
                return (
                    Self::default(),
                    LoadOutcome::Corrupt {
                        reason: err.to_string(),
                    },
                );
            }
        };

        match serde_json::from_slice::<Self>(&bytes) {
            Ok(set) if set.schema_version == RECORDS_SCHEMA_VERSION => {
                let entries = set.len();
                (set, LoadOutcome::Loaded { entries })
            }
            Ok(set) => {
                let reason = format!(
                    "records schema {} != {RECORDS_SCHEMA_VERSION}",
                    set.schema_version
                );
                log::warn!("Discarding {}: {reason}", path.display());
                (Self::default(), LoadOutcome::Corrupt { reason })
            }
            Err(err) => {
                log::warn!("Discarding corrupt {}: {err}", path.display());
                (
                    Self::default(),
                    LoadOutcome::Corrupt {
                        reason: err.to_string(),
                    },
                )
            }
        }
    }

    pub async fn persist(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes()?).await?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.records.insert(record.path.clone(), record);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.records.remove(path)
    }

    /// Paths of `dir` itself or anything below it
    pub fn paths_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.records
            .keys()
            .filter(|path| path.as_str() == dir || path.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, state: FileState) -> usize {
        self.records.values().filter(|r| r.state == state).count()
    }

    /// Chunks of retrievable files
    pub fn chunk_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.is_retrievable())
            .map(|r| r.chunks.len())
            .sum()
    }
}
