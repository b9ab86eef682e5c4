use crate::error::{Result, VectorStoreError};
use crate::flat_index::FlatIndex;
use crate::paths::{write_atomic, CachePaths};
use crate::types::{EntryMetadata, SearchFilter, SearchHit};
use codechat_chunker::{sha256_hex, ChunkId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const VECTOR_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    id: ChunkId,
    vector: Vec<f32>,
    metadata: EntryMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedVectors {
    schema_version: u32,
    dimension: usize,
    entries: Vec<PersistedEntry>,
}

/// Sidecar describing `vectors.json`; a mismatch means the pair is unusable.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedMeta {
    schema_version: u32,
    dimension: usize,
    entry_count: usize,
    checksum: String,
}

/// Result of opening a store from its cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing persisted yet
    Missing,
    Loaded { entries: usize },
    /// Persisted state was unusable; the store starts empty and must be rebuilt
    Corrupt { reason: String },
}

impl LoadOutcome {
    #[must_use]
    pub const fn needs_rebuild(&self) -> bool {
        !matches!(self, LoadOutcome::Loaded { .. })
    }
}

struct StoreState {
    index: FlatIndex,
    metadata: HashMap<ChunkId, EntryMetadata>,
    writes: u64,
}

pub struct VectorStore {
    paths: CachePaths,
    dimension: usize,
    state: RwLock<StoreState>,
}

impl VectorStore {
    pub fn new(paths: CachePaths, dimension: usize) -> Self {
        Self {
            paths,
            dimension,
            state: RwLock::new(StoreState {
                index: FlatIndex::new(dimension),
                metadata: HashMap::new(),
                writes: 0,
            }),
        }
    }

    /// Load persisted state, falling back to an empty store when it is
    /// missing or corrupt. Never fails startup.
    pub async fn open(paths: CachePaths, dimension: usize) -> (Self, LoadOutcome) {
        match Self::load(paths.clone(), dimension).await {
            Ok(store) => {
                let entries = store.len();
                log::info!("Loaded {entries} vectors from {:?}", paths.dir());
                (store, LoadOutcome::Loaded { entries })
            }
            Err(VectorStoreError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No persisted vectors at {:?}", paths.dir());
                (Self::new(paths, dimension), LoadOutcome::Missing)
            }
            Err(err) => {
                log::warn!("Vector index at {:?} is unusable, rebuilding: {err}", paths.dir());
                let reason = err.to_string();
                (Self::new(paths, dimension), LoadOutcome::Corrupt { reason })
            }
        }
    }

    /// Load persisted state, verifying the sidecar checksum and dimension
    pub async fn load(paths: CachePaths, dimension: usize) -> Result<Self> {
        let meta_bytes = tokio::fs::read(paths.vectors_meta()).await?;
        let bytes = tokio::fs::read(paths.vectors()).await?;

        let meta: PersistedMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| VectorStoreError::corrupt(format!("unreadable sidecar: {e}")))?;
        if meta.schema_version != VECTOR_SCHEMA_VERSION {
            return Err(VectorStoreError::corrupt(format!(
                "unsupported schema_version {} (expected {VECTOR_SCHEMA_VERSION})",
                meta.schema_version
            )));
        }
        let checksum = sha256_hex(&bytes);
        if checksum != meta.checksum {
            return Err(VectorStoreError::corrupt("checksum mismatch"));
        }
        if meta.dimension != dimension {
            return Err(VectorStoreError::corrupt(format!(
                "dimension {} does not match configured {dimension}",
                meta.dimension
            )));
        }

        let persisted: PersistedVectors = serde_json::from_slice(&bytes)
            .map_err(|e| VectorStoreError::corrupt(format!("unreadable vectors: {e}")))?;
        if persisted.entries.len() != meta.entry_count || persisted.dimension != dimension {
            return Err(VectorStoreError::corrupt("sidecar does not describe vectors"));
        }

        let store = Self::new(paths, dimension);
        {
            let mut state = store.write();
            for entry in persisted.entries {
                if entry.vector.len() != dimension {
                    return Err(VectorStoreError::corrupt(format!(
                        "entry {} has dimension {}",
                        entry.id,
                        entry.vector.len()
                    )));
                }
                state.index.insert_normalized(&entry.id, &entry.vector)?;
                state.metadata.insert(entry.id, entry.metadata);
            }
        }
        Ok(store)
    }

    /// Write vectors and sidecar to the cache directory
    pub async fn persist(&self) -> Result<()> {
        let persisted = {
            let state = self.read();
            let mut entries: Vec<PersistedEntry> = state
                .metadata
                .iter()
                .filter_map(|(id, metadata)| {
                    state.index.vector(id).map(|vector| PersistedEntry {
                        id: id.clone(),
                        vector,
                        metadata: metadata.clone(),
                    })
                })
                .collect();
            entries.sort_by(|a, b| a.id.cmp(&b.id));
            PersistedVectors {
                schema_version: VECTOR_SCHEMA_VERSION,
                dimension: self.dimension,
                entries,
            }
        };

        let bytes = serde_json::to_vec(&persisted)?;
        let meta = PersistedMeta {
            schema_version: VECTOR_SCHEMA_VERSION,
            dimension: self.dimension,
            entry_count: persisted.entries.len(),
            checksum: sha256_hex(&bytes),
        };
        write_atomic(&self.paths.vectors(), &bytes).await?;
        write_atomic(&self.paths.vectors_meta(), &serde_json::to_vec_pretty(&meta)?).await?;
        log::debug!(
            "Persisted {} vectors to {:?}",
            meta.entry_count,
            self.paths.dir()
        );
        Ok(())
    }

    /// Insert or replace the entry for `id`. The previous vector for the same
    /// id is gone before the new one becomes visible.
    pub fn upsert(&self, id: ChunkId, vector: Vec<f32>, metadata: EntryMetadata) -> Result<()> {
        let mut state = self.write();
        state.index.insert(&id, &vector)?;
        state.metadata.insert(id, metadata);
        state.writes += 1;
        Ok(())
    }

    /// Replace the metadata of an existing entry, keeping its vector.
    /// Not counted as a write; returns false when `id` is absent.
    pub fn update_metadata(&self, id: &ChunkId, metadata: EntryMetadata) -> bool {
        let mut state = self.write();
        match state.metadata.get_mut(id) {
            Some(current) => {
                *current = metadata;
                true
            }
            None => false,
        }
    }

    /// Remove `id`; returns whether it existed
    pub fn delete(&self, id: &ChunkId) -> bool {
        let mut state = self.write();
        let removed = state.index.remove(id);
        state.metadata.remove(id);
        if removed {
            state.writes += 1;
        }
        removed
    }

    /// Remove every entry whose metadata path is `path`
    pub fn delete_path(&self, path: &str) -> usize {
        let mut state = self.write();
        let ids: Vec<ChunkId> = state
            .metadata
            .iter()
            .filter(|(_, meta)| meta.path == path)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            state.index.remove(id);
            state.metadata.remove(id);
        }
        if !ids.is_empty() {
            state.writes += 1;
        }
        ids.len()
    }

    /// Drop every entry whose path fails `keep`; returns the number removed
    pub fn retain_paths(&self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let mut state = self.write();
        let ids: Vec<ChunkId> = state
            .metadata
            .iter()
            .filter(|(_, meta)| !keep(&meta.path))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            state.index.remove(id);
            state.metadata.remove(id);
        }
        if !ids.is_empty() {
            state.writes += 1;
        }
        ids.len()
    }

    /// Ranked `(id, score, metadata)` by descending similarity
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let state = self.read();
        let ranked = state.index.search(query, k, |id| match filter {
            None => true,
            Some(filter) => state.metadata.get(id).is_some_and(|m| filter.matches(m)),
        })?;

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                state.metadata.get(&id).map(|metadata| SearchHit {
                    metadata: metadata.clone(),
                    id,
                    score,
                })
            })
            .collect())
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.read().index.contains(id)
    }

    pub fn metadata(&self, id: &ChunkId) -> Option<EntryMetadata> {
        self.read().metadata.get(id).cloned()
    }

    /// Similarity of a stored entry against `query`, if the entry exists
    pub fn score(&self, id: &ChunkId, query: &[f32]) -> Option<f32> {
        let state = self.read();
        let stored = state.index.vector(id)?;
        Some(crate::embeddings::cosine_similarity(&stored, query))
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// Number of mutations applied since construction
    pub fn write_count(&self) -> u64 {
        self.read().writes
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
