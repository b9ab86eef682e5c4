use crate::config::IndexerConfig;
use crate::records::{FileRecord, FileState, RecordSet};
use crate::stats::IndexStats;
use crate::{IndexerError, Result};
use codechat_chunker::{content_hash, Chunk, ChunkId, Chunker, Language};
use codechat_graph::{DependencyGraph, GraphSnapshot, StructuralParser, TreeSitterParser};
use codechat_vector_store::{
    write_atomic, CachePaths, Embedder, EntryMetadata, LoadOutcome, VectorStore,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Result of one `index_file` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { embedded: usize, reused: usize },
    /// Stored state already matches the file; nothing was written
    Unchanged,
    /// The file no longer exists; its entries were dropped
    Removed,
    /// Chunks were updated but parsing failed; previous graph state kept
    ParseFailed { failures: u32 },
    Unindexable,
    /// Not text; ignored
    Skipped,
}

/// What startup found in the cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub vectors: LoadOutcome,
    pub records: LoadOutcome,
    pub graph_restored: bool,
}

impl StartupReport {
    /// Tracked files exist but their vectors do not
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        matches!(self.records, LoadOutcome::Loaded { entries } if entries > 0)
            && self.vectors.needs_rebuild()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub tracked_files: usize,
    pub indexed_files: usize,
    pub degraded_files: usize,
    pub unindexable_files: usize,
    pub chunks: usize,
}

/// Keeps FileRecords, vectors and the dependency graph in step with the
/// files of one workspace.
///
/// Callers must not index the same path concurrently; `IndexingPipeline`
/// guarantees that. Different paths may be indexed in parallel.
pub struct Indexer {
    root: PathBuf,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    parser: Arc<dyn StructuralParser>,
    store: Arc<VectorStore>,
    graph: Arc<DependencyGraph>,
    records: RwLock<RecordSet>,
    stats: Mutex<IndexStats>,
    config: IndexerConfig,
}

impl Indexer {
    pub fn new(
        root: impl AsRef<Path>,
        store: Arc<VectorStore>,
        graph: Arc<DependencyGraph>,
        embedder: Arc<dyn Embedder>,
        config: IndexerConfig,
    ) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(IndexerError::InvalidPath(root.display().to_string()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            chunker: Chunker::new(config.chunker.clone())?,
            embedder,
            parser: Arc::new(TreeSitterParser::new()),
            store,
            graph,
            records: RwLock::new(RecordSet::default()),
            stats: Mutex::new(IndexStats::new()),
            config,
        })
    }

    /// Build an indexer from whatever is persisted under `cache`.
    /// Corrupt or mismatched state is discarded, never fatal.
    pub async fn open(
        root: impl AsRef<Path>,
        cache: CachePaths,
        embedder: Arc<dyn Embedder>,
        config: IndexerConfig,
    ) -> Result<(Self, StartupReport)> {
        let (store, vectors) = VectorStore::open(cache.clone(), embedder.dimension()).await;
        let (records, records_outcome) = RecordSet::open(&cache.records()).await;
        let (graph, graph_restored) = load_graph(&cache.graph()).await;

        let report = StartupReport {
            vectors,
            records: records_outcome,
            graph_restored,
        };
        if report.needs_rebuild() {
            log::warn!(
                "Vector index unusable; rebuilding from {} tracked files",
                records.len()
            );
        }

        let indexer = Self::new(root, Arc::new(store), Arc::new(graph), embedder, config)?
            .with_records(records);
        Ok((indexer, report))
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn StructuralParser>) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_records(self, records: RecordSet) -> Self {
        *self.records_mut() = records;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Bring one file's chunks, vectors and subgraph up to date.
    ///
    /// Returns `IndexerError::EmbeddingFailure` before touching any state when
    /// the embedding call fails, so the caller can requeue.
    pub async fn index_file(&self, path: &str) -> Result<IndexOutcome> {
        let text = match tokio::fs::read(self.root.join(path)).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    log::debug!("Skipping non UTF-8 file {path}");
                    return Ok(IndexOutcome::Skipped);
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.remove_path(path);
                return Ok(IndexOutcome::Removed);
            }
            Err(err) => return Err(err.into()),
        };

        let hash = content_hash(&text);
        let previous = self.record(path);
        if let Some(prev) = &previous {
            if self.is_current(prev, &hash) {
                self.stats().files_unchanged += 1;
                return Ok(IndexOutcome::Unchanged);
            }
            let failed_same = prev.failed_hash.as_deref() == Some(hash.as_str());
            if failed_same && prev.state != FileState::Indexed {
                log::debug!("Skipping {path}: content already failed to index");
                self.stats().files_unchanged += 1;
                return Ok(IndexOutcome::Unchanged);
            }
        }

        let language = Language::from_path(path);
        let chunks = self.chunker.chunk(path, &text);
        let previous_hashes: HashMap<&ChunkId, &str> = previous
            .iter()
            .flat_map(|prev| prev.chunks.iter())
            .map(|chunk| (&chunk.id, chunk.content_hash.as_str()))
            .collect();
        let (reused, changed): (Vec<&Chunk>, Vec<&Chunk>) = chunks.iter().partition(|chunk| {
            previous_hashes.get(&chunk.id) == Some(&chunk.content_hash.as_str())
                && self.store.contains(&chunk.id)
        });

        let vectors = self.embed(path, &changed).await?;

        let live: HashSet<&ChunkId> = chunks.iter().map(|chunk| &chunk.id).collect();
        for stale in previous_hashes.keys().filter(|id| !live.contains(*id)) {
            self.store.delete(stale);
        }
        for (chunk, vector) in changed.iter().zip(vectors) {
            self.store
                .upsert(chunk.id.clone(), vector, entry_metadata(path, chunk))?;
        }
        // Edits earlier in the file shift reused chunks without changing their text
        for chunk in &reused {
            let metadata = entry_metadata(path, chunk);
            if self.store.metadata(&chunk.id).as_ref() != Some(&metadata) {
                self.store.update_metadata(&chunk.id, metadata);
            }
        }

        let parse_failures = match self.refresh_graph(path, language, &text) {
            Ok(()) => 0,
            Err(_) => match &previous {
                Some(prev) if prev.content_hash == hash => prev.parse_failures + 1,
                _ => 1,
            },
        };
        let (embedded, reused) = (changed.len(), reused.len());

        if parse_failures >= self.config.max_parse_failures {
            self.mark_unindexable(path, language, hash, parse_failures);
            return Ok(IndexOutcome::Unindexable);
        }

        let revision = previous.as_ref().map_or(0, |prev| prev.revision) + 1;
        self.records_mut().insert(FileRecord {
            path: path.to_string(),
            language,
            content_hash: hash,
            revision,
            state: FileState::Indexed,
            parse_failures,
            failed_hash: None,
            chunks,
        });

        let mut stats = self.stats();
        stats.add_indexed(embedded, reused);
        if parse_failures > 0 {
            stats.parse_failures += 1;
            return Ok(IndexOutcome::ParseFailed {
                failures: parse_failures,
            });
        }
        log::debug!("Indexed {path}: {embedded} embedded, {reused} reused");
        Ok(IndexOutcome::Indexed { embedded, reused })
    }

    /// Drop a deleted file, or every tracked file below a deleted directory.
    /// Returns the number of files removed.
    pub fn remove_path(&self, path: &str) -> usize {
        let paths = self.records().paths_under(path);
        for file in &paths {
            self.store.delete_path(file);
            self.graph.remove_file(file);
            self.records_mut().remove(file);
        }
        if !paths.is_empty() {
            self.stats().files_deleted += paths.len();
            log::info!("Removed {} file(s) at {path}", paths.len());
        }
        paths.len()
    }

    /// Embedding retries for `path` are exhausted: keep the previous entries,
    /// remember the failing content and still refresh the graph.
    pub async fn mark_degraded(&self, path: &str) -> Result<()> {
        let text = match tokio::fs::read_to_string(self.root.join(path)).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.remove_path(path);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let hash = content_hash(&text);
        let language = Language::from_path(path);
        let graph_ok = self.refresh_graph(path, language, &text).is_ok();

        let record = match self.record(path) {
            Some(prev) => FileRecord {
                state: FileState::Degraded,
                failed_hash: Some(hash),
                revision: prev.revision + 1,
                parse_failures: if graph_ok { 0 } else { prev.parse_failures },
                ..prev
            },
            None => FileRecord {
                path: path.to_string(),
                language,
                content_hash: String::new(),
                revision: 1,
                state: FileState::Degraded,
                parse_failures: 0,
                failed_hash: Some(hash),
                chunks: Vec::new(),
            },
        };
        self.records_mut().insert(record);

        let mut stats = self.stats();
        stats.files_degraded += 1;
        stats.add_error(format!("{path}: embedding retries exhausted"));
        log::warn!("{path} is degraded: embedding kept failing, serving previous entries");
        Ok(())
    }

    /// Forget tracked files that are not in `present` (deleted while the
    /// daemon was down) along with vectors and graph nodes of unknown files.
    pub fn reconcile(&self, present: &[String]) -> Vec<String> {
        let present: HashSet<&str> = present.iter().map(String::as_str).collect();
        let missing: Vec<String> = self
            .records()
            .paths()
            .filter(|path| !present.contains(path.as_str()))
            .cloned()
            .collect();
        for path in &missing {
            self.remove_path(path);
        }

        let tracked: HashSet<String> = self.records().paths().cloned().collect();
        let orphans = self.store.retain_paths(|path| tracked.contains(path));
        if orphans > 0 {
            log::info!("Dropped {orphans} vectors of untracked files");
        }
        for file in self.graph.files() {
            if !tracked.contains(&file) && !present.contains(file.as_str()) {
                self.graph.remove_file(&file);
            }
        }
        missing
    }

    /// Write vectors, records and the graph snapshot to the cache directory
    pub async fn persist(&self) -> Result<()> {
        let paths = self.store.paths().clone();
        self.store.persist().await?;
        let records = self.records().to_bytes()?;
        write_atomic(&paths.records(), &records).await?;
        let graph = self.graph.snapshot().to_bytes()?;
        write_atomic(&paths.graph(), &graph).await?;
        log::info!("Persisted index state to {}", paths.dir().display());
        Ok(())
    }

    pub fn record(&self, path: &str) -> Option<FileRecord> {
        self.records().get(path).cloned()
    }

    /// Tracked and not excluded from retrieval
    pub fn is_retrievable(&self, path: &str) -> bool {
        self.records().get(path).is_some_and(FileRecord::is_retrievable)
    }

    /// Current chunks of a retrievable file
    pub fn chunks_for(&self, path: &str) -> Vec<Chunk> {
        self.records()
            .get(path)
            .filter(|record| record.is_retrievable())
            .map(|record| record.chunks.clone())
            .unwrap_or_default()
    }

    pub fn chunk(&self, path: &str, id: &ChunkId) -> Option<Chunk> {
        let records = self.records();
        let record = records.get(path).filter(|record| record.is_retrievable())?;
        record.chunk(id).cloned()
    }

    pub fn tracked_files(&self) -> Vec<String> {
        self.records().paths().cloned().collect()
    }

    pub fn summary(&self) -> IndexSummary {
        let records = self.records();
        IndexSummary {
            tracked_files: records.len(),
            indexed_files: records.count(FileState::Indexed),
            degraded_files: records.count(FileState::Degraded),
            unindexable_files: records.count(FileState::Unindexable),
            chunks: records.chunk_count(),
        }
    }

    pub fn stats_snapshot(&self) -> IndexStats {
        self.stats().clone()
    }

    fn is_current(&self, record: &FileRecord, hash: &str) -> bool {
        record.state == FileState::Indexed
            && record.parse_failures == 0
            && record.content_hash == hash
            && self.graph.contains_file(&record.path)
            && record.chunks.iter().all(|chunk| self.store.contains(&chunk.id))
    }

    async fn embed(&self, path: &str, chunks: &[&Chunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embedded = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|err| IndexerError::embedding_failure(path, err.to_string()))?;
            if embedded.len() != texts.len() {
                return Err(IndexerError::embedding_failure(
                    path,
                    format!("expected {} vectors, got {}", texts.len(), embedded.len()),
                ));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    fn refresh_graph(&self, path: &str, language: Language, text: &str) -> Result<()> {
        match self.parser.parse(path, text, language) {
            Ok(captures) => {
                self.graph.replace_file(path, language, captures);
                Ok(())
            }
            Err(err) => {
                log::warn!("{err}; keeping previous graph state for {path}");
                Err(IndexerError::Parse {
                    path: path.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    fn mark_unindexable(&self, path: &str, language: Language, hash: String, failures: u32) {
        self.store.delete_path(path);
        self.graph.remove_file(path);
        let revision = self.record(path).map_or(0, |prev| prev.revision) + 1;
        self.records_mut().insert(FileRecord {
            path: path.to_string(),
            language,
            content_hash: hash.clone(),
            revision,
            state: FileState::Unindexable,
            parse_failures: failures,
            failed_hash: Some(hash),
            chunks: Vec::new(),
        });

        let mut stats = self.stats();
        stats.files_unindexable += 1;
        stats.add_error(format!("{path}: unparsable after {failures} attempts"));
        log::warn!("{path} marked unindexable after {failures} parse failures");
    }

    fn records(&self) -> RwLockReadGuard<'_, RecordSet> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn records_mut(&self) -> RwLockWriteGuard<'_, RecordSet> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, IndexStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn entry_metadata(path: &str, chunk: &Chunk) -> EntryMetadata {
    EntryMetadata::new(
        path,
        chunk.byte_range.clone(),
        chunk.start_line,
        chunk.end_line,
        chunk.language,
    )
}

async fn load_graph(path: &Path) -> (DependencyGraph, bool) {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to read graph snapshot {}: {err}", path.display());
            }
            return (DependencyGraph::new(), false);
        }
    };
    match GraphSnapshot::from_bytes(&bytes) {
        Ok(snapshot) if !snapshot.is_empty() => {
            log::info!("Restored graph snapshot with {} files", snapshot.len());
            (DependencyGraph::restore(&snapshot), true)
        }
        Ok(_) => (DependencyGraph::new(), false),
        Err(err) => {
            log::warn!("Graph snapshot unusable, rebuilding: {err}");
            (DependencyGraph::new(), false)
        }
    }
}
