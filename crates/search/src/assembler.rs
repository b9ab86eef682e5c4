use crate::error::{Result, SearchError};
use codechat_chunker::{estimate_tokens, Chunk, ChunkId};
use codechat_indexer::Indexer;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Retrieval and ranking knobs
#[derive(Debug, Clone, Copy)]
pub struct AssemblerConfig {
    /// Semantic hits requested from the vector store
    pub top_k: usize,

    /// Maximum estimated tokens of included snippets
    pub token_budget: usize,

    pub similarity_weight: f32,

    /// Added to one-hop graph neighbors of explicitly listed files
    pub graph_bonus: f32,

    /// Best chunks taken from each graph neighbor file
    pub neighbor_chunks: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            token_budget: 3_000,
            similarity_weight: 1.0,
            graph_bonus: 0.25,
            neighbor_chunks: 2,
        }
    }
}

/// Why a snippet was retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetOrigin {
    Semantic,
    ExplicitFile,
    GraphNeighbor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnippet {
    pub id: ChunkId,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub score: f32,
    pub tokens: usize,
    pub origin: SnippetOrigin,
}

/// Ranked snippets whose estimated tokens never exceed `budget`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBundle {
    pub snippets: Vec<ContextSnippet>,
    pub total_tokens: usize,
    pub budget: usize,

    /// Candidates left out because they did not fit
    pub dropped: usize,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }
}

struct Candidate {
    chunk: Chunk,
    score: f32,
    origin: SnippetOrigin,
}

/// Builds a [`ContextBundle`] for a query from the vector store, the tracked
/// chunk texts and one hop of the dependency graph.
pub struct ContextAssembler {
    indexer: Arc<Indexer>,
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(indexer: Arc<Indexer>, config: AssemblerConfig) -> Self {
        Self { indexer, config }
    }

    pub const fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Every explicit file must be tracked and retrievable
    pub fn check_files(&self, files: &[String]) -> Result<()> {
        match files.iter().find(|file| !self.indexer.is_retrievable(file)) {
            Some(unknown) => Err(SearchError::UnknownFile(unknown.clone())),
            None => Ok(()),
        }
    }

    /// Retrieve, merge, rank and budget context for `message`.
    ///
    /// An embedding failure degrades to explicit-file context only.
    pub async fn assemble(&self, message: &str, files: &[String]) -> Result<ContextBundle> {
        if message.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        self.check_files(files)?;

        let query = match self.indexer.embedder().embed(message).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                log::warn!("Query embedding failed, using explicit files only: {err}");
                None
            }
        };

        let mut candidates: HashMap<ChunkId, Candidate> = HashMap::new();
        if let Some(query) = &query {
            self.collect_semantic(query, &mut candidates)?;
        }
        self.collect_explicit(files, query.as_deref(), &mut candidates);

        let mut ranked: Vec<Candidate> = candidates.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.path.cmp(&b.chunk.path))
                .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
        });

        let bundle = fill_budget(ranked, self.config.token_budget);
        log::debug!(
            "Assembled {} snippets ({} tokens of {}, {} dropped)",
            bundle.snippets.len(),
            bundle.total_tokens,
            bundle.budget,
            bundle.dropped
        );
        Ok(bundle)
    }

    fn collect_semantic(
        &self,
        query: &[f32],
        candidates: &mut HashMap<ChunkId, Candidate>,
    ) -> Result<()> {
        let hits = self.indexer.store().search(query, self.config.top_k, None)?;
        for hit in hits {
            // vectors of files that stopped being retrievable are never surfaced
            let Some(chunk) = self.indexer.chunk(&hit.metadata.path, &hit.id) else {
                continue;
            };
            let score = self.config.similarity_weight * hit.score;
            upsert(candidates, chunk, score, SnippetOrigin::Semantic);
        }
        Ok(())
    }

    fn collect_explicit(
        &self,
        files: &[String],
        query: Option<&[f32]>,
        candidates: &mut HashMap<ChunkId, Candidate>,
    ) {
        if files.is_empty() {
            return;
        }
        let explicit: HashSet<&str> = files.iter().map(String::as_str).collect();

        for file in files {
            for chunk in self.indexer.chunks_for(file) {
                let score = self.config.similarity_weight;
                upsert(candidates, chunk, score, SnippetOrigin::ExplicitFile);
            }
        }

        let mut neighbors: Vec<String> = Vec::new();
        for file in files {
            for neighbor in self.indexer.graph().neighbors(file) {
                if !explicit.contains(neighbor.as_str()) && !neighbors.contains(&neighbor) {
                    neighbors.push(neighbor);
                }
            }
        }

        for neighbor in neighbors {
            let mut scored: Vec<(f32, Chunk)> = self
                .indexer
                .chunks_for(&neighbor)
                .into_iter()
                .map(|chunk| {
                    let similarity = query
                        .and_then(|q| self.indexer.store().score(&chunk.id, q))
                        .unwrap_or(0.0);
                    (similarity, chunk)
                })
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.index.cmp(&b.1.index)));

            for (similarity, chunk) in scored.into_iter().take(self.config.neighbor_chunks) {
                let score = self.config.similarity_weight * similarity + self.config.graph_bonus;
                upsert(candidates, chunk, score, SnippetOrigin::GraphNeighbor);
            }
        }
    }
}

/// Keep the best score seen for a chunk
fn upsert(
    candidates: &mut HashMap<ChunkId, Candidate>,
    chunk: Chunk,
    score: f32,
    origin: SnippetOrigin,
) {
    match candidates.get_mut(&chunk.id) {
        Some(existing) if existing.score >= score => {}
        Some(existing) => {
            existing.score = score;
            existing.origin = origin;
        }
        None => {
            candidates.insert(
                chunk.id.clone(),
                Candidate {
                    chunk,
                    score,
                    origin,
                },
            );
        }
    }
}

/// Greedy inclusion in rank order, skipping whatever does not fit
fn fill_budget(ranked: Vec<Candidate>, budget: usize) -> ContextBundle {
    let mut bundle = ContextBundle {
        budget,
        ..ContextBundle::default()
    };
    for candidate in ranked {
        let tokens = estimate_tokens(&candidate.chunk.text);
        if bundle.total_tokens + tokens > budget {
            bundle.dropped += 1;
            continue;
        }
        bundle.total_tokens += tokens;
        let Chunk {
            id,
            path,
            start_line,
            end_line,
            text,
            ..
        } = candidate.chunk;
        bundle.snippets.push(ContextSnippet {
            id,
            path,
            start_line,
            end_line,
            text,
            score: candidate.score,
            tokens,
            origin: candidate.origin,
        });
    }
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use codechat_chunker::Language;
    use proptest::prelude::*;

    fn candidate(id: &str, chars: usize, score: f32) -> Candidate {
        Candidate {
            chunk: Chunk {
                id: ChunkId::from(id),
                path: format!("{id}.rs"),
                index: 0,
                byte_range: 0..chars,
                start_line: 1,
                end_line: 1,
                content_hash: String::new(),
                language: Language::Rust,
                text: "x".repeat(chars),
            },
            score,
            origin: SnippetOrigin::Semantic,
        }
    }

    #[test]
    fn oversized_candidates_are_skipped_not_truncated() {
        let ranked = vec![
            candidate("a", 40, 0.9),
            candidate("big", 400, 0.8),
            candidate("c", 40, 0.7),
        ];
        let bundle = fill_budget(ranked, 25);
        let ids: Vec<&str> = bundle.snippets.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(bundle.total_tokens, 20);
        assert_eq!(bundle.dropped, 1);
    }

    #[test]
    fn higher_score_wins_on_merge() {
        let mut candidates = HashMap::new();
        let chunk = candidate("a", 4, 0.0).chunk;
        upsert(&mut candidates, chunk.clone(), 0.4, SnippetOrigin::Semantic);
        upsert(&mut candidates, chunk.clone(), 1.0, SnippetOrigin::ExplicitFile);
        upsert(&mut candidates, chunk, 0.6, SnippetOrigin::GraphNeighbor);

        let merged = &candidates[&ChunkId::from("a")];
        assert_eq!(merged.origin, SnippetOrigin::ExplicitFile);
        assert!((merged.score - 1.0).abs() < f32::EPSILON);
    }

    proptest! {
        #[test]
        fn bundle_never_exceeds_budget(
            sizes in proptest::collection::vec(1usize..2_000, 0..40),
            budget in 0usize..3_000,
        ) {
            let ranked = sizes
                .iter()
                .enumerate()
                .map(|(i, chars)| candidate(&format!("c{i}"), *chars, 1.0 - i as f32 * 0.01))
                .collect();
            let bundle = fill_budget(ranked, budget);
            let sum: usize = bundle.snippets.iter().map(|s| s.tokens).sum();
            prop_assert!(bundle.total_tokens <= budget);
            prop_assert_eq!(sum, bundle.total_tokens);
            prop_assert_eq!(bundle.snippets.len() + bundle.dropped, sizes.len());
        }
    }
}
