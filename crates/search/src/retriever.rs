use crate::error::{Result, SearchError};
use crate::fusion::{jaccard, lexical_score, ChunkTerms, ScoreFusion};
use crate::graph::ClauseGraph;
use crate::query::UnitQuery;
use drift_protocol::{BehavioralUnit, ForkScope, RetrievalResult, ScoredChunk, SpecChunk};
use drift_vector_store::{cosine_similarity, Embedder, EmbeddingIndex, IndexView};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Retrieval tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Results per unit unless the caller asks otherwise
    pub top_k: usize,
    /// Hard cap on `k`
    pub max_k: usize,
    /// Candidates scoring below this are not relevant
    pub min_score: f32,
    /// Multiplier for chunks cut at the token window
    pub forced_split_discount: f32,
    /// Token-set Jaccard at or above which two chunks count as one
    pub near_duplicate_threshold: f32,
    pub expand_clause_graph: bool,
    /// Neighbour score relative to the hit it was reached from
    pub graph_discount: f32,
    /// Dense candidates fetched per requested result
    pub candidate_pool: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            max_k: 50,
            min_score: 0.25,
            forced_split_discount: 0.9,
            near_duplicate_threshold: 0.9,
            expand_clause_graph: true,
            graph_discount: 0.8,
            candidate_pool: 5,
        }
    }
}

/// Hits whose neighbours are pulled in by the clause graph
const GRAPH_SEEDS: usize = 3;

/// Entry point: one [`RetrievalRun`] per analysis run
pub struct Retriever {
    index: Arc<dyn EmbeddingIndex>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(index: Arc<dyn EmbeddingIndex>, config: RetrieverConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Pin an index snapshot for `scope`. Fails when nothing is indexed for it.
    pub fn begin_run(&self, scope: ForkScope) -> Result<RetrievalRun> {
        let view = self.index.snapshot();
        let chunks = view.chunks_in(&scope);
        if chunks.is_empty() {
            let fork = scope
                .forks()
                .map(|fork| fork.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(SearchError::EmptyIndex { fork });
        }

        let terms: HashMap<String, ChunkTerms> = chunks
            .iter()
            .map(|stored| {
                (
                    stored.chunk.id.clone(),
                    ChunkTerms::new(&stored.chunk.text, &stored.chunk.topic_tags),
                )
            })
            .collect();
        let graph = self
            .config
            .expand_clause_graph
            .then(|| ClauseGraph::build(chunks.iter().map(|stored| &stored.chunk)));

        log::info!(
            "Retrieval run over {} chunks (generation {}, forks: {})",
            chunks.len(),
            view.generation(),
            scope.forks().map(|f| f.as_str()).collect::<Vec<_>>().join(", ")
        );
        drop(chunks);

        Ok(RetrievalRun {
            scope,
            view,
            embedder: self.index.embedder(),
            config: self.config.clone(),
            terms,
            graph,
        })
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    chunk_id: String,
    score: f32,
    ingest_seq: u64,
}

fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.ingest_seq.cmp(&a.ingest_seq))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Retrieval against one pinned snapshot. Safe to share across workers.
pub struct RetrievalRun {
    scope: ForkScope,
    view: Arc<dyn IndexView>,
    embedder: Arc<dyn Embedder>,
    config: RetrieverConfig,
    terms: HashMap<String, ChunkTerms>,
    graph: Option<ClauseGraph>,
}

impl RetrievalRun {
    pub fn scope(&self) -> &ForkScope {
        &self.scope
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.view.generation()
    }

    pub fn chunk_count(&self) -> usize {
        self.terms.len()
    }

    /// Chunk from the pinned snapshot
    pub fn chunk(&self, chunk_id: &str) -> Option<&SpecChunk> {
        self.view
            .get(chunk_id)
            .map(|stored| &stored.chunk)
            .filter(|chunk| self.scope.admits(&chunk.fork_version))
    }

    pub async fn retrieve(&self, unit: &BehavioralUnit, k: usize) -> Result<RetrievalResult> {
        if unit.fork != *self.scope.target() {
            log::warn!(
                "{} was built for fork {} but the run targets {}; no candidates",
                unit.id,
                unit.fork,
                self.scope.target()
            );
            return Ok(RetrievalResult::empty(&unit.id));
        }
        self.retrieve_query(&unit.id, &UnitQuery::from_unit(unit), k)
            .await
    }

    /// Ranked chunks for an arbitrary query. Scores are in `[0, 1]` and never
    /// increase down the list.
    pub async fn retrieve_query(
        &self,
        unit_id: &str,
        query: &UnitQuery,
        k: usize,
    ) -> Result<RetrievalResult> {
        let k = k.min(self.config.max_k);
        if k == 0 || query.is_empty() {
            return Ok(RetrievalResult::empty(unit_id));
        }

        let vector = self.embedder.embed(&query.text).await?;
        let pool = k.saturating_mul(self.config.candidate_pool.max(1));
        let dense: HashMap<String, f32> = self
            .view
            .nearest(&vector, &self.scope, pool)?
            .into_iter()
            .map(|neighbor| (neighbor.chunk_id, neighbor.score))
            .collect();

        let fusion = ScoreFusion::adaptive(query);
        let mut candidates = Vec::new();
        for stored in self.view.chunks_in(&self.scope) {
            let id = &stored.chunk.id;
            let lexical = self
                .terms
                .get(id)
                .map_or(0.0, |terms| lexical_score(query, terms));
            let dense_score = match dense.get(id) {
                Some(&score) => score,
                None if lexical > 0.0 => cosine_similarity(&vector, &stored.vector).clamp(0.0, 1.0),
                None => continue,
            };
            candidates.push(Candidate {
                chunk_id: id.clone(),
                score: self.discount(&stored.chunk, fusion.fuse(dense_score, lexical)),
                ingest_seq: stored.ingest_seq,
            });
        }
        sort_candidates(&mut candidates);

        if let Some(graph) = &self.graph {
            self.expand(graph, &mut candidates);
        }

        candidates.retain(|c| c.score >= self.config.min_score);
        let mut kept: Vec<Candidate> = Vec::with_capacity(k);
        for candidate in candidates {
            if kept.len() == k {
                break;
            }
            if self.duplicates_any(&candidate, &kept) {
                log::debug!("{unit_id}: collapsed near-duplicate {}", candidate.chunk_id);
                continue;
            }
            kept.push(candidate);
        }

        log::debug!("{unit_id}: {} candidates for '{}'", kept.len(), query.text);
        Ok(RetrievalResult {
            unit_id: unit_id.to_string(),
            ranked: kept
                .into_iter()
                .map(|c| ScoredChunk {
                    chunk_id: c.chunk_id,
                    score: c.score,
                })
                .collect(),
        })
    }

    fn discount(&self, chunk: &SpecChunk, score: f32) -> f32 {
        if chunk.forced_split {
            score * self.config.forced_split_discount
        } else {
            score
        }
    }

    /// Pull graph neighbours of the top hits in at a discounted score.
    fn expand(&self, graph: &ClauseGraph, candidates: &mut Vec<Candidate>) {
        let present: HashSet<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
        let mut added: HashMap<String, Candidate> = HashMap::new();
        for seed in candidates.iter().take(GRAPH_SEEDS) {
            if seed.score < self.config.min_score {
                break;
            }
            for (neighbor, _) in graph.neighbors(&seed.chunk_id) {
                if present.contains(neighbor) {
                    continue;
                }
                let Some(stored) = self.view.get(neighbor) else {
                    continue;
                };
                let score = self.discount(&stored.chunk, seed.score * self.config.graph_discount);
                let entry = added.entry(neighbor.to_string()).or_insert(Candidate {
                    chunk_id: neighbor.to_string(),
                    score,
                    ingest_seq: stored.ingest_seq,
                });
                entry.score = entry.score.max(score);
            }
        }
        if !added.is_empty() {
            candidates.extend(added.into_values());
            sort_candidates(candidates);
        }
    }

    fn duplicates_any(&self, candidate: &Candidate, kept: &[Candidate]) -> bool {
        let Some(terms) = self.terms.get(&candidate.chunk_id) else {
            return false;
        };
        kept.iter().any(|other| {
            self.terms.get(&other.chunk_id).is_some_and(|other_terms| {
                jaccard(&terms.terms, &other_terms.terms) >= self.config.near_duplicate_threshold
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_protocol::{chunk_id, normalize_text, Fork, TextSpan};
    use drift_vector_store::{HashingEmbedder, MemoryIndex};
    use pretty_assertions::assert_eq;

    fn chunk(doc: &str, fork: &str, text: &str) -> SpecChunk {
        let fork = Fork::new(fork);
        SpecChunk {
            id: chunk_id(doc, &fork, &normalize_text(text)),
            document_id: doc.into(),
            fork_version: fork,
            text: text.into(),
            span: TextSpan::new(0, text.len()),
            topic_tags: Default::default(),
            forced_split: false,
            section: Vec::new(),
            ordinal: 0,
        }
    }

    async fn retriever(chunks: Vec<SpecChunk>) -> (Arc<MemoryIndex>, Retriever) {
        let index = Arc::new(MemoryIndex::new(Arc::new(HashingEmbedder::default())));
        for chunk in chunks {
            index.index(chunk).await.unwrap();
        }
        let retriever = Retriever::new(index.clone(), RetrieverConfig::default());
        (index, retriever)
    }

    fn cancun() -> ForkScope {
        ForkScope::exact(Fork::new("cancun"))
    }

    #[tokio::test]
    async fn empty_scope_is_an_error() {
        let (_, retriever) = retriever(vec![chunk("d", "shanghai", "withdrawals")]).await;
        assert!(matches!(
            retriever.begin_run(cancun()),
            Err(SearchError::EmptyIndex { .. })
        ));
    }

    #[tokio::test]
    async fn fork_isolation_unless_widened() {
        let (_, retriever) = retriever(vec![
            chunk("d", "cancun", "The blob gas price MUST be updated."),
            chunk("d", "shanghai", "The withdrawal balance MUST be credited."),
        ])
        .await;
        let query = UnitQuery::from_text("credit withdrawal balance");

        let run = retriever.begin_run(cancun()).unwrap();
        let result = run.retrieve_query("u", &query, 10).await.unwrap();
        assert!(result
            .chunk_ids()
            .all(|id| run.chunk(id).is_some_and(|c| c.fork_version == Fork::new("cancun"))));

        let widened = retriever
            .begin_run(cancun().widen([Fork::new("shanghai")]))
            .unwrap();
        let result = widened.retrieve_query("u", &query, 10).await.unwrap();
        let top = widened.chunk(&result.ranked[0].chunk_id).unwrap();
        assert_eq!(top.fork_version, Fork::new("shanghai"));
    }

    #[tokio::test]
    async fn ties_go_to_the_most_recent_chunk() {
        let text = "The sender nonce MUST be incremented.";
        let (_, retriever) = retriever(vec![chunk("old", "cancun", text), chunk("new", "cancun", text)]).await;
        let mut config = RetrieverConfig::default();
        config.near_duplicate_threshold = 1.1;
        let retriever = Retriever::new(retriever.index.clone(), config);
        let run = retriever.begin_run(cancun()).unwrap();
        let result = run
            .retrieve_query("u", &UnitQuery::from_text("increment sender nonce"), 2)
            .await
            .unwrap();

        assert_eq!(result.ranked.len(), 2);
        assert_eq!(result.ranked[0].score, result.ranked[1].score);
        assert_eq!(run.chunk(&result.ranked[0].chunk_id).unwrap().document_id, "new");
    }

    #[tokio::test]
    async fn near_duplicates_collapse_and_scores_descend() {
        let base = "The sender balance MUST be reduced by the transferred amount before the recipient balance is credited with value";
        let (_, retriever) = retriever(vec![
            chunk("a", "cancun", base),
            chunk("b", "cancun", &format!("{base} exactly")),
            chunk("c", "cancun", "The recipient balance is credited after the sender pays."),
        ])
        .await;
        let run = retriever.begin_run(cancun()).unwrap();
        let result = run
            .retrieve_query("u", &UnitQuery::from_text("sender balance amount recipient"), 10)
            .await
            .unwrap();

        let docs: Vec<&str> = result
            .chunk_ids()
            .map(|id| run.chunk(id).unwrap().document_id.as_str())
            .collect();
        assert_eq!(docs.iter().filter(|d| **d == "a" || **d == "b").count(), 1);
        assert!(docs.contains(&"c"));
        assert!(result.ranked.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(result.ranked.iter().all(|s| (0.0..=1.0).contains(&s.score)));
    }

    #[tokio::test]
    async fn forced_split_chunks_are_discounted() {
        let text = "The beacon root MUST be stored in the ring buffer.";
        let mut forced = chunk("forced", "cancun", text);
        forced.forced_split = true;
        let (_, retriever) = retriever(vec![chunk("clean", "cancun", text), forced]).await;
        let run = retriever.begin_run(cancun()).unwrap();
        let result = run
            .retrieve_query("u", &UnitQuery::from_text("store beacon root ring buffer"), 2)
            .await
            .unwrap();
        // Identical text would collapse; only the undiscounted copy survives.
        assert_eq!(result.ranked.len(), 1);
        assert_eq!(run.chunk(&result.ranked[0].chunk_id).unwrap().document_id, "clean");
    }

    #[tokio::test]
    async fn runs_do_not_see_writes_made_after_they_began() {
        let (index, retriever) = retriever(vec![chunk("d", "cancun", "Fees MUST be burned.")]).await;
        let run = retriever.begin_run(cancun()).unwrap();
        index
            .index(chunk("d", "cancun", "Burned fees MUST be tracked."))
            .await
            .unwrap();

        let result = run
            .retrieve_query("u", &UnitQuery::from_text("burn fees"), 10)
            .await
            .unwrap();
        assert_eq!(run.chunk_count(), 1);
        assert_eq!(result.ranked.len(), 1);
    }

    #[tokio::test]
    async fn unrelated_units_get_no_candidates() {
        let (_, retriever) = retriever(vec![chunk("d", "cancun", "Blob headers carry a versioned hash.")]).await;
        let run = retriever.begin_run(cancun()).unwrap();
        let result = run
            .retrieve_query("u", &UnitQuery::from_text("render widget colour palette"), 10)
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
