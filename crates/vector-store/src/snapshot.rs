use crate::embeddings::cosine_similarity;
use crate::error::{Result, VectorStoreError};
use crate::types::{Neighbor, StoredChunk};
use drift_protocol::ForkScope;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Read-only view of the index at one point in time.
///
/// A retrieval run holds one view for its whole duration, so writes that
/// land meanwhile stay invisible to it.
pub trait IndexView: Send + Sync + Debug {
    /// Bumped on every write that changes the content
    fn generation(&self) -> u64;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, chunk_id: &str) -> Option<&StoredChunk>;

    /// Chunks admitted by `scope`, in id order
    fn chunks_in(&self, scope: &ForkScope) -> Vec<&StoredChunk>;

    fn count_in(&self, scope: &ForkScope) -> usize {
        self.chunks_in(scope).len()
    }

    /// Top `k` by cosine similarity. Equal scores go to the most recently
    /// ingested chunk, then to the smaller id.
    fn nearest(&self, query: &[f32], scope: &ForkScope, k: usize) -> Result<Vec<Neighbor>>;
}

/// Copy-on-write snapshot backing [`crate::MemoryIndex`]
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub(crate) generation: u64,
    pub(crate) dimension: usize,
    pub(crate) next_seq: u64,
    pub(crate) chunks: BTreeMap<String, Arc<StoredChunk>>,
}

impl IndexSnapshot {
    pub(crate) fn empty(dimension: usize) -> Self {
        Self {
            generation: 0,
            dimension,
            next_seq: 0,
            chunks: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl IndexView for IndexSnapshot {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn get(&self, chunk_id: &str) -> Option<&StoredChunk> {
        self.chunks.get(chunk_id).map(Arc::as_ref)
    }

    fn chunks_in(&self, scope: &ForkScope) -> Vec<&StoredChunk> {
        self.chunks
            .values()
            .filter(|stored| scope.admits(&stored.chunk.fork_version))
            .map(Arc::as_ref)
            .collect()
    }

    fn nearest(&self, query: &[f32], scope: &ForkScope, k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .chunks_in(scope)
            .into_iter()
            .map(|stored| Neighbor {
                chunk_id: stored.chunk.id.clone(),
                score: cosine_similarity(query, &stored.vector).clamp(0.0, 1.0),
                ingest_seq: stored.ingest_seq,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.ingest_seq.cmp(&a.ingest_seq))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        Ok(scored)
    }
}
