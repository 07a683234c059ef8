use crate::embeddings::Embedder;
use crate::error::{Result, VectorStoreError};
use crate::snapshot::{IndexSnapshot, IndexView};
use crate::types::{IngestionSummary, StoredChunk};
use async_trait::async_trait;
use drift_protocol::{normalize_text, Fork, SpecChunk};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

const PERSIST_VERSION: u32 = 1;

/// Any nearest-neighbour store the retriever can sit on.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    fn embedder(&self) -> Arc<dyn Embedder>;

    /// Index one chunk. Re-indexing an identical chunk is a no-op.
    async fn index(&self, chunk: SpecChunk) -> Result<IngestionSummary> {
        self.index_batch(vec![chunk]).await
    }

    /// Index chunks all-or-nothing.
    async fn index_batch(&self, chunks: Vec<SpecChunk>) -> Result<IngestionSummary>;

    /// Replace what the index holds for `(document_id, fork)` with `chunks`.
    /// Unchanged chunks keep their ingestion order.
    async fn index_document(
        &self,
        document_id: &str,
        fork: &Fork,
        chunks: Vec<SpecChunk>,
    ) -> Result<IngestionSummary>;

    /// Consistent view for one retrieval run
    fn snapshot(&self) -> Arc<dyn IndexView>;
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    embedder: String,
    dimension: usize,
    next_seq: u64,
    chunks: Vec<StoredChunk>,
}

/// In-memory index with copy-on-write snapshots and JSON persistence
pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    current: RwLock<Arc<IndexSnapshot>>,
    /// Serializes writers across the embedding await
    writer: Mutex<()>,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let dimension = embedder.dimension();
        Self {
            embedder,
            current: RwLock::new(Arc::new(IndexSnapshot::empty(dimension))),
            writer: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.current_snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current_snapshot(&self) -> Arc<IndexSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, next: IndexSnapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    async fn apply(
        &self,
        chunks: Vec<SpecChunk>,
        replace: Option<(&str, &Fork)>,
    ) -> Result<IngestionSummary> {
        let _writer = self.writer.lock().await;
        let base = self.current_snapshot();
        let mut summary = IngestionSummary::default();

        let mut incoming: HashSet<String> = HashSet::new();
        let mut fresh: Vec<SpecChunk> = Vec::new();
        let mut fresh_by_id: HashMap<String, usize> = HashMap::new();
        for chunk in chunks {
            incoming.insert(chunk.id.clone());
            let existing = base
                .chunks
                .get(&chunk.id)
                .map(|stored| &stored.chunk)
                .or_else(|| fresh_by_id.get(&chunk.id).map(|&i| &fresh[i]));
            match existing {
                Some(existing) if same_content(existing, &chunk) => summary.chunks_skipped += 1,
                Some(_) => {
                    log::warn!("Chunk id collision on {}; batch rejected", chunk.id);
                    return Err(VectorStoreError::IngestionConflict { chunk_id: chunk.id });
                }
                None => {
                    fresh_by_id.insert(chunk.id.clone(), fresh.len());
                    fresh.push(chunk);
                }
            }
        }

        let texts: Vec<String> = fresh.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&texts).await?
        };
        if vectors.len() != fresh.len() {
            return Err(VectorStoreError::Embedding(format!(
                "expected {} vectors, got {}",
                fresh.len(),
                vectors.len()
            )));
        }

        let mut next = (*base).clone();
        if let Some((document_id, fork)) = replace {
            let stale: Vec<String> = next
                .chunks
                .values()
                .filter(|stored| {
                    stored.chunk.document_id == document_id
                        && stored.chunk.fork_version == *fork
                        && !incoming.contains(&stored.chunk.id)
                })
                .map(|stored| stored.chunk.id.clone())
                .collect();
            for id in &stale {
                next.chunks.remove(id);
            }
            summary.chunks_removed = stale.len();
        }

        for (chunk, vector) in fresh.into_iter().zip(vectors) {
            if vector.len() != next.dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: next.dimension,
                    actual: vector.len(),
                });
            }
            let stored = StoredChunk {
                chunk,
                vector,
                ingest_seq: next.next_seq,
            };
            next.next_seq += 1;
            next.chunks.insert(stored.chunk.id.clone(), Arc::new(stored));
            summary.chunks_added += 1;
        }

        if summary.chunks_added > 0 || summary.chunks_removed > 0 {
            next.generation += 1;
            self.publish(next);
        }
        log::debug!(
            "Indexed batch: {} added, {} skipped, {} removed",
            summary.chunks_added,
            summary.chunks_skipped,
            summary.chunks_removed
        );
        Ok(summary)
    }

    /// Save index to disk
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.current_snapshot();
        let persisted = PersistedIndex {
            version: PERSIST_VERSION,
            embedder: self.embedder.id().to_string(),
            dimension: snapshot.dimension,
            next_seq: snapshot.next_seq,
            chunks: snapshot
                .chunks
                .values()
                .map(|stored| stored.as_ref().clone())
                .collect(),
        };
        let data = serde_json::to_string(&persisted)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        log::info!("Saved {} chunks to {}", persisted.chunks.len(), path.display());
        Ok(())
    }

    /// Load index from disk. Vectors from a different embedder are recomputed.
    pub async fn load(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path).await?;
        let persisted: PersistedIndex = serde_json::from_str(&data)?;

        let mut chunks = persisted.chunks;
        if persisted.embedder != embedder.id() || persisted.dimension != embedder.dimension() {
            log::warn!(
                "Index at {} was built with {}; re-embedding {} chunks with {}",
                path.display(),
                persisted.embedder,
                chunks.len(),
                embedder.id()
            );
            let texts: Vec<String> = chunks.iter().map(|s| s.chunk.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            for (stored, vector) in chunks.iter_mut().zip(vectors) {
                stored.vector = vector;
            }
        }

        let mut snapshot = IndexSnapshot::empty(embedder.dimension());
        snapshot.next_seq = persisted.next_seq;
        for stored in chunks {
            if stored.vector.len() != snapshot.dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: snapshot.dimension,
                    actual: stored.vector.len(),
                });
            }
            snapshot.next_seq = snapshot.next_seq.max(stored.ingest_seq + 1);
            snapshot.chunks.insert(stored.chunk.id.clone(), Arc::new(stored));
        }
        log::info!("Loaded {} chunks from {}", snapshot.chunks.len(), path.display());

        Ok(Self {
            embedder,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    /// Load when the file exists, start empty otherwise.
    pub async fn open(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if tokio::fs::try_exists(path.as_ref()).await? {
            Self::load(path, embedder).await
        } else {
            Ok(Self::new(embedder))
        }
    }
}

#[async_trait]
impl EmbeddingIndex for MemoryIndex {
    fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    async fn index_batch(&self, chunks: Vec<SpecChunk>) -> Result<IngestionSummary> {
        self.apply(chunks, None).await
    }

    async fn index_document(
        &self,
        document_id: &str,
        fork: &Fork,
        chunks: Vec<SpecChunk>,
    ) -> Result<IngestionSummary> {
        self.apply(chunks, Some((document_id, fork))).await
    }

    fn snapshot(&self) -> Arc<dyn IndexView> {
        self.current_snapshot()
    }
}

fn same_content(a: &SpecChunk, b: &SpecChunk) -> bool {
    a.document_id == b.document_id
        && a.fork_version == b.fork_version
        && normalize_text(&a.text) == normalize_text(&b.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use drift_protocol::{chunk_id, ForkScope, TextSpan};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn chunk(doc: &str, fork: &str, text: &str) -> SpecChunk {
        let fork = Fork::new(fork);
        SpecChunk {
            id: chunk_id(doc, &fork, &normalize_text(text)),
            document_id: doc.to_string(),
            fork_version: fork,
            text: text.to_string(),
            span: TextSpan::new(0, text.len()),
            topic_tags: Default::default(),
            forced_split: false,
            section: Vec::new(),
            ordinal: 0,
        }
    }

    fn index() -> MemoryIndex {
        MemoryIndex::new(Arc::new(HashingEmbedder::new(32)))
    }

    #[tokio::test]
    async fn indexing_twice_is_a_noop() {
        let index = index();
        let first = index.index(chunk("d", "cancun", "Fees MUST be burned.")).await.unwrap();
        let generation = index.snapshot().generation();
        let second = index.index(chunk("d", "cancun", "Fees MUST be burned.")).await.unwrap();

        assert_eq!(first.chunks_added, 1);
        assert_eq!(second.chunks_added, 0);
        assert_eq!(second.chunks_skipped, 1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.snapshot().generation(), generation);
    }

    #[tokio::test]
    async fn collision_rejects_the_whole_batch() {
        let index = index();
        index.index(chunk("d", "cancun", "original")).await.unwrap();

        let mut forged = chunk("d", "cancun", "something else");
        forged.id = chunk("d", "cancun", "original").id;
        let err = index
            .index_batch(vec![chunk("d", "cancun", "innocent"), forged])
            .await
            .unwrap_err();

        assert!(matches!(err, VectorStoreError::IngestionConflict { .. }));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn snapshots_do_not_see_later_writes() {
        let index = index();
        index.index(chunk("d", "cancun", "first")).await.unwrap();
        let view = index.snapshot();
        index.index(chunk("d", "cancun", "second")).await.unwrap();

        assert_eq!(view.len(), 1);
        assert_eq!(index.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn reingesting_a_document_replaces_its_chunks() {
        let index = index();
        index
            .index_document("d", &Fork::new("cancun"), vec![chunk("d", "cancun", "a"), chunk("d", "cancun", "b")])
            .await
            .unwrap();
        index.index(chunk("other", "cancun", "c")).await.unwrap();

        let summary = index
            .index_document("d", &Fork::new("cancun"), vec![chunk("d", "cancun", "b"), chunk("d", "cancun", "z")])
            .await
            .unwrap();
        assert_eq!(
            summary,
            IngestionSummary {
                chunks_added: 1,
                chunks_skipped: 1,
                chunks_removed: 1
            }
        );
        let scope = ForkScope::exact(Fork::new("cancun"));
        let mut texts: Vec<String> = index
            .snapshot()
            .chunks_in(&scope)
            .into_iter()
            .map(|s| s.chunk.text.clone())
            .collect();
        texts.sort();
        assert_eq!(texts, vec!["b", "c", "z"]);
    }

    #[tokio::test]
    async fn save_and_load_round_trip_keeps_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index").join("chunks.json");
        let index = index();
        index.index(chunk("d", "cancun", "older")).await.unwrap();
        index.index(chunk("d", "cancun", "newer")).await.unwrap();
        index.save(&path).await.unwrap();

        let loaded = MemoryIndex::open(&path, Arc::new(HashingEmbedder::new(32))).await.unwrap();
        assert_eq!(loaded.len(), 2);
        loaded.index(chunk("d", "cancun", "newest")).await.unwrap();
        let view = loaded.snapshot();
        let newest = view.get(&chunk("d", "cancun", "newest").id).unwrap();
        assert_eq!(newest.ingest_seq, 2);

        // A different embedder forces a re-embed with the new dimension.
        let resized = MemoryIndex::load(&path, Arc::new(HashingEmbedder::new(16))).await.unwrap();
        let view = resized.snapshot();
        assert!(view
            .chunks_in(&ForkScope::exact(Fork::new("cancun")))
            .iter()
            .all(|s| s.vector.len() == 16));
    }
}
