use drift_protocol::SpecChunk;
use serde::{Deserialize, Serialize};

/// A chunk together with its vector and ingestion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk: SpecChunk,
    pub vector: Vec<f32>,
    /// Monotonic across the store; larger means more recently ingested
    pub ingest_seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub chunk_id: String,
    /// Cosine similarity clamped to `[0, 1]`
    pub score: f32,
    pub ingest_seq: u64,
}

/// Outcome of one ingestion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub chunks_added: usize,
    pub chunks_skipped: usize,
    /// Chunks of a re-ingested document that no longer appear in it
    #[serde(default)]
    pub chunks_removed: usize,
}

impl IngestionSummary {
    pub fn merge(&mut self, other: IngestionSummary) {
        self.chunks_added += other.chunks_added;
        self.chunks_skipped += other.chunks_skipped;
        self.chunks_removed += other.chunks_removed;
    }
}
