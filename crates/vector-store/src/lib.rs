//! # Drift Vector Store
//!
//! Embedding index for specification chunks.
//!
//! ## Features
//!
//! - **Pluggable storage** behind [`EmbeddingIndex`] / [`IndexView`]
//! - **Idempotent ingestion**: identical chunks are skipped, hash
//!   collisions with different content reject the batch
//! - **Snapshot reads**: a retrieval run never sees a half-ingested document
//! - **Offline embeddings** via [`HashingEmbedder`]
//! - **Persistent storage** with JSON serialization
//!
//! ## Architecture
//!
//! ```text
//! SpecChunk[]
//!     │
//!     ├──> Embedder (HashingEmbedder or any other)
//!     │      └─> Vec<f32>[dimension]
//!     │
//!     ├──> MemoryIndex (single writer, copy-on-write)
//!     │      └─> Arc<IndexSnapshot>  ── shared by readers
//!     │
//!     └──> Persistent Storage (JSON)
//! ```

mod embeddings;
mod error;
mod snapshot;
mod store;
mod types;

pub use embeddings::{cosine_similarity, tokenize, Embedder, HashingEmbedder};
pub use error::{Result, VectorStoreError};
pub use snapshot::{IndexSnapshot, IndexView};
pub use store::{EmbeddingIndex, MemoryIndex};
pub use types::{IngestionSummary, Neighbor, StoredChunk};
