//! # Drift Spec Chunker
//!
//! Splits specification documents into chunks that never straddle a
//! boundary the parser can see.
//!
//! ## Pipeline
//!
//! ```text
//! SpecDocument (id, fork, path, text)
//!     │
//!     ├──> Format detection (.md / .rst / plain)
//!     │
//!     ├──> Block parsing
//!     │    ├─> headings      → section path, always a boundary
//!     │    ├─> clauses/code  → boundary once a chunk is big enough
//!     │    └─> paragraphs    → packed up to target_tokens
//!     │
//!     ├──> Oversized blocks
//!     │    ├─> sentence groups        (forced_split = false)
//!     │    └─> token-window fallback  (forced_split = true)
//!     │
//!     └──> SpecChunk[] with content-hash ids and topic tags
//! ```
//!
//! ## Example
//!
//! ```rust
//! use drift_protocol::Fork;
//! use drift_spec_chunker::{ChunkerConfig, SpecChunker, SpecDocument};
//!
//! let chunker = SpecChunker::new(ChunkerConfig::default()).unwrap();
//! let doc = SpecDocument::new(
//!     "eip-4844.md",
//!     Fork::new("cancun"),
//!     "# Blob gas\n\nThe block MUST NOT exceed MAX_BLOB_GAS_PER_BLOCK.\n",
//! );
//! let chunks = chunker.chunk(&doc).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert!(chunks[0].is_normative());
//! ```

mod chunker;
mod config;
mod error;
mod format;
mod tags;

pub use chunker::{SpecChunker, SpecDocument};
pub use config::{estimate_tokens, ChunkerConfig};
pub use error::{ChunkerError, Result};
pub use format::DocumentFormat;
pub use tags::{identifiers, is_normative, slugify, topic_tags, RequirementType};
