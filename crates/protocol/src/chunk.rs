use crate::fork::Fork;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Byte range of a chunk inside its source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A semantically coherent piece of specification text.
///
/// Chunks are immutable once ingested. The id is a content hash of
/// `(document_id, fork_version, normalized_text)`, so re-ingesting identical
/// content reproduces identical ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpecChunk {
    pub id: String,
    pub document_id: String,
    pub fork_version: Fork,
    pub text: String,
    pub span: TextSpan,
    #[serde(default)]
    pub topic_tags: BTreeSet<String>,

    /// The chunk was cut at the token window rather than at a detected boundary
    #[serde(default)]
    pub forced_split: bool,

    /// Heading path the chunk sits under, outermost first
    #[serde(default)]
    pub section: Vec<String>,

    /// Position of the chunk within its document
    #[serde(default)]
    pub ordinal: usize,
}

/// Tag carried by chunks that state a requirement (must, shall, required)
pub const NORMATIVE_TAG: &str = "normative";

impl SpecChunk {
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }

    pub fn is_normative(&self) -> bool {
        self.topic_tags.contains(NORMATIVE_TAG)
    }
}

/// Collapse whitespace runs and trim; the canonical form used for hashing.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic chunk id.
pub fn chunk_id(document_id: &str, fork: &Fork, normalized_text: &str) -> String {
    format!(
        "chunk-{}",
        crate::stable_digest(&[document_id, fork.as_str(), normalized_text], 16)
    )
}
