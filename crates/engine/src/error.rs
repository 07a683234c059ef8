use drift_behavior::ExtractionError;
use drift_comparator::ComparatorError;
use drift_report::ReportError;
use drift_search::SearchError;
use drift_spec_chunker::ChunkerError;
use drift_vector_store::VectorStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Run-level failures. Per-unit problems never surface here; they degrade to
/// unevaluated entries in the report.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No analyzable source under {0}")]
    NoSource(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Chunker(#[from] ChunkerError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Comparator(#[from] ComparatorError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors that mean the index holds nothing for the fork
    pub fn is_empty_index(&self) -> bool {
        matches!(self, Self::Search(SearchError::EmptyIndex { .. }))
    }
}
