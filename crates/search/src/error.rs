use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    /// Nothing ingested for the requested fork scope
    #[error("No specification indexed for fork {fork}; ingest a specification first")]
    EmptyIndex { fork: String },

    #[error("Vector store error: {0}")]
    VectorStore(#[from] drift_vector_store::VectorStoreError),
}
