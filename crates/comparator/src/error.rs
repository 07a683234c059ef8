use drift_protocol::ProtocolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ComparatorError>;

#[derive(Error, Debug)]
pub enum ComparatorError {
    #[error(transparent)]
    InvalidTransition(#[from] ProtocolError),

    #[error("Unknown finding: {0}")]
    UnknownFinding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
