use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OracleError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    /// Transient: retried with backoff
    #[error("Reasoning oracle unavailable: {0}")]
    Unavailable(String),

    /// The call outlived its budget; retried like an outage
    #[error("Reasoning oracle timed out after {0:?}")]
    Timeout(Duration),

    /// The output does not parse into the response schema; never retried as-is
    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),
}

impl OracleError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}
