use crate::finding::{FindingStatus, ReviewDecision};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Review decisions only apply to open findings
    #[error("Invalid status transition: cannot {decision} a finding that is already {from}")]
    InvalidTransition {
        from: FindingStatus,
        decision: ReviewDecision,
    },
}
