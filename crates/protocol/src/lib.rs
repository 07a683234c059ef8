//! # Drift Protocol
//!
//! Shared data model for the drift-detection engine. Every component speaks in
//! these types, so the extractor, the specification index, the reasoning
//! pipeline and the report generator can evolve independently.
//!
//! ```text
//! source ──> BehavioralUnit ──┐
//!                             ├──> RetrievalResult ──> ReasoningTrace ──> Finding
//! spec   ──> SpecChunk ───────┘
//! ```
//!
//! Values here are plain data: immutable once produced, except for
//! [`Finding`] whose review status moves only through
//! [`Finding::apply_review`].

mod behavior;
mod chunk;
mod error;
mod finding;
mod fork;
mod trace;

pub use behavior::{
    BehavioralUnit, Condition, Effect, EffectTarget, ExternalCallRef, Operation, SourceLocation,
    UnitKind,
};
pub use chunk::{chunk_id, normalize_text, SpecChunk, TextSpan, NORMATIVE_TAG};
pub use error::{ProtocolError, Result};
pub use finding::{
    Finding, FindingStatus, ReviewDecision, Severity, UnevaluatedReason, UnevaluatedUnit,
};
pub use fork::{Fork, ForkScope, DEFAULT_FORK, KNOWN_FORKS};
pub use trace::{
    ReasoningStep, ReasoningTrace, RetrievalResult, ScoredChunk, TraceResolution, Verdict,
};

/// Hex-encoded SHA-256 of `parts` separated by NUL bytes, truncated to `len` chars.
pub fn stable_digest(parts: &[&str], len: usize) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(len);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_separates_parts() {
        assert_ne!(stable_digest(&["ab", "c"], 16), stable_digest(&["a", "bc"], 16));
        assert_eq!(stable_digest(&["x"], 8).len(), 8);
    }
}
