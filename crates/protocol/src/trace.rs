use crate::finding::Severity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoredChunk {
    pub chunk_id: String,
    /// Relevance in `[0, 1]`
    pub score: f32,
}

/// Ranked candidates for one unit. Scores never increase down the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetrievalResult {
    pub unit_id: String,
    pub ranked: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn empty(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            ranked: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = &str> {
        self.ranked.iter().map(|scored| scored.chunk_id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Compliant,
    Drift,
    InsufficientEvidence,
}

impl Verdict {
    pub const ALL: [Verdict; 3] = [
        Verdict::Compliant,
        Verdict::Drift,
        Verdict::InsufficientEvidence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Compliant => "compliant",
            Verdict::Drift => "drift",
            Verdict::InsufficientEvidence => "insufficient-evidence",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "compliant" | "match" => Some(Verdict::Compliant),
            "drift" | "mismatch" => Some(Verdict::Drift),
            "insufficient-evidence" | "ambiguous" => Some(Verdict::InsufficientEvidence),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One link of a chain of thought.
///
/// `evidence_ref` points at `chunk:<id>`, `effect:<index>`,
/// `precondition:<index>`, `call:<callee>` or `unit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReasoningStep {
    pub claim: String,
    pub evidence_ref: String,
}

impl ReasoningStep {
    pub fn new(claim: impl Into<String>, evidence_ref: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            evidence_ref: evidence_ref.into(),
        }
    }

    pub fn cited_chunk(&self) -> Option<&str> {
        self.evidence_ref.strip_prefix("chunk:").map(str::trim)
    }

    pub fn cited_effect(&self) -> Option<usize> {
        self.evidence_ref
            .strip_prefix("effect:")
            .and_then(|index| index.trim().parse().ok())
    }
}

/// How a trace came to its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TraceResolution {
    /// The oracle answered with a well-formed response
    Reasoned,
    /// Retrieval found nothing relevant; the oracle was not consulted
    NoCandidates,
    /// The oracle stayed unavailable after bounded retries
    OracleUnavailable,
    /// The oracle's output did not parse, even with the strict prompt
    OracleMalformed,
}

/// Append-only record of one reasoning pass over one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReasoningTrace {
    pub unit_id: String,
    /// Every candidate chunk shown to the oracle
    pub chunk_ids: Vec<String>,
    pub steps: Vec<ReasoningStep>,
    pub verdict: Verdict,
    pub raw_confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_hint: Option<Severity>,
    pub resolution: TraceResolution,
    /// Sample index when a unit is reasoned about more than once
    #[serde(default)]
    pub sample: usize,
}

impl ReasoningTrace {
    /// Trace for a unit the oracle could not judge.
    pub fn insufficient(
        unit_id: impl Into<String>,
        chunk_ids: Vec<String>,
        resolution: TraceResolution,
        reason: impl Into<String>,
    ) -> Self {
        let unit_id = unit_id.into();
        Self {
            steps: vec![ReasoningStep::new(reason, "unit")],
            unit_id,
            chunk_ids,
            verdict: Verdict::InsufficientEvidence,
            raw_confidence: 0.0,
            severity_hint: None,
            resolution,
            sample: 0,
        }
    }

    /// Chunks cited by the steps that were also shown to the oracle, in
    /// citation order. Falls back to every considered chunk.
    pub fn cited_chunk_ids(&self) -> Vec<String> {
        let mut cited: Vec<String> = Vec::new();
        for step in &self.steps {
            if let Some(id) = step.cited_chunk() {
                if self.chunk_ids.iter().any(|known| known == id)
                    && !cited.iter().any(|seen| seen == id)
                {
                    cited.push(id.to_string());
                }
            }
        }
        if cited.is_empty() {
            self.chunk_ids.clone()
        } else {
            cited
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn verdict_parses_legacy_labels() {
        assert_eq!(Verdict::parse("MISMATCH"), Some(Verdict::Drift));
        assert_eq!(Verdict::parse("insufficient_evidence"), Some(Verdict::InsufficientEvidence));
        assert_eq!(Verdict::parse("maybe"), None);
    }

    #[test]
    fn cited_chunks_ignore_unknown_ids() {
        let trace = ReasoningTrace {
            unit_id: "a.py::f".into(),
            chunk_ids: vec!["chunk-1".into(), "chunk-2".into()],
            steps: vec![
                ReasoningStep::new("writes balance", "effect:0"),
                ReasoningStep::new("requires a check", "chunk:chunk-2"),
                ReasoningStep::new("invented", "chunk:chunk-9"),
                ReasoningStep::new("again", "chunk:chunk-2"),
            ],
            verdict: Verdict::Drift,
            raw_confidence: 0.8,
            severity_hint: None,
            resolution: TraceResolution::Reasoned,
            sample: 0,
        };
        assert_eq!(trace.cited_chunk_ids(), vec!["chunk-2".to_string()]);
        assert_eq!(trace.steps[0].cited_effect(), Some(0));
    }
}
