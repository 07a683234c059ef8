use crate::behavior::SourceLocation;
use crate::error::{ProtocolError, Result};
use crate::trace::Verdict;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "info" | "low" => Some(Severity::Info),
            "warning" | "medium" => Some(Severity::Warning),
            "critical" | "high" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    #[default]
    Open,
    Dismissed,
    Confirmed,
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FindingStatus::Open => "open",
            FindingStatus::Dismissed => "dismissed",
            FindingStatus::Confirmed => "confirmed",
        })
    }
}

/// A human reviewer's ruling on a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Confirm,
    Dismiss,
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReviewDecision::Confirm => "confirm",
            ReviewDecision::Dismiss => "dismiss",
        })
    }
}

/// A point of divergence surfaced for human triage.
///
/// The engine only ever creates open findings. `status` is private and moves
/// exclusively through [`Finding::apply_review`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    pub id: String,
    pub unit_id: String,
    pub chunk_ids: Vec<String>,
    pub verdict: Verdict,
    pub severity: Severity,
    pub raw_confidence: f32,
    pub calibrated_confidence: f32,
    pub explanation: String,
    status: FindingStatus,
    pub source_location: SourceLocation,
}

impl Finding {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: String,
        unit_id: String,
        chunk_ids: Vec<String>,
        verdict: Verdict,
        severity: Severity,
        raw_confidence: f32,
        calibrated_confidence: f32,
        explanation: String,
        source_location: SourceLocation,
    ) -> Self {
        Self {
            id,
            unit_id,
            chunk_ids,
            verdict,
            severity,
            raw_confidence,
            calibrated_confidence,
            explanation,
            status: FindingStatus::Open,
            source_location,
        }
    }

    pub fn status(&self) -> FindingStatus {
        self.status
    }

    /// Apply a reviewer decision. Only open findings can be decided.
    pub fn apply_review(&mut self, decision: ReviewDecision) -> Result<FindingStatus> {
        if self.status != FindingStatus::Open {
            return Err(ProtocolError::InvalidTransition {
                from: self.status,
                decision,
            });
        }
        self.status = match decision {
            ReviewDecision::Confirm => FindingStatus::Confirmed,
            ReviewDecision::Dismiss => FindingStatus::Dismissed,
        };
        Ok(self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum UnevaluatedReason {
    NoRelevantSpecification,
    OracleUnavailable,
    OracleMalformedOutput,
    ExtractionFailed,
    Cancelled,
}

impl UnevaluatedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnevaluatedReason::NoRelevantSpecification => "no-relevant-specification",
            UnevaluatedReason::OracleUnavailable => "oracle-unavailable",
            UnevaluatedReason::OracleMalformedOutput => "oracle-malformed-output",
            UnevaluatedReason::ExtractionFailed => "extraction-failed",
            UnevaluatedReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UnevaluatedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit (or source file) that could not be judged, kept distinct from
/// units judged compliant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UnevaluatedUnit {
    /// Unit id, or the file path when extraction failed before units existed
    pub unit_id: String,
    pub source_location: SourceLocation,
    pub reason: UnevaluatedReason,
    pub verdict: Verdict,
    pub raw_confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl UnevaluatedUnit {
    pub fn new(
        unit_id: impl Into<String>,
        source_location: SourceLocation,
        reason: UnevaluatedReason,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            source_location,
            reason,
            verdict: Verdict::InsufficientEvidence,
            raw_confidence: 0.0,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
