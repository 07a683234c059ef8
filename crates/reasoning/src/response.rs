//! Response schema and parsing.
//!
//! Oracles answer with free text that must contain one JSON object of the
//! shape [`OracleResponse`]. Models like to wrap JSON in code fences or prose
//! and to use near-miss field names; both are tolerated. Anything that does
//! not yield a verdict, a confidence in `[0, 1]` and at least one step is
//! malformed.

use crate::error::{OracleError, Result};
use drift_protocol::{ReasoningStep, Severity, Verdict};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parsed oracle answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OracleResponse {
    pub steps: Vec<ReasoningStep>,
    pub verdict: Verdict,
    pub raw_confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// JSON schema oracles must answer with
pub fn response_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(OracleResponse)).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct LenientStep {
    #[serde(alias = "step", alias = "thought", alias = "statement")]
    claim: Option<String>,
    #[serde(alias = "evidence", alias = "ref", alias = "citation")]
    evidence_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepEntry {
    Text(String),
    Structured(LenientStep),
}

#[derive(Debug, Deserialize)]
struct LenientResponse {
    #[serde(default, alias = "chain_of_thought", alias = "reasoning_steps")]
    steps: Option<Vec<StepEntry>>,
    #[serde(default, alias = "reasoning", alias = "reasoning_trace")]
    rationale: Option<String>,
    #[serde(default, alias = "status", alias = "outcome")]
    verdict: Option<String>,
    #[serde(default, alias = "confidence")]
    raw_confidence: Option<f64>,
    #[serde(default, alias = "severity_hint")]
    severity: Option<String>,
}

/// Extract and validate a response from raw oracle output.
pub fn parse_response(raw: &str) -> Result<OracleResponse> {
    let candidates = json_candidates(raw);
    if candidates.is_empty() {
        return Err(OracleError::malformed("no JSON object in oracle output"));
    }
    let mut last_error = String::new();
    for candidate in candidates {
        match serde_json::from_str::<LenientResponse>(candidate) {
            Ok(lenient) => match validate(lenient) {
                Ok(response) => return Ok(response),
                Err(err) => last_error = err,
            },
            Err(err) => last_error = err.to_string(),
        }
    }
    Err(OracleError::malformed(last_error))
}

fn validate(lenient: LenientResponse) -> std::result::Result<OracleResponse, String> {
    let verdict_text = lenient.verdict.ok_or("missing verdict")?;
    let verdict =
        Verdict::parse(&verdict_text).ok_or_else(|| format!("unknown verdict {verdict_text:?}"))?;

    let confidence = lenient.raw_confidence.ok_or("missing raw_confidence")?;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(format!("raw_confidence {confidence} outside [0, 1]"));
    }

    let mut steps: Vec<ReasoningStep> = lenient
        .steps
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| match entry {
            StepEntry::Text(claim) => Some(ReasoningStep::new(claim, "unit")),
            StepEntry::Structured(step) => {
                let claim = step.claim?;
                Some(ReasoningStep::new(
                    claim,
                    step.evidence_ref.unwrap_or_else(|| "unit".to_string()),
                ))
            }
        })
        .filter(|step| !step.claim.trim().is_empty())
        .collect();
    if steps.is_empty() {
        if let Some(rationale) = lenient.rationale {
            steps = rationale
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| ReasoningStep::new(line, "unit"))
                .collect();
        }
    }
    if steps.is_empty() {
        return Err("no reasoning steps".to_string());
    }

    Ok(OracleResponse {
        steps,
        verdict,
        raw_confidence: confidence as f32,
        severity: lenient.severity.as_deref().and_then(Severity::parse),
    })
}

/// Fenced blocks first, then every top-level brace-balanced object.
fn json_candidates(raw: &str) -> Vec<&str> {
    let mut out = Vec::new();

    let mut rest = raw;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let Some(close) = after[body_start..].find("```") else {
            break;
        };
        let body = after[body_start..body_start + close].trim();
        if body.starts_with('{') {
            out.push(body);
        }
        rest = &after[body_start + close + 3..];
    }

    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        out.push(&raw[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    out
}
