//! Prompt construction contract.
//!
//! Every prompt carries the unit's effects in execution order with their
//! `unreachable` flags, and every candidate chunk with its `forced_split`
//! flag. Oracles may rely on these fields being present.

use crate::response::response_schema;
use drift_protocol::{BehavioralUnit, EffectTarget, RetrievalResult, SpecChunk};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

pub const PROMPT_SCHEMA_VERSION: u32 = 1;

const INSTRUCTIONS: &str = "You compare the behavior of one code unit against protocol specification \
excerpts. Reason step by step. Each step makes one claim and cites its evidence as \
`chunk:<id>`, `effect:<index>`, `precondition:<index>`, `call:<callee>` or `unit`. \
Effects marked unreachable sit in dead code; excerpts marked forced_split were cut \
mid-text; discount both. Verdict `compliant` if the behavior satisfies the excerpts, \
`drift` if it diverges, `insufficient-evidence` if no excerpt discusses this behavior.";

const STRICT_INSTRUCTIONS: &str = "Your previous answer could not be parsed. Respond with \
exactly one JSON object matching `response_schema` and nothing else: no prose, no code \
fences. `verdict` is one of compliant, drift, insufficient-evidence; `raw_confidence` is \
a number between 0 and 1; `steps` is a non-empty array of {claim, evidence_ref}.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PromptEffect {
    /// Position in execution order
    pub index: usize,
    pub operation: String,
    pub target_kind: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub line: usize,
    pub unreachable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PromptCall {
    pub callee: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    pub opaque: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PromptUnit {
    pub id: String,
    pub kind: String,
    pub language: String,
    pub fork: String,
    pub location: String,
    pub effects: Vec<PromptEffect>,
    pub preconditions: Vec<String>,
    pub calls: Vec<PromptCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PromptChunk {
    pub chunk_id: String,
    pub score: f32,
    pub section: Vec<String>,
    pub normative: bool,
    pub forced_split: bool,
    pub text: String,
}

/// Everything the oracle sees for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredPrompt {
    pub schema_version: u32,
    pub instructions: String,
    /// Set on the single retry after a malformed answer
    pub strict: bool,
    pub unit: PromptUnit,
    /// Candidate chunks, best first
    pub candidates: Vec<PromptChunk>,
    pub response_schema: serde_json::Value,
}

impl StructuredPrompt {
    /// Build the prompt for `unit`. Chunks `lookup` cannot resolve are left out.
    pub fn build<'a>(
        unit: &BehavioralUnit,
        retrieval: &RetrievalResult,
        lookup: impl Fn(&str) -> Option<&'a SpecChunk>,
    ) -> Self {
        let effects = unit
            .effects
            .iter()
            .enumerate()
            .map(|(index, effect)| PromptEffect {
                index,
                operation: effect.operation.as_str().to_string(),
                target_kind: match effect.target {
                    EffectTarget::StateVariable(_) => "state-variable",
                    EffectTarget::Memory(_) => "memory",
                    EffectTarget::ExternalCall(_) => "external-call",
                }
                .to_string(),
                target: effect.target.name().to_string(),
                condition: effect.condition.as_ref().map(|c| c.as_str().to_string()),
                line: effect.line,
                unreachable: effect.unreachable,
            })
            .collect();

        let candidates = retrieval
            .ranked
            .iter()
            .filter_map(|scored| {
                let chunk = lookup(&scored.chunk_id)?;
                Some(PromptChunk {
                    chunk_id: chunk.id.clone(),
                    score: scored.score,
                    section: chunk.section.clone(),
                    normative: chunk.is_normative(),
                    forced_split: chunk.forced_split,
                    text: chunk.text.clone(),
                })
            })
            .collect();

        Self {
            schema_version: PROMPT_SCHEMA_VERSION,
            instructions: INSTRUCTIONS.to_string(),
            strict: false,
            unit: PromptUnit {
                id: unit.id.clone(),
                kind: unit.kind.as_str().to_string(),
                language: unit.language.clone(),
                fork: unit.fork.to_string(),
                location: unit.source_location.to_string(),
                effects,
                preconditions: unit
                    .preconditions
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
                calls: unit
                    .calls
                    .iter()
                    .map(|call| PromptCall {
                        callee: call.callee.clone(),
                        resolved: call.resolved.clone(),
                        opaque: call.opaque,
                    })
                    .collect(),
            },
            candidates,
            response_schema: response_schema(),
        }
    }

    /// Same content, stricter output instructions
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self.instructions = format!("{INSTRUCTIONS}\n\n{STRICT_INSTRUCTIONS}");
        self
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.chunk_id.clone()).collect()
    }

    /// Plain-text rendering for text-only model endpoints
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}\n", self.instructions);

        let unit = &self.unit;
        let _ = writeln!(out, "## Unit `{}` ({}, {})", unit.id, unit.kind, unit.language);
        let _ = writeln!(out, "Location: {}; fork: {}\n", unit.location, unit.fork);
        let _ = writeln!(out, "### Effects (execution order)");
        for effect in &unit.effects {
            let _ = write!(
                out,
                "- effect:{} {} {} `{}` (line {})",
                effect.index, effect.operation, effect.target_kind, effect.target, effect.line
            );
            if let Some(condition) = &effect.condition {
                let _ = write!(out, " when `{condition}`");
            }
            if effect.unreachable {
                out.push_str(" [unreachable]");
            }
            out.push('\n');
        }
        if !unit.preconditions.is_empty() {
            let _ = writeln!(out, "\n### Preconditions");
            for (i, condition) in unit.preconditions.iter().enumerate() {
                let _ = writeln!(out, "- precondition:{i} `{condition}`");
            }
        }
        if !unit.calls.is_empty() {
            let _ = writeln!(out, "\n### External calls");
            for call in &unit.calls {
                let _ = match &call.resolved {
                    Some(target) => writeln!(out, "- call:{} → {target}", call.callee),
                    None => writeln!(out, "- call:{} (opaque)", call.callee),
                };
            }
        }

        let _ = writeln!(out, "\n## Specification excerpts");
        for chunk in &self.candidates {
            let _ = write!(out, "\n### chunk:{} (relevance {:.2}", chunk.chunk_id, chunk.score);
            if chunk.normative {
                out.push_str(", normative");
            }
            if chunk.forced_split {
                out.push_str(", forced_split");
            }
            out.push_str(")\n");
            if !chunk.section.is_empty() {
                let _ = writeln!(out, "Section: {}", chunk.section.join(" > "));
            }
            let _ = writeln!(out, "{}", chunk.text);
        }

        let _ = writeln!(
            out,
            "\n## Response schema\n{}",
            serde_json::to_string(&self.response_schema).unwrap_or_default()
        );
        out
    }
}
