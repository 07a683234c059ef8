//! Rule-based oracle.
//!
//! Reads the requirement sentences (must / shall / required) of the candidate
//! chunks, matches them against the state the unit writes and the calls it
//! makes, and checks whether the unit's preconditions and branch conditions
//! cover the guard a sentence demands. Deterministic, offline, and answers in
//! the same JSON schema a model would.

use crate::error::{OracleError, Result};
use crate::oracle::ReasoningOracle;
use crate::prompt::{PromptChunk, PromptEffect, StructuredPrompt};
use crate::response::OracleResponse;
use async_trait::async_trait;
use drift_protocol::{ReasoningStep, Severity, Verdict};
use drift_vector_store::tokenize;
use std::collections::BTreeSet;

const RECEIVERS: &[&str] = &["self", "this", "cls"];

const MODALS: &[&str] = &["must", "shall", "required", "mandatory"];

const GENERIC: &[&str] = &[
    "must", "shall", "should", "required", "mandatory", "not", "never", "been", "being", "was",
    "were", "its", "than", "then", "also", "may", "can", "will", "has", "have", "do", "doe",
];

/// Words that make a requirement conditional on a check
const GUARD_CUES: &[&str] = &[
    "if", "unless", "only", "before", "when", "whenever", "exceed", "least", "most", "greater",
    "less", "fewer", "sufficient", "insufficient", "enough", "reject", "rejected", "revert",
    "reverted", "check", "checked", "verify", "verified", "ensure", "validate", "validated",
    "valid", "invalid", "cover", "nonzero", "zero", "positive", "limit", "bound", "maximum",
    "minimum",
];

/// What the unit touches through one effect
struct Touch<'p> {
    effect: &'p PromptEffect,
    terms: BTreeSet<String>,
}

impl Touch<'_> {
    fn writes(&self) -> bool {
        self.effect.operation == "write"
    }

    fn calls(&self) -> bool {
        self.effect.operation == "call"
    }
}

#[derive(Default)]
struct Evidence {
    steps: Vec<ReasoningStep>,
    confidence: f32,
    severity: Option<Severity>,
}

impl Evidence {
    fn support(&mut self, step: ReasoningStep, confidence: f32) {
        self.steps.push(step);
        self.confidence = self.confidence.max(confidence);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOracle;

impl HeuristicOracle {
    pub fn new() -> Self {
        Self
    }

    pub fn judge(&self, prompt: &StructuredPrompt) -> OracleResponse {
        let unit = &prompt.unit;
        let touches: Vec<Touch<'_>> = unit
            .effects
            .iter()
            .filter(|effect| effect.operation != "branch")
            .map(|effect| Touch {
                effect,
                terms: terms_of(&effect.target),
            })
            .filter(|touch| !touch.terms.is_empty())
            .collect();

        let mut guard_terms: BTreeSet<String> = BTreeSet::new();
        for condition in &unit.preconditions {
            guard_terms.extend(terms_of(condition));
        }
        for effect in &unit.effects {
            if let Some(condition) = &effect.condition {
                guard_terms.extend(terms_of(condition));
            }
        }

        let mut preface = Vec::new();
        for touch in touches.iter().filter(|t| t.writes() || t.calls()) {
            let verb = if touch.writes() { "writes" } else { "calls" };
            let mut claim = format!("The unit {verb} `{}`", touch.effect.target);
            if touch.effect.unreachable {
                claim.push_str(" in unreachable code");
            }
            preface.push(ReasoningStep::new(claim, format!("effect:{}", touch.effect.index)));
        }
        if unit.preconditions.is_empty() {
            preface.push(ReasoningStep::new(
                "The unit checks no precondition before acting",
                "unit",
            ));
        }
        for (i, condition) in unit.preconditions.iter().enumerate() {
            preface.push(ReasoningStep::new(
                format!("The unit requires `{condition}`"),
                format!("precondition:{i}"),
            ));
        }

        let mut drift = Evidence::default();
        let mut compliant = Evidence::default();
        for chunk in &prompt.candidates {
            for sentence in requirement_sentences(&chunk.text) {
                self.assess(chunk, sentence, &touches, &guard_terms, &mut drift, &mut compliant);
            }
        }

        let (verdict, evidence) = if !drift.steps.is_empty() {
            (Verdict::Drift, drift)
        } else if !compliant.steps.is_empty() {
            (Verdict::Compliant, compliant)
        } else {
            let mut steps = preface;
            steps.push(ReasoningStep::new(
                "No excerpt states a requirement about what this unit touches",
                "unit",
            ));
            return OracleResponse {
                steps,
                verdict: Verdict::InsufficientEvidence,
                raw_confidence: 0.0,
                severity: None,
            };
        };

        let mut steps = preface;
        steps.extend(evidence.steps);
        steps.push(ReasoningStep::new(format!("Verdict: {verdict}"), "unit"));
        OracleResponse {
            steps,
            verdict,
            raw_confidence: evidence.confidence.clamp(0.0, 0.95),
            severity: evidence.severity,
        }
    }

    fn assess(
        &self,
        chunk: &PromptChunk,
        sentence: &str,
        touches: &[Touch<'_>],
        guard_terms: &BTreeSet<String>,
        drift: &mut Evidence,
        compliant: &mut Evidence,
    ) {
        let tokens: BTreeSet<String> = tokenize(sentence).into_iter().collect();
        let content: BTreeSet<String> = tokens
            .iter()
            .filter(|t| {
                !GENERIC.contains(&t.as_str())
                    && !GUARD_CUES.contains(&t.as_str())
                    && !RECEIVERS.contains(&t.as_str())
            })
            .cloned()
            .collect();

        let matched: Vec<&Touch<'_>> = touches
            .iter()
            .filter(|touch| !touch.terms.is_disjoint(&content))
            .collect();
        if matched.is_empty() {
            return;
        }
        let written: Vec<&Touch<'_>> = matched.iter().copied().filter(|t| t.writes()).collect();
        let acted = matched.iter().any(|t| t.writes() || t.calls());

        let lower = sentence.to_lowercase();
        let prohibits =
            lower.contains("must not") || lower.contains("shall not") || tokens.contains("never");
        let demands_guard = tokens.iter().any(|t| GUARD_CUES.contains(&t.as_str()));

        let trust = if chunk.forced_split { 0.9 } else { 1.0 };
        let dead = !written.is_empty() && written.iter().all(|t| t.effect.unreachable);
        let liveness = if dead { 0.5 } else { 1.0 };
        let cite = format!("chunk:{}", chunk.chunk_id);
        let quoted = sentence.trim();

        if demands_guard && !written.is_empty() {
            let touched: BTreeSet<String> = written.iter().flat_map(|t| t.terms.clone()).collect();
            let needed: BTreeSet<&String> = content.difference(&touched).collect();
            let covered = if needed.is_empty() {
                !guard_terms.is_empty()
            } else {
                needed.iter().any(|term| guard_terms.contains(*term))
            };
            if covered {
                compliant.support(
                    ReasoningStep::new(
                        format!("\"{quoted}\" demands a check the unit performs"),
                        cite,
                    ),
                    (0.45 + 0.35 * chunk.score) * trust,
                );
            } else {
                let missing: Vec<&str> = needed.iter().map(|t| t.as_str()).collect();
                drift.support(
                    ReasoningStep::new(
                        format!(
                            "\"{quoted}\" demands a check{} before the write; no precondition or branch of the unit performs it",
                            if missing.is_empty() {
                                String::new()
                            } else {
                                format!(" involving {}", missing.join(", "))
                            }
                        ),
                        cite,
                    ),
                    (0.55 + 0.35 * chunk.score) * trust * liveness,
                );
                if prohibits {
                    drift.severity = Some(Severity::Critical);
                }
            }
        } else if prohibits && !written.is_empty() {
            let unguarded = written.iter().any(|t| t.effect.condition.is_none());
            if unguarded && guard_terms.is_empty() {
                drift.support(
                    ReasoningStep::new(
                        format!("\"{quoted}\" forbids what the unit does unconditionally"),
                        cite,
                    ),
                    (0.55 + 0.35 * chunk.score) * trust * liveness,
                );
                drift.severity = Some(Severity::Critical);
            } else {
                compliant.support(
                    ReasoningStep::new(
                        format!("\"{quoted}\" forbids the write; the unit only writes under a guard"),
                        cite,
                    ),
                    (0.4 + 0.3 * chunk.score) * trust,
                );
            }
        } else if acted {
            compliant.support(
                ReasoningStep::new(format!("The unit does what \"{quoted}\" requires"), cite),
                (0.45 + 0.35 * chunk.score) * trust,
            );
        }
    }
}

#[async_trait]
impl ReasoningOracle for HeuristicOracle {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn reason(&self, prompt: &StructuredPrompt) -> Result<String> {
        serde_json::to_string(&self.judge(prompt)).map_err(|e| OracleError::malformed(e.to_string()))
    }
}

fn terms_of(text: &str) -> BTreeSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !RECEIVERS.contains(&t.as_str()))
        .collect()
}

/// Sentences of `text` that state a requirement.
fn requirement_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for line in text.lines() {
        let mut start = 0;
        let bytes = line.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            let ends = matches!(b, b'.' | b'!' | b'?' | b';')
                && bytes.get(i + 1).map_or(true, |next| next.is_ascii_whitespace());
            if ends {
                out.push(&line[start..=i]);
                start = i + 1;
            }
        }
        if start < line.len() {
            out.push(&line[start..]);
        }
    }
    out.into_iter()
        .filter(|sentence| {
            tokenize(sentence)
                .iter()
                .any(|t| MODALS.contains(&t.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{PromptUnit, PROMPT_SCHEMA_VERSION};
    use pretty_assertions::assert_eq;

    fn effect(index: usize, operation: &str, target: &str, unreachable: bool) -> PromptEffect {
        PromptEffect {
            index,
            operation: operation.into(),
            target_kind: "state-variable".into(),
            target: target.into(),
            condition: None,
            line: index + 1,
            unreachable,
        }
    }

    fn prompt(effects: Vec<PromptEffect>, preconditions: &[&str], chunks: &[&str]) -> StructuredPrompt {
        StructuredPrompt {
            schema_version: PROMPT_SCHEMA_VERSION,
            instructions: String::new(),
            strict: false,
            unit: PromptUnit {
                id: "vault.py::Vault.withdraw".into(),
                kind: "state-transition".into(),
                language: "python".into(),
                fork: "cancun".into(),
                location: "vault.py:2 (Vault.withdraw)".into(),
                effects,
                preconditions: preconditions.iter().map(|p| p.to_string()).collect(),
                calls: Vec::new(),
            },
            candidates: chunks
                .iter()
                .enumerate()
                .map(|(i, text)| PromptChunk {
                    chunk_id: format!("chunk-{i}"),
                    score: 0.6,
                    section: Vec::new(),
                    normative: true,
                    forced_split: false,
                    text: text.to_string(),
                })
                .collect(),
            response_schema: serde_json::Value::Null,
        }
    }

    const GUARDED_RULE: &str =
        "The balance MUST be checked to cover the requested amount before a withdrawal reduces it.";

    #[test]
    fn missing_guard_is_drift() {
        let response = HeuristicOracle.judge(&prompt(
            vec![effect(0, "write", "self.balance", false)],
            &[],
            &["Deposits are credited immediately.", GUARDED_RULE],
        ));
        assert_eq!(response.verdict, Verdict::Drift);
        assert!(response.raw_confidence > 0.5);
        let cited: Vec<&str> = response.steps.iter().filter_map(|s| s.cited_chunk()).collect();
        assert_eq!(cited, vec!["chunk-1"]);
    }

    #[test]
    fn covering_guard_is_compliant() {
        let response = HeuristicOracle.judge(&prompt(
            vec![
                effect(0, "read", "self.balance", false),
                effect(1, "write", "self.balance", false),
            ],
            &["not (self.balance < amount)"],
            &[GUARDED_RULE],
        ));
        assert_eq!(response.verdict, Verdict::Compliant);
    }

    #[test]
    fn unrelated_requirements_are_insufficient() {
        let response = HeuristicOracle.judge(&prompt(
            vec![effect(0, "write", "self.nonce", false)],
            &[],
            &["The base fee MUST be burned."],
        ));
        assert_eq!(response.verdict, Verdict::InsufficientEvidence);
        assert_eq!(response.raw_confidence, 0.0);
    }

    #[test]
    fn dead_writes_are_discounted() {
        let live = HeuristicOracle.judge(&prompt(
            vec![effect(0, "write", "self.balance", false)],
            &[],
            &[GUARDED_RULE],
        ));
        let dead = HeuristicOracle.judge(&prompt(
            vec![effect(0, "write", "self.balance", true)],
            &[],
            &[GUARDED_RULE],
        ));
        assert_eq!(dead.verdict, Verdict::Drift);
        assert!(dead.raw_confidence < live.raw_confidence);
    }

    #[test]
    fn prohibited_unconditional_write_is_critical() {
        let response = HeuristicOracle.judge(&prompt(
            vec![effect(0, "write", "self.genesis_root", false)],
            &[],
            &["The genesis root MUST NOT be modified after initialization."],
        ));
        assert_eq!(response.verdict, Verdict::Drift);
        assert_eq!(response.severity, Some(Severity::Critical));
    }

    #[test]
    fn sentences_split_on_terminators() {
        let sentences = requirement_sentences("Intro text. Fees MUST be burned; rest is optional.\nIt SHALL halt");
        assert_eq!(sentences, vec![" Fees MUST be burned;", "It SHALL halt"]);
    }
}
