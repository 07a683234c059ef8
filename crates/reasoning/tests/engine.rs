use drift_protocol::{
    chunk_id, BehavioralUnit, Condition, Effect, EffectTarget, Fork, Operation, RetrievalResult,
    ScoredChunk, SourceLocation, SpecChunk, TextSpan, TraceResolution, UnitKind, Verdict,
};
use drift_reasoning::{
    HeuristicOracle, ReasoningEngine, ReasoningOracle, RetryPolicy, ScriptedOracle, ScriptedReply,
    StructuredPrompt,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const VALID: &str = r#"{"steps":[{"claim":"balance is reduced without a check","evidence_ref":"effect:1"}],"verdict":"drift","raw_confidence":0.8}"#;

fn unit(guarded: bool) -> BehavioralUnit {
    let mut preconditions = std::collections::BTreeSet::new();
    if guarded {
        preconditions.insert(Condition::new("self.balance >= amount"));
    }
    BehavioralUnit {
        id: "vault.py::Vault.withdraw".into(),
        source_location: SourceLocation {
            path: "vault.py".into(),
            line_start: 2,
            line_end: 6,
            symbol: "Vault.withdraw".into(),
        },
        kind: UnitKind::StateTransition,
        language: "python".into(),
        fork: Fork::default(),
        effects: vec![
            Effect::new(EffectTarget::StateVariable("self.balance".into()), Operation::Read, 3),
            Effect::new(EffectTarget::StateVariable("self.balance".into()), Operation::Write, 4),
            Effect::new(EffectTarget::ExternalCall("emit".into()), Operation::Call, 5),
        ],
        preconditions,
        calls: Default::default(),
    }
}

fn chunk(text: &str) -> SpecChunk {
    let fork = Fork::default();
    SpecChunk {
        id: chunk_id("vault-spec", &fork, text),
        document_id: "vault-spec".into(),
        fork_version: fork,
        text: text.into(),
        span: TextSpan::new(0, text.len()),
        topic_tags: Default::default(),
        forced_split: false,
        section: vec!["Withdrawals".into()],
        ordinal: 0,
    }
}

fn prompt(unit: &BehavioralUnit, chunks: &[SpecChunk]) -> StructuredPrompt {
    let retrieval = RetrievalResult {
        unit_id: unit.id.clone(),
        ranked: chunks
            .iter()
            .map(|c| ScoredChunk {
                chunk_id: c.id.clone(),
                score: 0.7,
            })
            .collect(),
    };
    StructuredPrompt::build(unit, &retrieval, |id| chunks.iter().find(|c| c.id == id))
}

fn withdrawal_rule() -> SpecChunk {
    chunk("The balance MUST be checked to cover the requested amount before a withdrawal reduces it.")
}

#[tokio::test(start_paused = true)]
async fn transient_outages_are_retried() {
    let oracle = Arc::new(ScriptedOracle::new(
        [ScriptedReply::Unavailable, ScriptedReply::Unavailable],
        ScriptedReply::Text(VALID.into()),
    ));
    let engine = ReasoningEngine::new(oracle.clone(), RetryPolicy::default());

    let trace = engine.reason(prompt(&unit(false), &[withdrawal_rule()]), 0).await;
    assert_eq!(trace.resolution, TraceResolution::Reasoned);
    assert_eq!(trace.verdict, Verdict::Drift);
    assert_eq!(oracle.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_yield_insufficient_evidence() {
    let oracle = Arc::new(ScriptedOracle::new([], ScriptedReply::Unavailable));
    let engine = ReasoningEngine::new(oracle.clone(), RetryPolicy::default());

    let started = tokio::time::Instant::now();
    let trace = engine.reason(prompt(&unit(false), &[withdrawal_rule()]), 0).await;
    assert_eq!(trace.resolution, TraceResolution::OracleUnavailable);
    assert_eq!(trace.verdict, Verdict::InsufficientEvidence);
    assert_eq!(trace.raw_confidence, 0.0);
    assert_eq!(oracle.calls(), 3);
    // 1s + 2s of backoff between the three attempts
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn slow_oracle_times_out_and_is_retried() {
    let oracle = Arc::new(ScriptedOracle::new(
        [ScriptedReply::Delayed(Duration::from_secs(60), VALID.into())],
        ScriptedReply::Text(VALID.into()),
    ));
    let engine = ReasoningEngine::new(oracle.clone(), RetryPolicy::default());

    let trace = engine.reason(prompt(&unit(false), &[withdrawal_rule()]), 0).await;
    assert_eq!(trace.resolution, TraceResolution::Reasoned);
    assert_eq!(oracle.calls(), 2);
}

#[tokio::test]
async fn malformed_twice_is_insufficient_evidence() {
    let oracle = Arc::new(ScriptedOracle::constant("I believe this drifts."));
    let engine = ReasoningEngine::new(oracle.clone(), RetryPolicy::default());

    let trace = engine.reason(prompt(&unit(false), &[withdrawal_rule()]), 0).await;
    assert_eq!(trace.resolution, TraceResolution::OracleMalformed);
    assert_eq!(trace.verdict, Verdict::InsufficientEvidence);

    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].strict);
    assert!(prompts[1].strict);
}

#[tokio::test]
async fn strict_retry_can_recover() {
    let oracle = Arc::new(ScriptedOracle::new(
        [ScriptedReply::Text("no json here".into())],
        ScriptedReply::Text(VALID.into()),
    ));
    let engine = ReasoningEngine::new(oracle.clone(), RetryPolicy::default());

    let trace = engine.reason(prompt(&unit(false), &[withdrawal_rule()]), 2).await;
    assert_eq!(trace.resolution, TraceResolution::Reasoned);
    assert_eq!(trace.sample, 2);
    assert_eq!(trace.steps[0].cited_effect(), Some(1));
}

#[tokio::test]
async fn no_candidates_skips_the_oracle() {
    let oracle = Arc::new(ScriptedOracle::constant(VALID));
    let engine = ReasoningEngine::new(oracle.clone(), RetryPolicy::default());

    let trace = engine.reason(prompt(&unit(false), &[]), 0).await;
    assert_eq!(trace.resolution, TraceResolution::NoCandidates);
    assert_eq!(trace.verdict, Verdict::InsufficientEvidence);
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn oracle_sees_effects_in_execution_order() {
    let oracle = Arc::new(ScriptedOracle::constant(VALID));
    let engine = ReasoningEngine::new(oracle.clone(), RetryPolicy::default());
    engine.reason(prompt(&unit(false), &[withdrawal_rule()]), 0).await;

    let seen = &oracle.prompts()[0];
    let order: Vec<(usize, &str)> = seen
        .unit
        .effects
        .iter()
        .map(|e| (e.line, e.operation.as_str()))
        .collect();
    assert_eq!(order, vec![(3, "read"), (4, "write"), (5, "call")]);
}

#[tokio::test]
async fn heuristic_oracle_flags_the_missing_guard() {
    let engine = ReasoningEngine::new(Arc::new(HeuristicOracle::new()), RetryPolicy::default());
    let rule = withdrawal_rule();

    let drift = engine.reason(prompt(&unit(false), &[rule.clone()]), 0).await;
    assert_eq!(drift.verdict, Verdict::Drift);
    assert_eq!(drift.cited_chunk_ids(), vec![rule.id.clone()]);

    let compliant = engine.reason(prompt(&unit(true), &[rule]), 0).await;
    assert_eq!(compliant.verdict, Verdict::Compliant);
    assert!(HeuristicOracle::new().name() == "heuristic");
}
