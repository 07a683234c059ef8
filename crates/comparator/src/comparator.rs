use crate::calibration::CalibrationStore;
use drift_protocol::{
    stable_digest, BehavioralUnit, Finding, Operation, ReasoningTrace, Severity, SpecChunk,
    TraceResolution, UnevaluatedReason, UnevaluatedUnit, Verdict,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Calibrated confidence at which a normative drift becomes critical
pub const CRITICAL_CONFIDENCE: f32 = 0.8;

/// How traces that disagree on one unit are resolved
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DisagreementPolicy {
    /// Always surface disagreement as an insufficient-evidence finding
    #[default]
    Surface,
    /// Keep the leading verdict when it holds at least `min_share` of the
    /// reasoned samples; surface otherwise
    Majority { min_share: f32 },
}

/// Outcome of comparing every trace of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Comparison {
    pub findings: Vec<Finding>,
    /// Units every reasoned trace judged compliant
    pub compliant: Vec<String>,
    pub unevaluated: Vec<UnevaluatedUnit>,
}

/// Merges reasoning traces into findings.
pub struct Comparator {
    calibration: Arc<CalibrationStore>,
    policy: DisagreementPolicy,
}

impl Comparator {
    pub fn new(calibration: Arc<CalibrationStore>, policy: DisagreementPolicy) -> Self {
        Self {
            calibration,
            policy,
        }
    }

    pub fn policy(&self) -> DisagreementPolicy {
        self.policy
    }

    /// Compare all traces of a run.
    ///
    /// `units` must hold every unit a trace refers to and `lookup` resolves the
    /// chunks of the snapshot the run reasoned against. Traces naming a unit or
    /// chunk that does not exist never become findings.
    pub fn compare<'a>(
        &self,
        traces: &[ReasoningTrace],
        units: &BTreeMap<String, BehavioralUnit>,
        lookup: impl Fn(&str) -> Option<&'a SpecChunk>,
    ) -> Comparison {
        let mut by_unit: BTreeMap<&str, Vec<&ReasoningTrace>> = BTreeMap::new();
        for trace in traces {
            by_unit.entry(trace.unit_id.as_str()).or_default().push(trace);
        }

        let mut out = Comparison::default();
        for (unit_id, traces) in by_unit {
            let Some(unit) = units.get(unit_id) else {
                log::warn!("Skipping traces for unknown unit {unit_id}");
                continue;
            };

            let reasoned: Vec<&ReasoningTrace> = traces
                .iter()
                .copied()
                .filter(|t| t.resolution == TraceResolution::Reasoned)
                .collect();
            if reasoned.is_empty() {
                out.unevaluated.push(unevaluated(unit, &traces));
                continue;
            }

            let mut counts: BTreeMap<Verdict, usize> = BTreeMap::new();
            for trace in &reasoned {
                *counts.entry(trace.verdict).or_default() += 1;
            }
            let verdict = match self.settle(&counts, reasoned.len()) {
                Some(verdict) => verdict,
                None => {
                    if let Some(finding) = self.disagreement(unit, &reasoned, &counts, &lookup) {
                        out.findings.push(finding);
                    }
                    continue;
                }
            };

            match verdict {
                Verdict::Compliant => out.compliant.push(unit.id.clone()),
                Verdict::InsufficientEvidence => out.unevaluated.push(
                    UnevaluatedUnit::new(
                        &unit.id,
                        unit.source_location.clone(),
                        UnevaluatedReason::NoRelevantSpecification,
                    )
                    .with_detail("no candidate chunk discusses this behavior"),
                ),
                Verdict::Drift => {
                    let drifts: Vec<&ReasoningTrace> = reasoned
                        .iter()
                        .copied()
                        .filter(|t| t.verdict == Verdict::Drift)
                        .collect();
                    out.findings.extend(self.drift_findings(unit, &drifts, &lookup));
                }
            }
        }
        log::info!(
            "Compared traces: {} findings, {} compliant, {} unevaluated",
            out.findings.len(),
            out.compliant.len(),
            out.unevaluated.len()
        );
        out
    }

    /// The verdict the samples agree on, if the policy accepts one
    fn settle(&self, counts: &BTreeMap<Verdict, usize>, total: usize) -> Option<Verdict> {
        if counts.len() == 1 {
            return counts.keys().next().copied();
        }
        match self.policy {
            DisagreementPolicy::Surface => None,
            DisagreementPolicy::Majority { min_share } => {
                let (verdict, count) = counts.iter().max_by_key(|(v, c)| (**c, std::cmp::Reverse(**v)))?;
                let share = *count as f32 / total.max(1) as f32;
                (share >= min_share).then_some(*verdict)
            }
        }
    }

    /// Drift traces with overlapping chunk citations collapse into one finding.
    fn drift_findings<'a>(
        &self,
        unit: &BehavioralUnit,
        traces: &[&ReasoningTrace],
        lookup: &impl Fn(&str) -> Option<&'a SpecChunk>,
    ) -> Vec<Finding> {
        let cited: Vec<Vec<String>> = traces
            .iter()
            .map(|t| existing_chunks(&t.cited_chunk_ids(), lookup))
            .collect();

        let mut groups = DisjointSet::new(traces.len());
        for i in 0..traces.len() {
            for j in (i + 1)..traces.len() {
                if cited[i].iter().any(|id| cited[j].contains(id)) {
                    groups.union(i, j);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..traces.len() {
            components.entry(groups.find(i)).or_default().push(i);
        }

        let mut findings = Vec::new();
        for members in components.values() {
            let mut chunk_ids: Vec<String> = Vec::new();
            for &i in members {
                for id in &cited[i] {
                    if !chunk_ids.contains(id) {
                        chunk_ids.push(id.clone());
                    }
                }
            }
            if chunk_ids.is_empty() {
                log::warn!("{}: drift trace cites no known chunk; skipped", unit.id);
                continue;
            }

            let Some(lead) = members
                .iter()
                .map(|&i| traces[i])
                .max_by(|a, b| a.raw_confidence.total_cmp(&b.raw_confidence))
            else {
                continue;
            };
            let raw = lead.raw_confidence;
            let calibrated = self.calibration.calibrate(Verdict::Drift, raw);
            let normative = chunk_ids
                .iter()
                .filter_map(|id| lookup(id.as_str()))
                .any(|chunk| chunk.is_normative());
            let hint = members.iter().filter_map(|&i| traces[i].severity_hint).max();
            let severity = drift_severity(unit, lead, calibrated, normative, hint);

            findings.push(Finding::open(
                finding_id(&unit.id, Verdict::Drift, &chunk_ids),
                unit.id.clone(),
                chunk_ids.clone(),
                Verdict::Drift,
                severity,
                raw,
                calibrated,
                explain(unit, Verdict::Drift, lead, &chunk_ids, members.len()),
                unit.source_location.clone(),
            ));
        }
        findings
    }

    fn disagreement<'a>(
        &self,
        unit: &BehavioralUnit,
        traces: &[&ReasoningTrace],
        counts: &BTreeMap<Verdict, usize>,
        lookup: &impl Fn(&str) -> Option<&'a SpecChunk>,
    ) -> Option<Finding> {
        let mut considered: Vec<String> = Vec::new();
        for trace in traces {
            for id in trace.cited_chunk_ids() {
                if !considered.contains(&id) {
                    considered.push(id);
                }
            }
        }
        let chunk_ids = existing_chunks(&considered, lookup);
        if chunk_ids.is_empty() {
            log::warn!("{}: disagreeing traces cite no known chunk; skipped", unit.id);
            return None;
        }

        let raw = traces
            .iter()
            .map(|t| t.raw_confidence)
            .fold(0.0_f32, f32::max);
        let calibrated = self.calibration.calibrate(Verdict::InsufficientEvidence, raw);
        let tally: Vec<String> = counts
            .iter()
            .map(|(verdict, count)| format!("{count} {verdict}"))
            .collect();
        let explanation = format!(
            "Reasoning passes disagree on `{}` at {} ({}); needs human review against {}.",
            unit.source_location.symbol,
            unit.source_location,
            tally.join(", "),
            chunk_ids.join(", ")
        );
        log::warn!("{}: reasoning passes disagree ({})", unit.id, tally.join(", "));

        Some(Finding::open(
            finding_id(&unit.id, Verdict::InsufficientEvidence, &chunk_ids),
            unit.id.clone(),
            chunk_ids,
            Verdict::InsufficientEvidence,
            Severity::Info,
            raw,
            calibrated,
            explanation,
            unit.source_location.clone(),
        ))
    }
}

fn unevaluated(unit: &BehavioralUnit, traces: &[&ReasoningTrace]) -> UnevaluatedUnit {
    let has = |resolution| traces.iter().any(|t| t.resolution == resolution);
    let reason = if has(TraceResolution::OracleUnavailable) {
        UnevaluatedReason::OracleUnavailable
    } else if has(TraceResolution::OracleMalformed) {
        UnevaluatedReason::OracleMalformedOutput
    } else {
        UnevaluatedReason::NoRelevantSpecification
    };
    let detail = traces
        .iter()
        .find_map(|t| t.steps.first())
        .map(|step| step.claim.clone());
    let entry = UnevaluatedUnit::new(&unit.id, unit.source_location.clone(), reason);
    match detail {
        Some(detail) => entry.with_detail(detail),
        None => entry,
    }
}

fn existing_chunks<'a>(
    ids: &[String],
    lookup: &impl Fn(&str) -> Option<&'a SpecChunk>,
) -> Vec<String> {
    ids.iter().filter(|id| lookup(id.as_str()).is_some()).cloned().collect()
}

/// Severity of a drift finding.
///
/// Side-effecting units drift at `warning`, or `critical` when the calibrated
/// confidence reaches [`CRITICAL_CONFIDENCE`] against a normative chunk.
/// Read-only units drift at `info`. The oracle's hint only raises. Dead
/// supporting effects cap everything at `info`.
pub fn drift_severity(
    unit: &BehavioralUnit,
    trace: &ReasoningTrace,
    calibrated: f32,
    normative: bool,
    hint: Option<Severity>,
) -> Severity {
    let base = if unit.has_side_effects() {
        if calibrated >= CRITICAL_CONFIDENCE && normative {
            Severity::Critical
        } else {
            Severity::Warning
        }
    } else {
        Severity::Info
    };
    let raised = hint.map_or(base, |hint| base.max(hint));
    if supporting_effects_unreachable(unit, trace) {
        Severity::Info
    } else {
        raised
    }
}

/// Cited side effects when the trace cites any, otherwise all of the unit's.
fn supporting_effects_unreachable(unit: &BehavioralUnit, trace: &ReasoningTrace) -> bool {
    let cited: BTreeSet<usize> = trace.steps.iter().filter_map(|s| s.cited_effect()).collect();
    let supporting: Vec<bool> = unit
        .effects
        .iter()
        .enumerate()
        .filter(|(i, effect)| {
            cited.contains(i) && matches!(effect.operation, Operation::Write | Operation::Call)
        })
        .map(|(_, effect)| effect.unreachable)
        .collect();
    if supporting.is_empty() {
        unit.side_effects_unreachable()
    } else {
        supporting.iter().all(|dead| *dead)
    }
}

fn finding_id(unit_id: &str, verdict: Verdict, chunk_ids: &[String]) -> String {
    let mut sorted: Vec<&str> = chunk_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut parts = vec![unit_id, verdict.as_str()];
    parts.extend(sorted);
    format!("F-{}", stable_digest(&parts, 12))
}

fn explain(
    unit: &BehavioralUnit,
    verdict: Verdict,
    lead: &ReasoningTrace,
    chunk_ids: &[String],
    merged: usize,
) -> String {
    let claims: Vec<&str> = lead
        .steps
        .iter()
        .filter(|s| s.cited_chunk().is_some())
        .map(|s| s.claim.trim())
        .collect();
    let mut text = format!(
        "`{}` at {} shows {} against {}.",
        unit.source_location.symbol,
        unit.source_location,
        verdict,
        chunk_ids.join(", ")
    );
    for claim in claims {
        text.push(' ');
        text.push_str(claim);
        if !claim.ends_with('.') {
            text.push('.');
        }
    }
    if merged > 1 {
        text.push_str(&format!(" Agreed by {merged} reasoning passes."));
    }
    text
}

/// Union-find over trace indexes
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
