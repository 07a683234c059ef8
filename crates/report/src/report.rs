use crate::error::{ReportError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use drift_protocol::{stable_digest, Finding, Fork, Severity, UnevaluatedUnit, Verdict};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write as _;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Findings shown in the Markdown rendering; the JSON report keeps all
pub const MARKDOWN_FINDING_LIMIT: usize = 20;

/// Run context the report is stamped with
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub fork: Fork,
    pub commit: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// What a run produced, before ordering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub units_analyzed: usize,
    pub compliant: usize,
    pub findings: Vec<Finding>,
    pub unevaluated: Vec<UnevaluatedUnit>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReportSummary {
    pub units_analyzed: usize,
    pub compliant: usize,
    pub drift_findings: usize,
    pub insufficient_evidence_findings: usize,
    pub unevaluated: usize,
    pub cancelled: usize,
}

/// The report contract consumed by the CLI, bots and CI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Report {
    pub schema_version: u32,
    pub run_id: String,
    pub fork: Fork,
    pub commit: Option<String>,
    #[schemars(with = "String")]
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub findings: Vec<Finding>,
    pub unevaluated: Vec<UnevaluatedUnit>,
}

impl Report {
    /// Order, count and stamp a run's outcome. Pure: equal inputs give equal reports.
    pub fn generate(meta: RunMetadata, outcome: RunOutcome) -> Self {
        let mut findings = outcome.findings;
        sort_findings(&mut findings);
        let mut unevaluated = outcome.unevaluated;
        unevaluated.sort_by(|a, b| {
            a.source_location
                .cmp(&b.source_location)
                .then_with(|| a.unit_id.cmp(&b.unit_id))
        });

        let count = |verdict| findings.iter().filter(|f| f.verdict == verdict).count();
        let summary = ReportSummary {
            units_analyzed: outcome.units_analyzed,
            compliant: outcome.compliant,
            drift_findings: count(Verdict::Drift),
            insufficient_evidence_findings: count(Verdict::InsufficientEvidence),
            unevaluated: unevaluated.len(),
            cancelled: unevaluated
                .iter()
                .filter(|u| u.reason == drift_protocol::UnevaluatedReason::Cancelled)
                .count(),
        };

        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            run_id: run_id(&meta, &findings, &unevaluated),
            fork: meta.fork,
            commit: meta.commit,
            generated_at: meta.generated_at,
            summary,
            findings,
            unevaluated,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let report: Report = serde_json::from_str(data)?;
        if report.schema_version != REPORT_SCHEMA_VERSION {
            return Err(ReportError::SchemaVersion {
                found: report.schema_version,
                expected: REPORT_SCHEMA_VERSION,
            });
        }
        Ok(report)
    }

    pub fn finding_mut(&mut self, id: &str) -> Option<&mut Finding> {
        self.findings.iter_mut().find(|f| f.id == id)
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// One line for logs and CI status checks
    pub fn summary_line(&self) -> String {
        let s = &self.summary;
        format!(
            "drift {} on {}: {} findings ({} critical, {} warning, {} info), {} compliant, {} unevaluated of {} units",
            self.run_id,
            self.fork,
            self.findings.len(),
            self.count_by_severity(Severity::Critical),
            self.count_by_severity(Severity::Warning),
            self.count_by_severity(Severity::Info),
            s.compliant,
            s.unevaluated,
            s.units_analyzed
        )
    }

    /// PR-comment rendering: findings grouped by severity, capped at
    /// [`MARKDOWN_FINDING_LIMIT`], then the units that could not be evaluated.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("## Drift report\n\n");
        let _ = writeln!(md, "- Fork: `{}`", self.fork);
        let _ = writeln!(md, "- Commit: `{}`", self.commit.as_deref().unwrap_or("n/a"));
        let _ = writeln!(
            md,
            "- Generated: {}",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(md, "- Run: `{}`\n", self.run_id);
        let _ = writeln!(md, "{}\n", self.summary_line());

        if self.findings.is_empty() {
            md.push_str("No findings.\n\n");
        }
        let shown = &self.findings[..self.findings.len().min(MARKDOWN_FINDING_LIMIT)];
        for severity in [Severity::Critical, Severity::Warning, Severity::Info] {
            let group: Vec<&Finding> = shown.iter().filter(|f| f.severity == severity).collect();
            if group.is_empty() {
                continue;
            }
            let _ = writeln!(md, "### {} ({})\n", title(severity), group.len());
            for finding in group {
                let _ = writeln!(
                    md,
                    "- **`{}`** at `{}:{}` ({}, confidence {:.2}, {})",
                    finding.source_location.symbol,
                    finding.source_location.path,
                    finding.source_location.line_start,
                    finding.verdict,
                    finding.calibrated_confidence,
                    finding.id
                );
                let _ = writeln!(md, "  {}", one_line(&finding.explanation, 400));
                let chunks: Vec<String> = finding.chunk_ids.iter().map(|c| format!("`{c}`")).collect();
                let _ = writeln!(md, "  Chunks: {}", chunks.join(", "));
            }
            md.push('\n');
        }
        if self.findings.len() > shown.len() {
            let _ = writeln!(
                md,
                "_Showing {} of {} findings; see the JSON report for the rest._\n",
                shown.len(),
                self.findings.len()
            );
        }

        if !self.unevaluated.is_empty() {
            let _ = writeln!(md, "### Unevaluated units ({})\n", self.unevaluated.len());
            for unit in &self.unevaluated {
                let _ = write!(
                    md,
                    "- `{}` at `{}:{}`: {}",
                    unit.unit_id, unit.source_location.path, unit.source_location.line_start, unit.reason
                );
                if let Some(detail) = &unit.detail {
                    let _ = write!(md, " ({})", one_line(detail, 160));
                }
                md.push('\n');
            }
        }
        md
    }
}

/// Severity desc, calibrated confidence desc, source location, then id.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(compare_findings);
}

fn compare_findings(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| b.calibrated_confidence.total_cmp(&a.calibrated_confidence))
        .then_with(|| a.source_location.cmp(&b.source_location))
        .then_with(|| a.id.cmp(&b.id))
}

/// Derived from the run's content, so identical runs share an id.
fn run_id(meta: &RunMetadata, findings: &[Finding], unevaluated: &[UnevaluatedUnit]) -> String {
    let mut parts: Vec<String> = vec![
        meta.fork.to_string(),
        meta.commit.clone().unwrap_or_default(),
    ];
    parts.extend(findings.iter().map(|f| f.id.clone()));
    parts.extend(
        unevaluated
            .iter()
            .map(|u| format!("{}#{}", u.unit_id, u.reason)),
    );
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    format!("run-{}", stable_digest(&refs, 16))
}

fn title(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Critical",
        Severity::Warning => "Warning",
        Severity::Info => "Info",
    }
}

fn one_line(text: &str, max_chars: usize) -> String {
    let s = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.chars().count() <= max_chars {
        return s;
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{truncated}…")
}
