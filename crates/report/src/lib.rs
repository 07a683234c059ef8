//! # Drift Report
//!
//! Serializes a run's findings into the report contract:
//!
//! ```text
//! { schema_version, run_id, fork, commit, generated_at,
//!   summary: { units_analyzed, compliant, drift_findings, ... },
//!   findings: [Finding...],        // severity desc, confidence desc, location
//!   unevaluated: [{unit_id, source_location, reason, ...}] }
//! ```
//!
//! plus a Markdown PR comment and a one-line summary. Generation is a pure
//! transform; two runs with the same inputs produce byte-identical JSON.

mod error;
mod report;

pub use error::{ReportError, Result};
pub use report::{
    sort_findings, Report, ReportSummary, RunMetadata, RunOutcome, MARKDOWN_FINDING_LIMIT,
    REPORT_SCHEMA_VERSION,
};
