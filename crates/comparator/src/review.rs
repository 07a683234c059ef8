use crate::calibration::CalibrationStore;
use crate::error::{ComparatorError, Result};
use drift_protocol::{Finding, FindingStatus, ReviewDecision};
use std::sync::Arc;

/// The human-review entry point.
///
/// Applies a reviewer's decision to a finding and feeds the outcome into the
/// calibration bucket the finding was scored from. The engine never calls this
/// on its own behalf.
#[derive(Debug, Clone)]
pub struct ReviewDesk {
    calibration: Arc<CalibrationStore>,
}

impl ReviewDesk {
    pub fn new(calibration: Arc<CalibrationStore>) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &Arc<CalibrationStore> {
        &self.calibration
    }

    /// `open → confirmed` or `open → dismissed`; anything else is rejected and
    /// leaves both the finding and calibration untouched.
    pub fn apply(&self, finding: &mut Finding, decision: ReviewDecision) -> Result<FindingStatus> {
        let status = finding.apply_review(decision)?;
        self.calibration
            .record(finding.verdict, finding.raw_confidence, decision);
        log::info!("Finding {} {status} by review", finding.id);
        Ok(status)
    }

    pub fn apply_by_id(
        &self,
        findings: &mut [Finding],
        finding_id: &str,
        decision: ReviewDecision,
    ) -> Result<FindingStatus> {
        let finding = findings
            .iter_mut()
            .find(|f| f.id == finding_id)
            .ok_or_else(|| ComparatorError::UnknownFinding(finding_id.to_string()))?;
        self.apply(finding, decision)
    }
}
