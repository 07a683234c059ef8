//! # Drift Comparator
//!
//! Turns the reasoning traces of one run into deduplicated findings with a
//! severity and a calibrated confidence, and owns the human-review transitions
//! that feed calibration.
//!
//! ```text
//! ReasoningTrace*  ──>  group by unit  ──>  agree?  ──drift──>  merge overlapping ──> Finding
//!                                            │                     (max confidence)
//!                                            └─ disagree ──> policy ──> insufficient-evidence Finding
//!
//! ReviewDesk::apply  ──>  Finding.status  +  CalibrationStore bucket
//! ```
//!
//! Calibration is per verdict × raw-confidence decile:
//! `calibrated = (1 - w)·raw + w·accuracy` with `w = n / (n + 10)`.

mod calibration;
mod comparator;
mod error;
mod review;

pub use calibration::{BucketKey, BucketStats, CalibrationStore, DECILES, HISTORY_WEIGHT};
pub use comparator::{
    drift_severity, Comparator, Comparison, DisagreementPolicy, CRITICAL_CONFIDENCE,
};
pub use error::{ComparatorError, Result};
pub use review::ReviewDesk;
