//! Historical-accuracy calibration.
//!
//! Buckets are keyed by verdict × raw-confidence decile and live in a fixed
//! arena, one lock per bucket. Review outcomes update exactly one bucket under
//! its lock; calibration reads a consistent copy of it.

use crate::error::Result;
use drift_protocol::{ReviewDecision, Verdict};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

pub const DECILES: usize = 10;

/// Pseudo-count of reviews at which history and raw score weigh equally
pub const HISTORY_WEIGHT: f32 = 10.0;

const CALIBRATION_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub verdict: Verdict,
    pub decile: u8,
}

impl BucketKey {
    pub fn of(verdict: Verdict, raw_confidence: f32) -> Self {
        let raw = if raw_confidence.is_finite() {
            raw_confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let decile = ((raw * DECILES as f32).floor() as usize).min(DECILES - 1);
        Self {
            verdict,
            decile: decile as u8,
        }
    }

    fn slot(self) -> usize {
        let verdict = Verdict::ALL
            .iter()
            .position(|v| *v == self.verdict)
            .unwrap_or(0);
        verdict * DECILES + usize::from(self.decile).min(DECILES - 1)
    }
}

/// Review outcomes observed for one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    pub confirmed: u32,
    pub dismissed: u32,
}

impl BucketStats {
    pub fn reviewed(&self) -> u32 {
        self.confirmed + self.dismissed
    }

    /// Beta(1,1)-smoothed share of confirmed findings
    pub fn accuracy(&self) -> f32 {
        (self.confirmed as f32 + 1.0) / (self.reviewed() as f32 + 2.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BucketRecord {
    #[serde(flatten)]
    key: BucketKey,
    #[serde(flatten)]
    stats: BucketStats,
}

#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    version: u32,
    buckets: Vec<BucketRecord>,
}

/// Injectable, process-wide calibration state.
#[derive(Debug)]
pub struct CalibrationStore {
    buckets: Vec<Mutex<BucketStats>>,
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self {
            buckets: (0..Verdict::ALL.len() * DECILES)
                .map(|_| Mutex::new(BucketStats::default()))
                .collect(),
        }
    }

    pub fn stats(&self, key: BucketKey) -> BucketStats {
        *self.buckets[key.slot()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blend `raw_confidence` with the bucket's accuracy.
    ///
    /// `w = n / (n + 10)`, `calibrated = (1 - w)·raw + w·accuracy`. Identity for
    /// buckets without reviews. Non-decreasing in `raw_confidence` for a fixed
    /// bucket since `1 - w > 0`.
    pub fn calibrate(&self, verdict: Verdict, raw_confidence: f32) -> f32 {
        let raw = if raw_confidence.is_finite() {
            raw_confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let stats = self.stats(BucketKey::of(verdict, raw));
        let n = stats.reviewed() as f32;
        if n == 0.0 {
            return raw;
        }
        let w = n / (n + HISTORY_WEIGHT);
        ((1.0 - w) * raw + w * stats.accuracy()).clamp(0.0, 1.0)
    }

    /// Fold one review outcome into its bucket.
    pub fn record(&self, verdict: Verdict, raw_confidence: f32, decision: ReviewDecision) {
        let key = BucketKey::of(verdict, raw_confidence);
        let mut stats = self.buckets[key.slot()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match decision {
            ReviewDecision::Confirm => stats.confirmed += 1,
            ReviewDecision::Dismiss => stats.dismissed += 1,
        }
        log::debug!(
            "Calibration bucket {}:{} now {}/{} confirmed",
            key.verdict,
            key.decile,
            stats.confirmed,
            stats.reviewed()
        );
    }

    /// Buckets with at least one review, in key order
    pub fn snapshot(&self) -> Vec<(BucketKey, BucketStats)> {
        let mut out = Vec::new();
        for verdict in Verdict::ALL {
            for decile in 0..DECILES as u8 {
                let key = BucketKey { verdict, decile };
                let stats = self.stats(key);
                if stats.reviewed() > 0 {
                    out.push((key, stats));
                }
            }
        }
        out
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = CalibrationFile {
            version: CALIBRATION_VERSION,
            buckets: self
                .snapshot()
                .into_iter()
                .map(|(key, stats)| BucketRecord { key, stats })
                .collect(),
        };
        let data = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        log::debug!("Saved {} calibration buckets to {}", file.buckets.len(), path.display());
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref()).await?;
        let file: CalibrationFile = serde_json::from_str(&data)?;
        let store = Self::new();
        for record in file.buckets {
            if usize::from(record.key.decile) >= DECILES {
                log::warn!("Ignoring calibration bucket with decile {}", record.key.decile);
                continue;
            }
            *store.buckets[record.key.slot()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = record.stats;
        }
        Ok(store)
    }

    /// Load when the file exists, otherwise start without history.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn buckets_by_decile() {
        assert_eq!(BucketKey::of(Verdict::Drift, 0.0).decile, 0);
        assert_eq!(BucketKey::of(Verdict::Drift, 0.79).decile, 7);
        assert_eq!(BucketKey::of(Verdict::Drift, 1.0).decile, 9);
        assert_eq!(BucketKey::of(Verdict::Drift, f32::NAN).decile, 0);
    }

    #[test]
    fn no_history_is_identity() {
        let store = CalibrationStore::new();
        assert_eq!(store.calibrate(Verdict::Drift, 0.73), 0.73);
    }

    #[test]
    fn dismissals_pull_confidence_down() {
        let store = CalibrationStore::new();
        for _ in 0..10 {
            store.record(Verdict::Drift, 0.85, ReviewDecision::Dismiss);
        }
        let calibrated = store.calibrate(Verdict::Drift, 0.85);
        // w = 0.5, accuracy = 1/12
        assert!((calibrated - (0.5 * 0.85 + 0.5 / 12.0)).abs() < 1e-6);
        // other buckets untouched
        assert_eq!(store.calibrate(Verdict::Drift, 0.55), 0.55);
    }

    #[test]
    fn calibration_is_monotonic_within_a_bucket() {
        let store = CalibrationStore::new();
        for i in 0..7 {
            let decision = if i % 3 == 0 {
                ReviewDecision::Confirm
            } else {
                ReviewDecision::Dismiss
            };
            store.record(Verdict::Drift, 0.65, decision);
        }
        let mut previous = 0.0;
        for step in 60..70 {
            let raw = step as f32 / 100.0;
            let calibrated = store.calibrate(Verdict::Drift, raw);
            assert!(calibrated >= previous, "{raw} -> {calibrated} < {previous}");
            previous = calibrated;
        }
    }

    #[test]
    fn concurrent_reviews_are_not_lost() {
        let store = Arc::new(CalibrationStore::new());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let store = store.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        store.record(Verdict::Drift, 0.9, ReviewDecision::Confirm);
                    }
                });
            }
        });
        assert_eq!(store.stats(BucketKey::of(Verdict::Drift, 0.9)).confirmed, 800);
    }

    #[tokio::test]
    async fn persists_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/calibration.json");

        let store = CalibrationStore::new();
        store.record(Verdict::Drift, 0.42, ReviewDecision::Confirm);
        store.record(Verdict::Compliant, 0.9, ReviewDecision::Dismiss);
        store.save(&path).await.unwrap();

        let reloaded = CalibrationStore::open(&path).await.unwrap();
        assert_eq!(reloaded.snapshot(), store.snapshot());

        let fresh = CalibrationStore::open(dir.path().join("missing.json")).await.unwrap();
        assert!(fresh.snapshot().is_empty());
    }
}
