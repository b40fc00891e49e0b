//! Score fusion for the detector ensemble

use crate::detectors::{DetectorKind, DetectorRun};
use crate::error::{DetectorError, PipelineError, Result};
use tracing::{info, warn};

/// Upper end of the risk scale
pub const RISK_SCALE: f64 = 100.0;

/// Fused scores for one batch, in row order
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScores {
    /// Per-row mean of the contributing detector scores
    pub mean_scores: Vec<f64>,
    /// Batch-relative risk in [0, 100]
    pub risk: Vec<f64>,
    /// All means were equal, so every risk is 0
    pub degenerate: bool,
    pub contributing: Vec<DetectorKind>,
    pub failures: Vec<(DetectorKind, DetectorError)>,
}

/// Averages detector scores and rescales them onto 0-100.
///
/// Every successful detector carries equal weight. Scores are already
/// oriented so that higher means more anomalous.
#[derive(Debug, Clone, Default)]
pub struct ScoreFusion;

impl ScoreFusion {
    pub fn new() -> Self {
        Self
    }

    /// Fuse the detector runs for a batch of `n_rows` records.
    ///
    /// Failed runs, and runs whose output does not cover every row, are
    /// left out of the average. Fails with `AggregateDetectorFailure` when
    /// nothing is left.
    pub fn fuse(&self, runs: &[DetectorRun], n_rows: usize) -> Result<FusedScores> {
        let mut contributing = Vec::new();
        let mut failures = Vec::new();
        let mut sums = vec![0.0; n_rows];

        for run in runs {
            match &run.outcome {
                Ok(output) if output.len() == n_rows => {
                    for (sum, score) in sums.iter_mut().zip(&output.scores) {
                        *sum += score;
                    }
                    contributing.push(run.kind);
                }
                Ok(output) => {
                    let err = DetectorError::ShapeMismatch {
                        expected: n_rows,
                        actual: output.len(),
                    };
                    warn!(detector = %run.kind, error = %err, "Discarding detector output");
                    failures.push((run.kind, err));
                }
                Err(err) => failures.push((run.kind, err.clone())),
            }
        }

        if contributing.is_empty() {
            return Err(PipelineError::AggregateDetectorFailure { failures });
        }

        let count = contributing.len() as f64;
        let mean_scores: Vec<f64> = sums.into_iter().map(|s| s / count).collect();
        let (risk, degenerate) = min_max_rescale(&mean_scores);

        if degenerate && n_rows > 0 {
            info!(
                records = n_rows,
                "All fused scores are equal, every risk score is 0"
            );
        }

        Ok(FusedScores {
            mean_scores,
            risk,
            degenerate,
            contributing,
            failures,
        })
    }
}

/// Min-max rescale onto [0, RISK_SCALE].
///
/// Returns all zeros and `true` when the range is zero or not a number.
pub fn min_max_rescale(values: &[f64]) -> (Vec<f64>, bool) {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    // NaN compares false, so a NaN range also lands here
    if !(range > 0.0) || !range.is_finite() {
        return (vec![0.0; values.len()], true);
    }

    let risk = values
        .iter()
        .map(|v| (RISK_SCALE * (v - min) / range).clamp(0.0, RISK_SCALE))
        .collect();
    (risk, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{DetectorOutput, Label};
    use std::time::Duration;

    fn run(kind: DetectorKind, scores: &[f64]) -> DetectorRun {
        DetectorRun {
            kind,
            outcome: DetectorOutput::new(scores.to_vec(), vec![Label::Inlier; scores.len()]),
            elapsed: Duration::ZERO,
        }
    }

    fn failed(kind: DetectorKind) -> DetectorRun {
        DetectorRun {
            kind,
            outcome: Err(DetectorError::InsufficientSamples {
                required: 2,
                actual: 1,
            }),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_equal_weight_average() {
        let runs = vec![
            run(DetectorKind::IsolationForest, &[0.0, 1.0, 2.0]),
            run(DetectorKind::LocalOutlierFactor, &[1.0, 1.0, 4.0]),
            run(DetectorKind::OneClassSvm, &[-1.0, 1.0, 0.0]),
        ];
        let fused = ScoreFusion::new().fuse(&runs, 3).unwrap();

        assert_eq!(fused.mean_scores, vec![0.0, 1.0, 2.0]);
        assert_eq!(fused.risk, vec![0.0, 50.0, 100.0]);
        assert!(!fused.degenerate);
        assert_eq!(fused.contributing.len(), 3);
    }

    #[test]
    fn test_risk_bounds_and_monotonic() {
        let scores = [0.3, -2.5, 7.1, 0.31, 4.0, -2.5];
        let fused = ScoreFusion::new()
            .fuse(&[run(DetectorKind::IsolationForest, &scores)], scores.len())
            .unwrap();

        assert!(fused.risk.iter().all(|r| (0.0..=100.0).contains(r)));
        assert!(fused.risk.iter().any(|r| *r == 0.0));
        assert!(fused.risk.iter().any(|r| *r == 100.0));
        for a in 0..scores.len() {
            for b in 0..scores.len() {
                if fused.mean_scores[a] > fused.mean_scores[b] {
                    assert!(fused.risk[a] >= fused.risk[b]);
                }
            }
        }
    }

    #[test]
    fn test_degenerate_batch_scores_zero() {
        let fused = ScoreFusion::new()
            .fuse(&[run(DetectorKind::OneClassSvm, &[0.4; 5])], 5)
            .unwrap();
        assert!(fused.degenerate);
        assert_eq!(fused.risk, vec![0.0; 5]);

        let (risk, degenerate) = min_max_rescale(&[f64::NAN, 1.0]);
        assert!(degenerate);
        assert!(risk.iter().all(|r| *r == 0.0));
    }

    #[test]
    fn test_failed_detector_is_left_out() {
        let runs = vec![
            run(DetectorKind::IsolationForest, &[0.0, 2.0]),
            failed(DetectorKind::LocalOutlierFactor),
            run(DetectorKind::OneClassSvm, &[2.0, 4.0]),
        ];
        let fused = ScoreFusion::new().fuse(&runs, 2).unwrap();

        assert_eq!(fused.mean_scores, vec![1.0, 3.0]);
        assert_eq!(
            fused.contributing,
            vec![DetectorKind::IsolationForest, DetectorKind::OneClassSvm]
        );
        assert_eq!(fused.failures.len(), 1);
        assert_eq!(fused.failures[0].0, DetectorKind::LocalOutlierFactor);
    }

    #[test]
    fn test_short_output_is_rejected() {
        let runs = vec![
            run(DetectorKind::IsolationForest, &[0.0, 2.0, 1.0]),
            run(DetectorKind::OneClassSvm, &[2.0]),
        ];
        let fused = ScoreFusion::new().fuse(&runs, 3).unwrap();
        assert_eq!(fused.contributing, vec![DetectorKind::IsolationForest]);
        assert_eq!(
            fused.failures[0].1,
            DetectorError::ShapeMismatch {
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn test_all_failed_is_aggregate_error() {
        let runs = vec![
            failed(DetectorKind::IsolationForest),
            failed(DetectorKind::LocalOutlierFactor),
        ];
        match ScoreFusion::new().fuse(&runs, 1) {
            Err(PipelineError::AggregateDetectorFailure { failures }) => {
                assert_eq!(failures.len(), 2)
            }
            other => panic!("expected aggregate failure, got {:?}", other),
        }
    }
}
