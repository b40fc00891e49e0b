//! Unsupervised anomaly detectors.
//!
//! Every detector is fitted on the batch it scores. All of them expose the
//! same capability, `fit_score`, and report scores with the convention
//! "higher = more anomalous" whatever their native sign.

pub mod ensemble;
pub mod isolation_forest;
pub mod lof;
pub mod ocsvm;

pub use ensemble::{DetectorEnsemble, DetectorRun};
pub use isolation_forest::IsolationForest;
pub use lof::LocalOutlierFactor;
pub use ocsvm::OneClassSvm;

use crate::error::DetectorError;
use crate::features::FeatureMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an ensemble member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    IsolationForest,
    LocalOutlierFactor,
    OneClassSvm,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 3] = [
        DetectorKind::IsolationForest,
        DetectorKind::LocalOutlierFactor,
        DetectorKind::OneClassSvm,
    ];

    /// Short code used in output column names
    pub fn code(&self) -> &'static str {
        match self {
            DetectorKind::IsolationForest => "IF",
            DetectorKind::LocalOutlierFactor => "LOF",
            DetectorKind::OneClassSvm => "OCSVM",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Binary inlier / outlier decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Inlier,
    Outlier,
}

impl Label {
    /// `1` for inliers, `-1` for outliers
    pub fn as_i8(&self) -> i8 {
        match self {
            Label::Inlier => 1,
            Label::Outlier => -1,
        }
    }
}

/// Per-row scores and labels from one detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutput {
    pub scores: Vec<f64>,
    pub labels: Vec<Label>,
}

impl DetectorOutput {
    /// Build an output, failing if any score is NaN or infinite.
    pub fn new(scores: Vec<f64>, labels: Vec<Label>) -> Result<Self, DetectorError> {
        let count = scores.iter().filter(|s| !s.is_finite()).count();
        if count > 0 {
            return Err(DetectorError::NonFinite { count });
        }
        Ok(Self { scores, labels })
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn outlier_count(&self) -> usize {
        self.labels.iter().filter(|l| **l == Label::Outlier).count()
    }
}

/// One member of the ensemble.
///
/// Implementations fit on `matrix` and score the same rows; no state is kept
/// between calls.
pub trait AnomalyDetector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    fn fit_score(&self, matrix: &FeatureMatrix) -> Result<DetectorOutput, DetectorError>;
}

pub(crate) fn require_rows(matrix: &FeatureMatrix, required: usize) -> Result<(), DetectorError> {
    if matrix.n_rows() < required {
        return Err(DetectorError::InsufficientSamples {
            required,
            actual: matrix.n_rows(),
        });
    }
    Ok(())
}

/// Reject a matrix with NaN or infinite cells before fitting
pub(crate) fn require_finite(matrix: &FeatureMatrix) -> Result<(), DetectorError> {
    let rows = matrix.non_finite_rows().len();
    if rows > 0 {
        return Err(DetectorError::NonFiniteInput { rows });
    }
    Ok(())
}

pub(crate) fn check_contamination(contamination: f64) -> Result<(), DetectorError> {
    if contamination > 0.0 && contamination <= 0.5 {
        Ok(())
    } else {
        Err(DetectorError::InvalidParameter(format!(
            "contamination must be in (0, 0.5], got {}",
            contamination
        )))
    }
}

/// Percentile with linear interpolation between closest ranks.
/// `q` is in [0, 100]. Returns NaN for an empty slice.
pub(crate) fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Squared Euclidean distance between two rows
pub(crate) fn squared_distance(matrix: &FeatureMatrix, a: usize, b: usize) -> f64 {
    matrix
        .row(a)
        .iter()
        .zip(matrix.row(b).iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}
