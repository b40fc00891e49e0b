//! Error types for the scoring pipeline

use crate::detectors::DetectorKind;
use thiserror::Error;

/// Failure of a single detector member.
///
/// Never fatal on its own: the ensemble excludes the member and fusion
/// continues with the remaining scores.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    #[error("need at least {required} rows to fit, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("input has {rows} rows with non-finite values")]
    NonFiniteInput { rows: usize },

    #[error("produced {count} non-finite scores")]
    NonFinite { count: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("returned {actual} scores for {expected} rows")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("fit aborted: {0}")]
    Aborted(String),
}

/// Batch-level pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Required input column missing
    #[error("schema error: missing required columns {missing:?}")]
    Schema { missing: Vec<String> },

    /// Unparseable or invalid values, with the offending record identifiers
    #[error("data quality error: {message} (records: {})", .records.join(", "))]
    DataQuality {
        message: String,
        records: Vec<String>,
    },

    /// A single detector failed; surfaced as a warning, not as a batch failure
    #[error("detector {detector} failed to fit: {source}")]
    DetectorFit {
        detector: DetectorKind,
        #[source]
        source: DetectorError,
    },

    /// Every enabled detector failed
    #[error("all detectors failed: {}", format_failures(.failures))]
    AggregateDetectorFailure {
        failures: Vec<(DetectorKind, DetectorError)>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_failures(failures: &[(DetectorKind, DetectorError)]) -> String {
    if failures.is_empty() {
        return "no detectors enabled".to_string();
    }
    failures
        .iter()
        .map(|(kind, err)| format!("{kind}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, PipelineError>;
