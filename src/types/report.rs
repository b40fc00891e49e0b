//! Risk report data structures

use crate::detectors::{DetectorKind, Label};
use crate::error::DetectorError;
use crate::types::invoice::InvoiceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Risk level classification on the 0-100 score scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Configurable risk level thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 50.0,
            high: 70.0,
            critical: 90.0,
        }
    }
}

/// Engineered numeric features echoed into the report
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineeredFeatures {
    pub day_of_week: u32,
    pub seconds_since_midnight: u32,
    pub rolling_vendor_spend: f64,
    pub invoice_deviation: f64,
}

/// One detector's score (higher = more anomalous) and label for one invoice
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectorScore {
    pub score: f64,
    pub label: Label,
}

/// One scored invoice, in original input order
#[derive(Debug, Clone, Serialize)]
pub struct RiskReportRow {
    pub record: InvoiceRecord,
    pub features: EngineeredFeatures,
    /// Scores of the detectors that contributed; excluded detectors are absent
    pub detector_scores: BTreeMap<DetectorKind, DetectorScore>,
    /// Batch-relative risk in [0, 100]
    pub fraud_risk_score: f64,
    pub risk_level: RiskLevel,
}

/// Why a detector did not contribute to fusion
#[derive(Debug, Clone, PartialEq)]
pub enum Exclusion {
    Disabled,
    Failed(DetectorError),
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exclusion::Disabled => write!(f, "disabled"),
            Exclusion::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Finished record set for one batch
#[derive(Debug, Clone)]
pub struct RiskReport {
    /// Log correlation id; never part of the scores
    pub batch_id: Uuid,
    pub rows: Vec<RiskReportRow>,
    /// Detectors whose scores were fused
    pub contributing: Vec<DetectorKind>,
    pub excluded: Vec<(DetectorKind, Exclusion)>,
    /// True when every fused mean score was equal and all risks are 0
    pub degenerate: bool,
}

impl RiskReport {
    pub fn empty(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            rows: Vec::new(),
            contributing: Vec::new(),
            excluded: Vec::new(),
            degenerate: false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Invoices scoring strictly above the alert threshold
    pub fn high_risk_count(&self, threshold: f64) -> usize {
        self.rows
            .iter()
            .filter(|row| row.fraud_risk_score > threshold)
            .count()
    }

    pub fn level_counts(&self) -> BTreeMap<RiskLevel, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.risk_level).or_insert(0) += 1;
        }
        counts
    }

    pub fn scores(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.fraud_risk_score).collect()
    }
}
