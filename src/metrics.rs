//! Batch statistics and the end-of-run summary.

use crate::detectors::DetectorKind;
use crate::rules::RuleSummary;
use crate::types::report::{RiskLevel, RiskReport};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Metrics collected while scoring one batch
#[derive(Debug, Clone, Default)]
pub struct BatchMetrics {
    records: usize,
    feature_time: Duration,
    detector_times: BTreeMap<DetectorKind, Duration>,
    /// Risk score distribution, ten buckets of width 10
    score_buckets: [u64; 10],
    level_counts: BTreeMap<RiskLevel, usize>,
    /// `None` until at least two detectors contributed
    agreement: Option<f64>,
    high_risk: usize,
    high_risk_threshold: f64,
    excluded: Vec<(DetectorKind, String)>,
    rules: Option<RuleSummary>,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_feature_time(&mut self, duration: Duration) {
        self.feature_time = duration;
    }

    pub fn record_detector_time(&mut self, kind: DetectorKind, duration: Duration) {
        self.detector_times.insert(kind, duration);
    }

    pub fn record_rules(&mut self, summary: RuleSummary) {
        self.rules = Some(summary);
    }

    /// Record the distribution, levels and agreement of a finished report
    pub fn record_report(&mut self, report: &RiskReport, high_risk_threshold: f64) {
        self.records = report.len();
        self.score_buckets = [0; 10];
        for score in report.scores() {
            self.score_buckets[score_bucket(score)] += 1;
        }
        self.level_counts = report.level_counts();
        self.high_risk = report.high_risk_count(high_risk_threshold);
        self.high_risk_threshold = high_risk_threshold;
        self.agreement = detector_agreement(report);
        self.excluded = report
            .excluded
            .iter()
            .map(|(kind, reason)| (*kind, reason.to_string()))
            .collect();
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn high_risk(&self) -> usize {
        self.high_risk
    }

    pub fn agreement(&self) -> Option<f64> {
        self.agreement
    }

    pub fn score_distribution(&self) -> [u64; 10] {
        self.score_buckets
    }

    pub fn detector_times(&self) -> &BTreeMap<DetectorKind, Duration> {
        &self.detector_times
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let high_rate = if self.records > 0 {
            (self.high_risk as f64 / self.records as f64) * 100.0
        } else {
            0.0
        };

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            INVOICE RISK SCORING - BATCH SUMMARY              ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Invoices Scored:  {:>8}  │  Feature Build: {:>8} μs      ║",
            self.records,
            self.feature_time.as_micros()
        );
        info!(
            "║ High Risk (>{:>3.0}): {:>7}  │  High Risk Rate: {:>6.1}%      ║",
            self.high_risk_threshold, self.high_risk, high_rate
        );
        match self.agreement {
            Some(agreement) => info!(
                "║ Detector Agreement: {:>5.1}% (higher = detectors agree more)  ║",
                agreement * 100.0
            ),
            None => info!("║ Detector Agreement: n/a (fewer than two detectors)          ║"),
        }

        if let Some(rules) = &self.rules {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Rule Checks:                                                 ║");
            info!(
                "║   duplicates={:<6} high_value={:<6} off_hours={:<6} weekend={:<6}",
                rules.duplicate_invoices, rules.high_value, rules.off_hours, rules.weekend
            );
        }

        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Invoices by Risk Level:                                      ║");
        for (level, count) in &self.level_counts {
            let pct = if self.records > 0 {
                (*count as f64 / self.records as f64) * 100.0
            } else {
                0.0
            };
            info!(
                "║   {:10}: {:>6} ({:>5.1}%)                                ║",
                level.as_str(),
                count,
                pct
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let total: u64 = self.score_buckets.iter().sum();
        for (i, &count) in self.score_buckets.iter().enumerate() {
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:>3}-{:<3}: {:>6} ({:>5.1}%) {}",
                i * 10,
                (i + 1) * 10,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        if !self.detector_times.is_empty() {
            info!("Detector Fit Times (μs):");
            for (kind, duration) in &self.detector_times {
                info!("  {}: {}", kind, duration.as_micros());
            }
        }
        for (kind, reason) in &self.excluded {
            info!("  {} excluded: {}", kind, reason);
        }
    }
}

/// Bucket index for a score on the 0-100 scale
fn score_bucket(score: f64) -> usize {
    ((score / 10.0).max(0.0) as usize).min(9)
}

/// One minus the mean per-row standard deviation of the detector scores,
/// each detector min-max normalized over the batch first.
///
/// `None` when fewer than two detectors contributed or the batch is empty.
pub fn detector_agreement(report: &RiskReport) -> Option<f64> {
    if report.contributing.len() < 2 || report.is_empty() {
        return None;
    }

    let normalized: Vec<Vec<f64>> = report
        .contributing
        .iter()
        .map(|kind| {
            let scores: Vec<f64> = report
                .rows
                .iter()
                .map(|row| row.detector_scores.get(kind).map_or(0.0, |s| s.score))
                .collect();
            let (min, max) = scores
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
                    (lo.min(s), hi.max(s))
                });
            let range = max - min;
            scores
                .iter()
                .map(|s| if range > 0.0 { (s - min) / range } else { 0.0 })
                .collect()
        })
        .collect();

    let detectors = normalized.len() as f64;
    let total_std: f64 = (0..report.len())
        .map(|row| {
            let mean = normalized.iter().map(|d| d[row]).sum::<f64>() / detectors;
            let variance = normalized
                .iter()
                .map(|d| (d[row] - mean).powi(2))
                .sum::<f64>()
                / detectors;
            variance.sqrt()
        })
        .sum();

    Some(1.0 - (total_std / report.len() as f64).min(1.0))
}
