//! Batch scoring: features, ensemble, fusion and report for one batch.

use crate::config::AppConfig;
use crate::detectors::{DetectorEnsemble, DetectorRun};
use crate::error::Result;
use crate::features::{FeatureBuilder, FeatureMatrix};
use crate::fusion::ScoreFusion;
use crate::metrics::BatchMetrics;
use crate::report::RiskReportAssembler;
use crate::types::invoice::InvoiceRecord;
use crate::types::report::{EngineeredFeatures, RiskReport};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Everything needed to score one batch.
///
/// Owns the feature matrix and the detectors for the lifetime of the batch;
/// nothing survives it.
pub struct ScoringContext<'a> {
    batch_id: Uuid,
    span: Span,
    records: &'a [InvoiceRecord],
    matrix: Arc<FeatureMatrix>,
    engineered: Vec<EngineeredFeatures>,
    ensemble: DetectorEnsemble,
    fusion: ScoreFusion,
    assembler: RiskReportAssembler,
    high_risk_threshold: f64,
    metrics: BatchMetrics,
}

impl<'a> ScoringContext<'a> {
    /// Build the batch features and the configured ensemble.
    ///
    /// Fails on data-quality problems before any detector is fitted.
    pub fn new(records: &'a [InvoiceRecord], config: &AppConfig) -> Result<Self> {
        Self::with_ensemble(
            records,
            config,
            DetectorEnsemble::from_config(&config.detectors),
        )
    }

    /// Like [`new`](Self::new) with an explicit ensemble
    pub fn with_ensemble(
        records: &'a [InvoiceRecord],
        config: &AppConfig,
        ensemble: DetectorEnsemble,
    ) -> Result<Self> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("batch", batch_id = %batch_id);
        let enter = span.enter();

        info!(records = records.len(), "Building features");
        let started = Instant::now();
        let features = FeatureBuilder::new(config.features.rolling_window).build(records)?;
        let mut metrics = BatchMetrics::new();
        metrics.record_feature_time(started.elapsed());
        info!(
            rows = features.matrix.n_rows(),
            columns = features.matrix.n_cols(),
            "Feature matrix ready"
        );

        drop(enter);
        Ok(Self {
            batch_id,
            span,
            records,
            matrix: Arc::new(features.matrix),
            engineered: features.engineered,
            ensemble,
            fusion: ScoreFusion::new(),
            assembler: RiskReportAssembler::new(config.reporting.risk_levels.clone()),
            high_risk_threshold: config.reporting.high_risk_threshold,
            metrics,
        })
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Fit the detectors one after another and build the report
    pub fn score(&mut self) -> Result<RiskReport> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.records.is_empty() {
            return Ok(self.empty_report());
        }
        let runs = self.ensemble.run(&self.matrix);
        self.finish(runs)
    }

    /// Fit the detectors concurrently on blocking tasks and build the report.
    ///
    /// Produces the same report as [`score`](Self::score).
    pub async fn score_parallel(&mut self) -> Result<RiskReport> {
        let span = self.span.clone();

        if self.records.is_empty() {
            let _enter = span.enter();
            return Ok(self.empty_report());
        }
        let runs = self
            .ensemble
            .run_parallel(Arc::clone(&self.matrix))
            .instrument(span.clone())
            .await;

        let _enter = span.enter();
        self.finish(runs)
    }

    pub fn metrics(&self) -> &BatchMetrics {
        &self.metrics
    }

    pub fn into_metrics(self) -> BatchMetrics {
        self.metrics
    }

    fn empty_report(&mut self) -> RiskReport {
        warn!("Empty batch, nothing to score");
        let report = RiskReport::empty(self.batch_id);
        self.metrics.record_report(&report, self.high_risk_threshold);
        report
    }

    fn finish(&mut self, runs: Vec<DetectorRun>) -> Result<RiskReport> {
        for run in &runs {
            self.metrics.record_detector_time(run.kind, run.elapsed);
        }

        let fused = self.fusion.fuse(&runs, self.records.len())?;
        let report = self.assembler.assemble(
            self.batch_id,
            self.records,
            &self.engineered,
            &runs,
            &fused,
            self.ensemble.disabled(),
        );
        self.metrics.record_report(&report, self.high_risk_threshold);

        info!(
            records = report.len(),
            contributing = ?report.contributing,
            excluded = report.excluded.len(),
            high_risk = report.high_risk_count(self.high_risk_threshold),
            degenerate = report.degenerate,
            "Batch scored"
        );
        Ok(report)
    }
}

/// Score a batch with the detectors run sequentially
pub fn score_batch(records: &[InvoiceRecord], config: &AppConfig) -> Result<RiskReport> {
    ScoringContext::new(records, config)?.score()
}

/// Score a batch with the detectors run concurrently
pub async fn score_batch_parallel(
    records: &[InvoiceRecord],
    config: &AppConfig,
) -> Result<RiskReport> {
    ScoringContext::new(records, config)?.score_parallel().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::ensemble::tests::FailingDetector;
    use crate::detectors::{DetectorKind, IsolationForest, LocalOutlierFactor, OneClassSvm};
    use crate::error::PipelineError;
    use crate::types::report::Exclusion;
    use chrono::{Duration, NaiveDate, NaiveTime};

    fn batch(amounts: &[f64]) -> Vec<InvoiceRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        amounts
            .iter()
            .enumerate()
            .map(|(i, &amount)| {
                InvoiceRecord::new(
                    format!("INV-{:04}", i),
                    ["Acme", "Globex", "Initech"][i % 3],
                    ["Ops", "IT"][i % 2],
                    amount,
                    start + Duration::days(i as i64 % 9),
                    NaiveTime::from_hms_opt(9 + (i % 8) as u32, 15, 0).unwrap(),
                )
            })
            .collect()
    }

    fn typical_batch() -> Vec<InvoiceRecord> {
        let mut amounts: Vec<f64> = (0..60).map(|i| 1_000.0 + (i % 10) as f64 * 25.0).collect();
        amounts.push(95_000.0);
        batch(&amounts)
    }

    #[test]
    fn test_three_record_vendor_spike() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let records: Vec<InvoiceRecord> = [100.0, 100.0, 100_000.0]
            .iter()
            .enumerate()
            .map(|(i, &amount)| {
                InvoiceRecord::new(
                    format!("V-{}", i),
                    "Vendor V",
                    "Ops",
                    amount,
                    start + Duration::days(i as i64),
                    nine,
                )
            })
            .collect();

        let report = score_batch(&records, &AppConfig::default()).unwrap();
        assert_eq!(report.len(), 3);
        assert!(report.rows[2].features.invoice_deviation > 2.0);
        let risk = report.scores();
        assert!(risk[2] > risk[0]);
        assert!(risk[2] > risk[1]);
        assert_eq!(risk[2], 100.0);
    }

    #[test]
    fn test_scores_bounded_and_outlier_flagged() {
        let records = typical_batch();
        let report = score_batch(&records, &AppConfig::default()).unwrap();

        assert_eq!(report.len(), records.len());
        assert!(report.scores().iter().all(|s| (0.0..=100.0).contains(s)));
        assert_eq!(report.contributing.len(), 3);
        assert!(report.excluded.is_empty());

        let last = report.rows.last().unwrap();
        assert_eq!(last.record.invoice_no, "INV-0060");
        assert!(last.fraud_risk_score > 70.0);
        assert!(report.high_risk_count(70.0) >= 1);
    }

    #[test]
    fn test_identical_rows_score_zero() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 7).unwrap();
        let time = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let records: Vec<InvoiceRecord> = (0..8)
            .map(|i| InvoiceRecord::new(format!("X-{}", i), "Same", "Same", 250.0, date, time))
            .collect();

        // a one-record window keeps rolling spend equal across rows
        let mut config = AppConfig::default();
        config.features.rolling_window = 1;

        let report = score_batch(&records, &config).unwrap();
        assert!(report.degenerate);
        assert!(report.scores().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let records = typical_batch();
        let config = AppConfig::default();
        let first = score_batch(&records, &config).unwrap();
        let second = score_batch(&records, &config).unwrap();
        assert_eq!(first.scores(), second.scores());
    }

    #[test]
    fn test_failing_detector_is_excluded() {
        let records = typical_batch();
        let ensemble = DetectorEnsemble::with_members(vec![
            Arc::new(IsolationForest::default()),
            Arc::new(FailingDetector(DetectorKind::LocalOutlierFactor)),
            Arc::new(OneClassSvm::default()),
        ]);
        let mut context =
            ScoringContext::with_ensemble(&records, &AppConfig::default(), ensemble).unwrap();
        let report = context.score().unwrap();

        assert_eq!(report.batch_id, context.batch_id());
        assert!(report.scores().iter().all(|s| (0.0..=100.0).contains(s)));
        assert_eq!(
            report.contributing,
            vec![DetectorKind::IsolationForest, DetectorKind::OneClassSvm]
        );
        assert!(matches!(
            report.excluded.as_slice(),
            [(DetectorKind::LocalOutlierFactor, Exclusion::Failed(_))]
        ));
        assert!(report.rows[0]
            .detector_scores
            .get(&DetectorKind::LocalOutlierFactor)
            .is_none());
        assert_eq!(context.metrics().detector_times().len(), 3);
    }

    #[test]
    fn test_all_detectors_failing_aborts() {
        let records = typical_batch();
        let ensemble = DetectorEnsemble::with_members(vec![
            Arc::new(FailingDetector(DetectorKind::IsolationForest)),
            Arc::new(FailingDetector(DetectorKind::OneClassSvm)),
        ]);
        let result = ScoringContext::with_ensemble(&records, &AppConfig::default(), ensemble)
            .unwrap()
            .score();
        assert!(matches!(
            result,
            Err(PipelineError::AggregateDetectorFailure { ref failures }) if failures.len() == 2
        ));
    }

    #[test]
    fn test_single_record_uses_remaining_detector() {
        let records = batch(&[420.0]);
        let report = score_batch(&records, &AppConfig::default()).unwrap();

        // IF and LOF need two rows; the SVM alone carries the batch
        assert_eq!(report.contributing, vec![DetectorKind::OneClassSvm]);
        assert_eq!(report.excluded.len(), 2);
        assert_eq!(report.scores(), vec![0.0]);
    }

    #[test]
    fn test_disabled_detector_is_reported() {
        let records = typical_batch();
        let mut config = AppConfig::default();
        config.detectors.ocsvm.enabled = false;

        let report = score_batch(&records, &config).unwrap();
        assert_eq!(
            report.contributing,
            vec![DetectorKind::IsolationForest, DetectorKind::LocalOutlierFactor]
        );
        assert_eq!(
            report.excluded,
            vec![(DetectorKind::OneClassSvm, Exclusion::Disabled)]
        );
    }

    #[test]
    fn test_empty_batch() {
        let report = score_batch(&[], &AppConfig::default()).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_data_quality_error_stops_batch() {
        let mut records = typical_batch();
        records[4].amount = -10.0;
        assert!(matches!(
            score_batch(&records, &AppConfig::default()),
            Err(PipelineError::DataQuality { .. })
        ));
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let records = typical_batch();
        let config = AppConfig::default();

        let sequential = score_batch(&records, &config).unwrap();
        let parallel = score_batch_parallel(&records, &config).await.unwrap();
        assert_eq!(sequential.scores(), parallel.scores());
        assert_eq!(sequential.contributing, parallel.contributing);
    }

    #[test]
    fn test_explicit_members_match_config() {
        let records = typical_batch();
        let ensemble = DetectorEnsemble::with_members(vec![
            Arc::new(IsolationForest::default()),
            Arc::new(LocalOutlierFactor::default()),
            Arc::new(OneClassSvm::default()),
        ]);
        let explicit = ScoringContext::with_ensemble(&records, &AppConfig::default(), ensemble)
            .unwrap()
            .score()
            .unwrap();
        let configured = score_batch(&records, &AppConfig::default()).unwrap();
        assert_eq!(explicit.scores(), configured.scores());
    }
}
