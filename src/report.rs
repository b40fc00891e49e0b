//! Risk report assembly

use crate::detectors::{DetectorKind, DetectorRun};
use crate::fusion::FusedScores;
use crate::types::invoice::InvoiceRecord;
use crate::types::report::{
    DetectorScore, EngineeredFeatures, Exclusion, RiskLevel, RiskLevelThresholds, RiskReport,
    RiskReportRow,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Joins fused risk back onto the input records.
///
/// A pure projection: row `i` of the report is record `i` of the batch.
#[derive(Debug, Clone, Default)]
pub struct RiskReportAssembler {
    thresholds: RiskLevelThresholds,
}

impl RiskReportAssembler {
    pub fn new(thresholds: RiskLevelThresholds) -> Self {
        Self { thresholds }
    }

    pub fn assemble(
        &self,
        batch_id: Uuid,
        records: &[InvoiceRecord],
        engineered: &[EngineeredFeatures],
        runs: &[DetectorRun],
        fused: &FusedScores,
        disabled: &[DetectorKind],
    ) -> RiskReport {
        let contributing: Vec<&DetectorRun> = runs
            .iter()
            .filter(|run| fused.contributing.contains(&run.kind))
            .collect();

        let rows = records
            .iter()
            .zip(engineered)
            .zip(&fused.risk)
            .enumerate()
            .map(|(i, ((record, features), &risk))| {
                let detector_scores: BTreeMap<DetectorKind, DetectorScore> = contributing
                    .iter()
                    .filter_map(|run| {
                        let output = run.outcome.as_ref().ok()?;
                        Some((
                            run.kind,
                            DetectorScore {
                                score: output.scores[i],
                                label: output.labels[i],
                            },
                        ))
                    })
                    .collect();

                RiskReportRow {
                    record: record.clone(),
                    features: *features,
                    detector_scores,
                    fraud_risk_score: risk,
                    risk_level: RiskLevel::from_score(risk, &self.thresholds),
                }
            })
            .collect();

        let mut excluded: Vec<(DetectorKind, Exclusion)> = disabled
            .iter()
            .map(|kind| (*kind, Exclusion::Disabled))
            .collect();
        excluded.extend(
            fused
                .failures
                .iter()
                .map(|(kind, err)| (*kind, Exclusion::Failed(err.clone()))),
        );
        excluded.sort_by_key(|(kind, _)| *kind);

        RiskReport {
            batch_id,
            rows,
            contributing: fused.contributing.clone(),
            excluded,
            degenerate: fused.degenerate,
        }
    }
}
