//! Runs every ensemble member over the shared feature matrix

use crate::config::DetectorsConfig;
use crate::detectors::{
    AnomalyDetector, DetectorKind, DetectorOutput, IsolationForest, LocalOutlierFactor,
    OneClassSvm,
};
use crate::error::{DetectorError, PipelineError};
use crate::features::FeatureMatrix;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one member's fit over the batch
#[derive(Debug, Clone)]
pub struct DetectorRun {
    pub kind: DetectorKind,
    pub outcome: Result<DetectorOutput, DetectorError>,
    pub elapsed: Duration,
}

impl DetectorRun {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The failure of this run, named after its detector
    pub fn fit_error(&self) -> Option<PipelineError> {
        self.outcome
            .as_ref()
            .err()
            .map(|source| PipelineError::DetectorFit {
                detector: self.kind,
                source: source.clone(),
            })
    }
}

/// The set of detectors fitted for one batch.
///
/// Members are independent: a failing member is reported in its
/// `DetectorRun` and never stops the others.
pub struct DetectorEnsemble {
    members: Vec<Arc<dyn AnomalyDetector>>,
    disabled: Vec<DetectorKind>,
}

impl DetectorEnsemble {
    /// Build the enabled members from configuration
    pub fn from_config(config: &DetectorsConfig) -> Self {
        let mut members: Vec<Arc<dyn AnomalyDetector>> = Vec::new();
        let mut disabled = Vec::new();

        if config.isolation_forest.enabled {
            members.push(Arc::new(IsolationForest::from_config(&config.isolation_forest)));
        } else {
            disabled.push(DetectorKind::IsolationForest);
        }
        if config.lof.enabled {
            members.push(Arc::new(LocalOutlierFactor::from_config(&config.lof)));
        } else {
            disabled.push(DetectorKind::LocalOutlierFactor);
        }
        if config.ocsvm.enabled {
            members.push(Arc::new(OneClassSvm::from_config(&config.ocsvm)));
        } else {
            disabled.push(DetectorKind::OneClassSvm);
        }

        info!(
            members = ?members.iter().map(|m| m.kind()).collect::<Vec<_>>(),
            disabled = ?disabled,
            "Detector ensemble initialized"
        );

        Self { members, disabled }
    }

    /// Build an ensemble from explicit members
    pub fn with_members(members: Vec<Arc<dyn AnomalyDetector>>) -> Self {
        Self {
            members,
            disabled: Vec::new(),
        }
    }

    pub fn member_kinds(&self) -> Vec<DetectorKind> {
        self.members.iter().map(|m| m.kind()).collect()
    }

    /// Members switched off in configuration
    pub fn disabled(&self) -> &[DetectorKind] {
        &self.disabled
    }

    /// Fit and score every member in turn
    pub fn run(&self, matrix: &FeatureMatrix) -> Vec<DetectorRun> {
        self.members
            .iter()
            .map(|member| run_guarded(member.as_ref(), matrix))
            .collect()
    }

    /// Fit and score every member on its own blocking task.
    ///
    /// Produces the same runs, in the same order, as [`run`](Self::run).
    pub async fn run_parallel(&self, matrix: Arc<FeatureMatrix>) -> Vec<DetectorRun> {
        let tasks = self.members.iter().map(|member| {
            let member = Arc::clone(member);
            let matrix = Arc::clone(&matrix);
            let kind = member.kind();
            async move {
                let started = Instant::now();
                match tokio::task::spawn_blocking(move || run_guarded(member.as_ref(), &matrix))
                    .await
                {
                    Ok(run) => run,
                    Err(e) => {
                        warn!(detector = %kind, error = %e, "Detector task aborted");
                        DetectorRun {
                            kind,
                            outcome: Err(DetectorError::Aborted(e.to_string())),
                            elapsed: started.elapsed(),
                        }
                    }
                }
            }
        });

        futures::future::join_all(tasks).await
    }
}

/// Run one member, turning a panic inside it into an `Aborted` failure
fn run_guarded(member: &dyn AnomalyDetector, matrix: &FeatureMatrix) -> DetectorRun {
    let kind = member.kind();
    let started = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| run_member(member, matrix))) {
        Ok(run) => run,
        Err(payload) => {
            let run = DetectorRun {
                kind,
                outcome: Err(DetectorError::Aborted(panic_message(payload.as_ref()))),
                elapsed: started.elapsed(),
            };
            if let Some(err) = run.fit_error() {
                warn!(detector = %kind, error = %err, "Detector panicked, excluding it from fusion");
            }
            run
        }
    }
}

fn run_member(member: &dyn AnomalyDetector, matrix: &FeatureMatrix) -> DetectorRun {
    let kind = member.kind();
    let started = Instant::now();
    let outcome = member.fit_score(matrix);
    let run = DetectorRun {
        kind,
        outcome,
        elapsed: started.elapsed(),
    };

    match (&run.outcome, run.fit_error()) {
        (Ok(output), _) => debug!(
            detector = %kind,
            rows = output.len(),
            outliers = output.outlier_count(),
            elapsed_us = run.elapsed.as_micros() as u64,
            "Detector fit complete"
        ),
        (Err(_), Some(err)) => warn!(
            detector = %kind,
            error = %err,
            "Detector failed to fit, excluding it from fusion"
        ),
        (Err(_), None) => {}
    }
    run
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "detector panicked".to_string()
    }
}
