//! Invoice Risk Scoring Library
//!
//! Batch fraud-risk scoring for invoices: engineered behavioural features,
//! an ensemble of three unsupervised anomaly detectors, and a fused 0-100
//! risk score per invoice.

pub mod config;
pub mod detectors;
pub mod error;
pub mod features;
pub mod fusion;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod rules;
pub mod types;
pub mod writer;

pub use config::AppConfig;
pub use detectors::{AnomalyDetector, DetectorEnsemble, DetectorKind};
pub use error::{DetectorError, PipelineError};
pub use features::{FeatureBuilder, FeatureMatrix};
pub use fusion::ScoreFusion;
pub use loader::InvoiceLoader;
pub use pipeline::{score_batch, score_batch_parallel, ScoringContext};
pub use report::RiskReportAssembler;
pub use rules::RuleChecker;
pub use types::{InvoiceRecord, RiskLevel, RiskReport};
pub use writer::ReportWriter;
