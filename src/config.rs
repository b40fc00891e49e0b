//! Configuration management for the invoice risk scoring pipeline

use crate::error::PipelineError;
use crate::types::report::RiskLevelThresholds;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable prefix, e.g. `INVOICE_RISK__FEATURES__ROLLING_WINDOW=14`
pub const ENV_PREFIX: &str = "INVOICE_RISK";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub io: IoConfig,
    pub features: FeatureConfig,
    pub detectors: DetectorsConfig,
    pub pipeline: PipelineConfig,
    pub rules: RulesConfig,
    pub reporting: ReportingConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Output serialization format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
}

/// Input / output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub input_path: String,
    pub output_path: String,
    pub output_format: OutputFormat,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input_path: "synthetic_invoices.csv".to_string(),
            output_path: "invoices_with_risk_score.csv".to_string(),
            output_format: OutputFormat::Csv,
        }
    }
}

/// Feature engineering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Trailing window (in records) for rolling vendor spend
    pub rolling_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { rolling_window: 30 }
    }
}

/// Detector ensemble configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectorsConfig {
    pub isolation_forest: IsolationForestConfig,
    pub lof: LofConfig,
    pub ocsvm: OneClassSvmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    pub enabled: bool,
    /// Number of isolation trees
    pub n_estimators: usize,
    /// Per-tree subsample size cap
    pub max_samples: usize,
    /// Expected outlier fraction
    pub contamination: f64,
    /// Seed for tree construction; fixed so reruns are reproducible
    pub seed: u64,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.05,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LofConfig {
    pub enabled: bool,
    pub n_neighbors: usize,
    pub contamination: f64,
}

impl Default for LofConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_neighbors: 20,
            contamination: 0.05,
        }
    }
}

/// RBF kernel width, written as `"scale"` or a positive number
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(try_from = "GammaRepr", into = "GammaRepr")]
pub enum Gamma {
    /// 1 / (n_features * Var(X))
    #[default]
    Scale,
    Value(f64),
}

/// Wire form of [`Gamma`]. Environment overrides arrive as strings, so a
/// numeric string is accepted too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum GammaRepr {
    Value(f64),
    Keyword(String),
}

impl TryFrom<GammaRepr> for Gamma {
    type Error = String;

    fn try_from(repr: GammaRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            GammaRepr::Value(gamma) => Ok(Gamma::Value(gamma)),
            GammaRepr::Keyword(word) if word.trim().eq_ignore_ascii_case("scale") => {
                Ok(Gamma::Scale)
            }
            GammaRepr::Keyword(word) => word
                .trim()
                .parse::<f64>()
                .map(Gamma::Value)
                .map_err(|_| format!("gamma must be \"scale\" or a number, got {:?}", word)),
        }
    }
}

impl From<Gamma> for GammaRepr {
    fn from(gamma: Gamma) -> Self {
        match gamma {
            Gamma::Scale => GammaRepr::Keyword("scale".to_string()),
            Gamma::Value(gamma) => GammaRepr::Value(gamma),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneClassSvmConfig {
    pub enabled: bool,
    /// Soft margin fraction
    pub nu: f64,
    pub gamma: Gamma,
    /// SMO stopping tolerance
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for OneClassSvmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            nu: 0.05,
            gamma: Gamma::Scale,
            tolerance: 1e-3,
            max_iter: 1_000_000,
        }
    }
}

/// Pipeline execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fit the detectors on blocking tasks concurrently
    pub parallel_detectors: bool,
}

/// Deterministic rule-check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub high_value_threshold: f64,
    pub business_hours_start: NaiveTime,
    pub business_hours_end: NaiveTime,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: 75_000.0,
            business_hours_start: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            business_hours_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default(),
        }
    }
}

/// Reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Scores strictly above this count as high risk
    pub high_risk_threshold: f64,
    pub risk_levels: RiskLevelThresholds,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            high_risk_threshold: 70.0,
            risk_levels: RiskLevelThresholds::default(),
        }
    }
}

/// Output column selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub include_features: bool,
    pub include_detector_scores: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            include_features: true,
            include_detector_scores: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration: defaults, then the file if present, then environment
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let defaults =
            Config::try_from(&AppConfig::default()).context("Failed to serialize defaults")?;

        let config = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app.validate()?;
        Ok(app)
    }

    /// Check value ranges before any data is read
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::Configuration(msg));

        if self.features.rolling_window == 0 {
            return invalid("features.rolling_window must be at least 1".to_string());
        }

        let iforest = &self.detectors.isolation_forest;
        if !(iforest.contamination > 0.0 && iforest.contamination <= 0.5) {
            return invalid(format!(
                "detectors.isolation_forest.contamination must be in (0, 0.5], got {}",
                iforest.contamination
            ));
        }
        if iforest.n_estimators == 0 || iforest.max_samples == 0 {
            return invalid(
                "detectors.isolation_forest.n_estimators and max_samples must be positive"
                    .to_string(),
            );
        }

        let lof = &self.detectors.lof;
        if !(lof.contamination > 0.0 && lof.contamination <= 0.5) {
            return invalid(format!(
                "detectors.lof.contamination must be in (0, 0.5], got {}",
                lof.contamination
            ));
        }
        if lof.n_neighbors == 0 {
            return invalid("detectors.lof.n_neighbors must be at least 1".to_string());
        }

        let ocsvm = &self.detectors.ocsvm;
        if !(ocsvm.nu > 0.0 && ocsvm.nu <= 1.0) {
            return invalid(format!(
                "detectors.ocsvm.nu must be in (0, 1], got {}",
                ocsvm.nu
            ));
        }
        if let Gamma::Value(gamma) = ocsvm.gamma {
            if !(gamma > 0.0 && gamma.is_finite()) {
                return invalid(format!("detectors.ocsvm.gamma must be positive, got {}", gamma));
            }
        }
        if !(ocsvm.tolerance > 0.0) || ocsvm.max_iter == 0 {
            return invalid("detectors.ocsvm.tolerance and max_iter must be positive".to_string());
        }

        if self.rules.business_hours_start >= self.rules.business_hours_end {
            return invalid("rules.business_hours_start must be before business_hours_end".to_string());
        }

        let levels = &self.reporting.risk_levels;
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.reporting.high_risk_threshold)
            || !in_range(levels.medium)
            || !in_range(levels.high)
            || !in_range(levels.critical)
        {
            return invalid("reporting thresholds must lie in [0, 100]".to_string());
        }
        if !(levels.medium <= levels.high && levels.high <= levels.critical) {
            return invalid("reporting.risk_levels must be ordered medium <= high <= critical".to_string());
        }

        Ok(())
    }
}
