//! Invoice Risk Scoring - Main Entry Point
//!
//! Loads a batch of invoices, runs the rule checks and the detector
//! ensemble, and writes every invoice back out with its fraud risk score.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use invoice_risk::{
    config::{AppConfig, OutputFormat, DEFAULT_CONFIG_PATH},
    loader::InvoiceLoader,
    pipeline::ScoringContext,
    rules::RuleChecker,
    writer::ReportWriter,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Score a batch of invoices for fraud risk
#[derive(Debug, Parser)]
#[command(name = "invoice-risk", version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Input invoice CSV, overrides io.input_path
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output file, overrides io.output_path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Output format, overrides io.output_format
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Fit the detectors concurrently
    #[arg(long)]
    parallel: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Jsonl,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Jsonl => OutputFormat::Jsonl,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from_path(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(input) = &cli.input {
        config.io.input_path = input.display().to_string();
    }
    if let Some(output) = &cli.output {
        config.io.output_path = output.display().to_string();
    }
    if let Some(format) = cli.format {
        config.io.output_format = format.into();
    }
    if cli.parallel {
        config.pipeline.parallel_detectors = true;
    }

    init_logging(&config)?;
    info!("Starting Invoice Risk Scoring");
    info!(
        input = %config.io.input_path,
        output = %config.io.output_path,
        parallel = config.pipeline.parallel_detectors,
        "Configuration loaded successfully"
    );

    let records = InvoiceLoader::from_path(&config.io.input_path)
        .with_context(|| format!("Failed to load invoices from {}", config.io.input_path))?;

    let rules = RuleChecker::new(&config.rules).check(&records);

    let mut context =
        ScoringContext::new(&records, &config).context("Failed to build batch features")?;
    let report = if config.pipeline.parallel_detectors {
        context.score_parallel().await
    } else {
        context.score()
    }
    .context("Failed to score batch")?;

    ReportWriter::from_config(&config)
        .write_path(&config.io.output_path, &report)
        .with_context(|| format!("Failed to write report to {}", config.io.output_path))?;

    let mut metrics = context.into_metrics();
    metrics.record_rules(rules);
    metrics.print_summary();

    info!(
        batch_id = %report.batch_id,
        high_risk = report.high_risk_count(config.reporting.high_risk_threshold),
        "Invoice risk scoring complete"
    );
    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.level)
            .with_context(|| format!("Invalid log level '{}'", config.logging.level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
