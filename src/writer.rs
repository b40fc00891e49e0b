//! Writes the annotated batch as CSV or JSON lines

use crate::config::{AppConfig, OutputFormat};
use crate::detectors::DetectorKind;
use crate::error::Result;
use crate::types::invoice::{AMOUNT, DATE, DEPARTMENT, INVOICE_NO, TIME, VENDOR_NAME};
use crate::types::report::{RiskReport, RiskReportRow};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

const FEATURE_COLUMNS: [&str; 4] = [
    "DayOfWeek",
    "SecondsSinceMidnight",
    "RollingVendorSpend",
    "InvoiceDeviation",
];

/// Report writer with configurable column selection
#[derive(Debug, Clone)]
pub struct ReportWriter {
    format: OutputFormat,
    include_features: bool,
    include_detector_scores: bool,
}

impl ReportWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            include_features: true,
            include_detector_scores: true,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            format: config.io.output_format,
            include_features: config.output.include_features,
            include_detector_scores: config.output.include_detector_scores,
        }
    }

    /// Output columns, in order
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = [INVOICE_NO, VENDOR_NAME, DEPARTMENT, AMOUNT, DATE, TIME]
            .iter()
            .map(|c| c.to_string())
            .collect();
        if self.include_features {
            columns.extend(FEATURE_COLUMNS.iter().map(|c| c.to_string()));
        }
        if self.include_detector_scores {
            for kind in DetectorKind::ALL {
                columns.push(format!("{}_Score", kind.code()));
                columns.push(format!("Anomaly_{}", kind.code()));
            }
        }
        columns.push("FraudRiskScore".to_string());
        columns.push("RiskLevel".to_string());
        columns
    }

    pub fn write_path<P: AsRef<Path>>(&self, path: P, report: &RiskReport) -> Result<()> {
        let path = path.as_ref();
        let file = BufWriter::new(File::create(path)?);
        self.write(file, report)?;
        info!(
            path = %path.display(),
            rows = report.len(),
            format = ?self.format,
            "Report written"
        );
        Ok(())
    }

    pub fn write<W: Write>(&self, writer: W, report: &RiskReport) -> Result<()> {
        match self.format {
            OutputFormat::Csv => self.write_csv(writer, report),
            OutputFormat::Jsonl => self.write_jsonl(writer, report),
        }
    }

    fn write_csv<W: Write>(&self, writer: W, report: &RiskReport) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(self.columns())?;
        for row in &report.rows {
            let cells: Vec<String> = self.cells(row).iter().map(csv_cell).collect();
            csv.write_record(&cells)?;
        }
        csv.flush()?;
        Ok(())
    }

    fn write_jsonl<W: Write>(&self, mut writer: W, report: &RiskReport) -> Result<()> {
        let columns = self.columns();
        for row in &report.rows {
            let object: Map<String, Value> = columns.iter().cloned().zip(self.cells(row)).collect();
            serde_json::to_writer(&mut writer, &object)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Cell values for one row, aligned with [`columns`](Self::columns)
    fn cells(&self, row: &RiskReportRow) -> Vec<Value> {
        let record = &row.record;
        let mut cells = vec![
            Value::from(record.invoice_no.as_str()),
            record.vendor.as_deref().map_or(Value::Null, Value::from),
            record.department.as_deref().map_or(Value::Null, Value::from),
            Value::from(record.amount),
            Value::from(record.date.format("%Y-%m-%d").to_string()),
            Value::from(record.time.format("%H:%M:%S").to_string()),
        ];

        if self.include_features {
            cells.push(Value::from(row.features.day_of_week));
            cells.push(Value::from(row.features.seconds_since_midnight));
            cells.push(Value::from(row.features.rolling_vendor_spend));
            cells.push(Value::from(row.features.invoice_deviation));
        }

        if self.include_detector_scores {
            for kind in DetectorKind::ALL {
                match row.detector_scores.get(&kind) {
                    Some(score) => {
                        cells.push(Value::from(score.score));
                        cells.push(Value::from(score.label.as_i8()));
                    }
                    None => {
                        cells.push(Value::Null);
                        cells.push(Value::Null);
                    }
                }
            }
        }

        cells.push(Value::from(row.fraud_risk_score));
        cells.push(Value::from(row.risk_level.as_str()));
        cells
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
