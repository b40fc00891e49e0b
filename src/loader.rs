//! CSV invoice loader

use crate::error::{PipelineError, Result};
use crate::types::invoice::{InvoiceRecord, RawInvoiceRow, REQUIRED_COLUMNS};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Reads a batch of invoices from CSV.
///
/// The header must contain every required column (after trimming); extra
/// columns are ignored. Parse failures are collected over the whole file and
/// reported together.
pub struct InvoiceLoader;

impl InvoiceLoader {
    /// Load every invoice from the file at `path`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<InvoiceRecord>> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let records = Self::from_reader(file)?;
        info!(path = %path.display(), records = records.len(), "Invoices loaded");
        Ok(records)
    }

    /// Load every invoice from any CSV source
    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<InvoiceRecord>> {
        let mut reader = ReaderBuilder::new().trim(Trim::Headers).from_reader(reader);
        let headers = reader.headers()?.clone();
        check_schema(&headers)?;

        let mut records = Vec::new();
        let mut failures = Vec::new();

        for row in reader.records() {
            let row = row?;
            let line = row.position().map_or(0, |p| p.line());
            let raw: RawInvoiceRow = row.deserialize(Some(&headers))?;
            let id = if raw.invoice_no.trim().is_empty() {
                format!("line {}", line)
            } else {
                raw.invoice_no.trim().to_string()
            };

            match InvoiceRecord::try_from(raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(record = %id, error = %e, "Unparseable invoice row");
                    failures.push(id);
                }
            }
        }

        if !failures.is_empty() {
            return Err(PipelineError::DataQuality {
                message: format!("{} rows have unparseable amount, date or time", failures.len()),
                records: failures,
            });
        }

        Ok(records)
    }
}

fn check_schema(headers: &StringRecord) -> Result<()> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| column.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Schema { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "Invoice No,Vendor Name,Department,Amount,Date,Time\n";

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "{}INV-1,Acme,Ops,120.50,2024-03-04,09:15:00\nINV-2,,IT,99,03/05/2024,23:59:59\n",
            HEADER
        )
        .unwrap();

        let records = InvoiceLoader::from_path(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].invoice_no, "INV-1");
        assert_eq!(records[0].amount, 120.5);
        assert_eq!(records[1].vendor, None);
        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(records[1].time, NaiveTime::from_hms_opt(23, 59, 59).unwrap());
    }

    #[test]
    fn test_extra_columns_and_padded_headers() {
        let data = " Invoice No ,Vendor Name,Notes,Department,Amount,Date,Time\n\
                    INV-9,Acme,rush,Ops,10,2024-01-02,08:00:00\n";
        let records = InvoiceLoader::from_reader(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].department.as_deref(), Some("Ops"));
    }

    #[test]
    fn test_missing_columns_are_schema_error() {
        let data = "Invoice No,Vendor Name,Amount,Date\nINV-1,Acme,10,2024-01-02\n";
        match InvoiceLoader::from_reader(data.as_bytes()) {
            Err(PipelineError::Schema { missing }) => {
                assert_eq!(missing, vec!["Department".to_string(), "Time".to_string()])
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_failures_are_collected() {
        let data = format!(
            "{}INV-1,Acme,Ops,abc,2024-01-02,08:00:00\n\
             INV-2,Acme,Ops,10,2024-01-02,08:00:00\n\
             ,Acme,Ops,10,not-a-date,08:00:00\n\
             INV-4,Acme,Ops,10,2024-01-02,8pm\n",
            HEADER
        );
        match InvoiceLoader::from_reader(data.as_bytes()) {
            Err(PipelineError::DataQuality { records, .. }) => {
                assert_eq!(records, vec!["INV-1", "line 4", "INV-4"]);
            }
            other => panic!("expected data quality error, got {:?}", other),
        }
    }

    #[test]
    fn test_header_only_file_is_empty_batch() {
        let records = InvoiceLoader::from_reader(HEADER.as_bytes()).unwrap();
        assert!(records.is_empty());
    }
}
