//! Type definitions for the scoring pipeline

pub mod invoice;
pub mod report;

pub use invoice::{InvoiceRecord, RawInvoiceRow};
pub use report::{RiskLevel, RiskLevelThresholds, RiskReport, RiskReportRow};
