//! Invoice record data structures

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Input column headers, in the order the writer emits them
pub const INVOICE_NO: &str = "Invoice No";
pub const VENDOR_NAME: &str = "Vendor Name";
pub const DEPARTMENT: &str = "Department";
pub const AMOUNT: &str = "Amount";
pub const DATE: &str = "Date";
pub const TIME: &str = "Time";

pub const REQUIRED_COLUMNS: [&str; 6] = [INVOICE_NO, VENDOR_NAME, DEPARTMENT, AMOUNT, DATE, TIME];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const TIME_FORMAT: &str = "%H:%M:%S";

/// One invoice as read from the source file, before any parsing
#[derive(Debug, Clone, Deserialize)]
pub struct RawInvoiceRow {
    #[serde(rename = "Invoice No")]
    pub invoice_no: String,

    #[serde(rename = "Vendor Name")]
    pub vendor: String,

    #[serde(rename = "Department")]
    pub department: String,

    #[serde(rename = "Amount")]
    pub amount: String,

    #[serde(rename = "Date")]
    pub date: String,

    #[serde(rename = "Time")]
    pub time: String,
}

/// A field of a raw row that could not be parsed
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    Amount(String),
    Date(String),
    Time(String),
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldError::Amount(v) => write!(f, "non-numeric amount '{}'", v),
            FieldError::Date(v) => write!(f, "unparseable date '{}'", v),
            FieldError::Time(v) => write!(f, "unparseable time '{}'", v),
        }
    }
}

/// A parsed, immutable invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Invoice number; duplicates are legitimate
    pub invoice_no: String,

    /// Vendor name, `None` when blank in the source
    pub vendor: Option<String>,

    /// Department, `None` when blank in the source
    pub department: Option<String>,

    /// Monetary amount
    pub amount: f64,

    pub date: NaiveDate,

    pub time: NaiveTime,
}

impl InvoiceRecord {
    /// Create a new invoice record with required fields
    pub fn new(
        invoice_no: impl Into<String>,
        vendor: impl Into<String>,
        department: impl Into<String>,
        amount: f64,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Self {
        let vendor: String = vendor.into();
        let department: String = department.into();
        Self {
            invoice_no: invoice_no.into(),
            vendor: non_blank(&vendor),
            department: non_blank(&department),
            amount,
            date,
            time,
        }
    }

    /// Day of week, Monday = 0 through Sunday = 6
    pub fn day_of_week(&self) -> u32 {
        self.date.weekday().num_days_from_monday()
    }

    pub fn seconds_since_midnight(&self) -> u32 {
        self.time.num_seconds_from_midnight()
    }

    pub fn is_weekend(&self) -> bool {
        self.day_of_week() >= 5
    }
}

impl TryFrom<RawInvoiceRow> for InvoiceRecord {
    type Error = FieldError;

    fn try_from(row: RawInvoiceRow) -> Result<Self, Self::Error> {
        let amount_text = row.amount.trim();
        let amount = amount_text
            .parse::<f64>()
            .map_err(|_| FieldError::Amount(amount_text.to_string()))?;
        let date = parse_date(&row.date).ok_or_else(|| FieldError::Date(row.date.clone()))?;
        let time = parse_time(&row.time).ok_or_else(|| FieldError::Time(row.time.clone()))?;

        Ok(Self {
            invoice_no: row.invoice_no.trim().to_string(),
            vendor: non_blank(&row.vendor),
            department: non_blank(&row.department),
            amount,
            date,
            time,
        })
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parse a calendar date; a full datetime is accepted and truncated.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Parse a time of day with second precision
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).ok()
}
