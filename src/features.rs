//! Feature engineering for invoice batches.
//!
//! Turns a batch of invoices into a numeric matrix shared by every detector.
//! Column layout, in order:
//!
//! - `Amount`, `DayOfWeek`, `SecondsSinceMidnight`, `RollingVendorSpend`,
//!   `InvoiceDeviation`
//! - `Vendor_<name>` one-hot columns, lexicographically smallest vendor dropped
//! - `Dept_<name>` one-hot columns, lexicographically smallest department dropped
//!
//! Rows stay in input order even though rolling spend is computed over a
//! (vendor, date) ordering.

use crate::error::{PipelineError, Result};
use crate::types::invoice::InvoiceRecord;
use crate::types::report::EngineeredFeatures;
use ndarray::{Array2, ArrayView1};
use std::collections::BTreeMap;
use tracing::debug;

/// Numeric feature columns that precede the one-hot block
pub const NUMERIC_COLUMNS: [&str; 5] = [
    "Amount",
    "DayOfWeek",
    "SecondsSinceMidnight",
    "RollingVendorSpend",
    "InvoiceDeviation",
];

/// Label used for a blank vendor or department
pub const MISSING_CATEGORY: &str = "(missing)";

const VENDOR_PREFIX: &str = "Vendor";
const DEPT_PREFIX: &str = "Dept";

/// Numeric feature matrix with named columns
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    /// Wrap a matrix; the column count must match the names.
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(PipelineError::Configuration(format!(
                "feature matrix has {} columns but {} names",
                values.ncols(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.row(index)
    }

    /// Indices of rows containing a NaN or infinite cell
    pub fn non_finite_rows(&self) -> Vec<usize> {
        self.values
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|v| !v.is_finite()))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Output of the feature builder for one batch
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub matrix: FeatureMatrix,
    /// Per-row engineered values, in input order
    pub engineered: Vec<EngineeredFeatures>,
}

/// Builds the batch feature matrix
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    rolling_window: usize,
}

impl FeatureBuilder {
    /// Create a feature builder with the given rolling window (in records).
    pub fn new(rolling_window: usize) -> Self {
        Self {
            rolling_window: rolling_window.max(1),
        }
    }

    pub fn rolling_window(&self) -> usize {
        self.rolling_window
    }

    /// Build the feature matrix for a batch.
    ///
    /// Fails with `DataQuality` when an amount is negative or non-finite, or
    /// when any cell of the finished matrix is not finite (a vendor whose
    /// amounts average to zero, for example). Nothing is imputed.
    pub fn build(&self, records: &[InvoiceRecord]) -> Result<FeatureSet> {
        let bad_amounts: Vec<String> = records
            .iter()
            .filter(|r| !r.amount.is_finite() || r.amount < 0.0)
            .map(|r| r.invoice_no.clone())
            .collect();
        if !bad_amounts.is_empty() {
            return Err(PipelineError::DataQuality {
                message: "amount must be a finite non-negative number".to_string(),
                records: bad_amounts,
            });
        }

        let rolling = self.rolling_vendor_spend(records);
        let deviation = invoice_deviation(records);

        let vendor_levels = encoded_levels(records.iter().map(|r| r.vendor.as_deref()));
        let dept_levels = encoded_levels(records.iter().map(|r| r.department.as_deref()));

        let mut columns: Vec<String> = NUMERIC_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(vendor_levels.keys().map(|l| column_name(VENDOR_PREFIX, *l)));
        columns.extend(dept_levels.keys().map(|l| column_name(DEPT_PREFIX, *l)));

        let vendor_offset = NUMERIC_COLUMNS.len();
        let dept_offset = vendor_offset + vendor_levels.len();

        let mut values = Array2::<f64>::zeros((records.len(), columns.len()));
        let mut engineered = Vec::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            let features = EngineeredFeatures {
                day_of_week: record.day_of_week(),
                seconds_since_midnight: record.seconds_since_midnight(),
                rolling_vendor_spend: rolling[i],
                invoice_deviation: deviation[i],
            };

            let mut row = values.row_mut(i);
            row[0] = record.amount;
            row[1] = features.day_of_week as f64;
            row[2] = features.seconds_since_midnight as f64;
            row[3] = features.rolling_vendor_spend;
            row[4] = features.invoice_deviation;

            if let Some(&col) = vendor_levels.get(&CategoryKey::from(record.vendor.as_deref())) {
                row[vendor_offset + col] = 1.0;
            }
            if let Some(&col) = dept_levels.get(&CategoryKey::from(record.department.as_deref())) {
                row[dept_offset + col] = 1.0;
            }

            engineered.push(features);
        }

        let matrix = FeatureMatrix { columns, values };

        let gaps = matrix.non_finite_rows();
        if !gaps.is_empty() {
            return Err(PipelineError::DataQuality {
                message: "non-finite feature values after construction".to_string(),
                records: gaps
                    .into_iter()
                    .map(|i| records[i].invoice_no.clone())
                    .collect(),
            });
        }

        debug!(
            rows = matrix.n_rows(),
            columns = matrix.n_cols(),
            vendors = vendor_levels.len() + 1,
            departments = dept_levels.len() + 1,
            "Feature matrix built"
        );

        Ok(FeatureSet { matrix, engineered })
    }

    /// Trailing per-vendor spend over the last `rolling_window` invoices
    /// ordered by date, including the invoice itself. Returned in input order.
    fn rolling_vendor_spend(&self, records: &[InvoiceRecord]) -> Vec<f64> {
        let mut order: Vec<usize> = (0..records.len()).collect();
        // stable: equal (vendor, date) keep input order
        order.sort_by(|&a, &b| {
            let ka = (CategoryKey::from(records[a].vendor.as_deref()), records[a].date);
            let kb = (CategoryKey::from(records[b].vendor.as_deref()), records[b].date);
            ka.cmp(&kb)
        });

        let mut rolling = vec![0.0; records.len()];
        let mut group_start = 0;
        for pos in 0..order.len() {
            let vendor = records[order[pos]].vendor.as_deref();
            if pos > 0 && records[order[pos - 1]].vendor.as_deref() != vendor {
                group_start = pos;
            }
            let window_start = group_start.max((pos + 1).saturating_sub(self.rolling_window));
            rolling[order[pos]] = order[window_start..=pos]
                .iter()
                .map(|&i| records[i].amount)
                .sum();
        }
        rolling
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(30)
    }
}

/// Amount divided by the batch-wide mean amount of the same vendor
fn invoice_deviation(records: &[InvoiceRecord]) -> Vec<f64> {
    let mut totals: BTreeMap<CategoryKey<'_>, (f64, usize)> = BTreeMap::new();
    for record in records {
        let entry = totals
            .entry(CategoryKey::from(record.vendor.as_deref()))
            .or_insert((0.0, 0));
        entry.0 += record.amount;
        entry.1 += 1;
    }

    records
        .iter()
        .map(|record| {
            let (sum, count) = totals[&CategoryKey::from(record.vendor.as_deref())];
            record.amount / (sum / count as f64)
        })
        .collect()
}

/// Category label ordered lexicographically, with the missing label last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct CategoryKey<'a> {
    missing: bool,
    label: Option<&'a str>,
}

impl<'a> From<Option<&'a str>> for CategoryKey<'a> {
    fn from(label: Option<&'a str>) -> Self {
        Self {
            missing: label.is_none(),
            label,
        }
    }
}

/// Map each non-reference level to its one-hot column index.
/// The first level in sort order is the reference and gets no column.
fn encoded_levels<'a>(
    labels: impl Iterator<Item = Option<&'a str>>,
) -> BTreeMap<CategoryKey<'a>, usize> {
    let mut levels: Vec<CategoryKey<'a>> = labels.map(CategoryKey::from).collect();
    levels.sort();
    levels.dedup();

    levels
        .into_iter()
        .skip(1)
        .enumerate()
        .map(|(col, key)| (key, col))
        .collect()
}

/// One-hot column name. Present labels that start with `(` or `\` get a
/// leading `\`, so no label can name the missing level's column.
fn column_name(prefix: &str, key: CategoryKey<'_>) -> String {
    match key.label {
        None => format!("{}_{}", prefix, MISSING_CATEGORY),
        Some(label) if label.starts_with(['(', '\\']) => format!("{}_\\{}", prefix, label),
        Some(label) => format!("{}_{}", prefix, label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn invoice(no: &str, vendor: &str, dept: &str, amount: f64, day: u32) -> InvoiceRecord {
        InvoiceRecord::new(
            no,
            vendor,
            dept,
            amount,
            NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            NaiveTime::from_hms_opt(10, 30, 15).unwrap(),
        )
    }

    fn column(set: &FeatureSet, name: &str) -> Vec<f64> {
        let idx = set
            .matrix
            .columns()
            .iter()
            .position(|c| c == name)
            .unwrap();
        set.matrix.values().column(idx).to_vec()
    }

    #[test]
    fn test_numeric_features() {
        let records = vec![invoice("A1", "Acme", "Ops", 250.0, 1)];
        let set = FeatureBuilder::default().build(&records).unwrap();

        assert_eq!(set.matrix.n_rows(), 1);
        assert_eq!(set.matrix.n_cols(), NUMERIC_COLUMNS.len());
        let row = set.matrix.row(0);
        assert_eq!(row[0], 250.0);
        assert_eq!(row[1], 0.0); // 2024-01-01 is a Monday
        assert_eq!(row[2], (10 * 3600 + 30 * 60 + 15) as f64);
        assert_eq!(row[3], 250.0);
        assert_eq!(row[4], 1.0);
    }

    #[test]
    fn test_rolling_spend_sorted_by_date_within_vendor() {
        // Input order is shuffled across vendors and dates
        let records = vec![
            invoice("3", "Acme", "Ops", 300.0, 3),
            invoice("x", "Bolt", "Ops", 5.0, 2),
            invoice("1", "Acme", "Ops", 100.0, 1),
            invoice("2", "Acme", "Ops", 200.0, 2),
        ];
        let set = FeatureBuilder::default().build(&records).unwrap();

        assert_eq!(column(&set, "RollingVendorSpend"), vec![600.0, 5.0, 100.0, 300.0]);
    }

    #[test]
    fn test_rolling_window_caps_history() {
        let records: Vec<InvoiceRecord> = (1..=35)
            .map(|day| invoice(&day.to_string(), "Acme", "Ops", day as f64, day.min(28)))
            .collect();
        let set = FeatureBuilder::new(30).build(&records).unwrap();
        let rolling = column(&set, "RollingVendorSpend");

        // First record: its own amount
        assert_eq!(rolling[0], 1.0);
        // Nth record for N <= 30: sum of 1..=N
        assert_eq!(rolling[29], (1..=30).sum::<u32>() as f64);
        // 35th record: sum of the trailing 30 amounts, 6..=35
        assert_eq!(rolling[34], (6..=35).sum::<u32>() as f64);
    }

    #[test]
    fn test_invoice_deviation_uses_batch_vendor_mean() {
        let records = vec![
            invoice("1", "V", "Ops", 100.0, 1),
            invoice("2", "V", "Ops", 100.0, 2),
            invoice("3", "V", "Ops", 100_000.0, 3),
        ];
        let set = FeatureBuilder::default().build(&records).unwrap();
        let deviation = column(&set, "InvoiceDeviation");

        let mean = 100_200.0 / 3.0;
        assert!((deviation[0] - 100.0 / mean).abs() < 1e-12);
        assert!(deviation[2] > 2.9);
        assert!(deviation[2] > 100.0 * deviation[0]);
    }

    #[test]
    fn test_one_hot_drops_reference_levels() {
        let records = vec![
            invoice("1", "Zeta", "Sales", 10.0, 1),
            invoice("2", "Acme", "Ops", 20.0, 2),
            invoice("3", "Moss", "Ops", 30.0, 3),
            invoice("4", "Acme", "Legal", 40.0, 4),
        ];
        let set = FeatureBuilder::default().build(&records).unwrap();

        // (3 vendors - 1) + (3 departments - 1) + numeric
        assert_eq!(set.matrix.n_cols(), 2 + 2 + NUMERIC_COLUMNS.len());
        assert_eq!(
            &set.matrix.columns()[NUMERIC_COLUMNS.len()..],
            &["Vendor_Moss", "Vendor_Zeta", "Dept_Ops", "Dept_Sales"]
        );
        assert_eq!(column(&set, "Vendor_Zeta"), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(column(&set, "Dept_Ops"), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_column_layout_is_stable() {
        let records = vec![
            invoice("1", "B", "Y", 10.0, 1),
            invoice("2", "A", "X", 20.0, 2),
            invoice("3", "C", "X", 30.0, 3),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        let first = FeatureBuilder::default().build(&records).unwrap();
        let second = FeatureBuilder::default().build(&reversed).unwrap();
        assert_eq!(first.matrix.columns(), second.matrix.columns());
    }

    #[test]
    fn test_missing_category_is_its_own_level() {
        let records = vec![
            invoice("1", "", "Ops", 10.0, 1),
            invoice("2", "Acme", "Ops", 20.0, 2),
            invoice("3", "", "Ops", 30.0, 3),
        ];
        let set = FeatureBuilder::default().build(&records).unwrap();

        assert!(set.matrix.columns().contains(&"Vendor_(missing)".to_string()));
        assert_eq!(column(&set, "Vendor_(missing)"), vec![1.0, 0.0, 1.0]);
        // Missing vendors group together for rolling spend
        assert_eq!(column(&set, "RollingVendorSpend"), vec![10.0, 20.0, 40.0]);
    }

    #[test]
    fn test_category_columns_never_collide() {
        let records = vec![
            invoice("1", "#1 Supply", "Ops", 10.0, 1),
            invoice("2", "(missing)", "Ops", 20.0, 2),
            invoice("3", "", "Ops", 30.0, 3),
            invoice("4", "\\(missing)", "Ops", 40.0, 4),
            invoice("5", "Zed", "Ops", 50.0, 5),
        ];
        let set = FeatureBuilder::default().build(&records).unwrap();

        let vendor_columns: Vec<&String> = set
            .matrix
            .columns()
            .iter()
            .filter(|c| c.starts_with("Vendor_"))
            .collect();
        assert_eq!(
            vendor_columns,
            vec![
                "Vendor_\\(missing)",
                "Vendor_Zed",
                "Vendor_\\\\(missing)",
                "Vendor_(missing)",
            ]
        );
        assert_eq!(column(&set, "Vendor_\\(missing)"), vec![0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(column(&set, "Vendor_(missing)"), vec![0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_negative_amount() {
        let records = vec![
            invoice("ok", "Acme", "Ops", 10.0, 1),
            invoice("neg", "Acme", "Ops", -5.0, 2),
        ];
        match FeatureBuilder::default().build(&records) {
            Err(PipelineError::DataQuality { records, .. }) => assert_eq!(records, vec!["neg"]),
            other => panic!("expected data quality error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_mean_vendor_is_data_quality_error() {
        let records = vec![
            invoice("z1", "Free", "Ops", 0.0, 1),
            invoice("z2", "Free", "Ops", 0.0, 2),
            invoice("p1", "Paid", "Ops", 10.0, 3),
        ];
        match FeatureBuilder::default().build(&records) {
            Err(PipelineError::DataQuality { records, .. }) => {
                assert_eq!(records, vec!["z1", "z2"])
            }
            other => panic!("expected data quality error, got {:?}", other),
        }
    }
}
