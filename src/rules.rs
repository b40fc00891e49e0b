//! Deterministic rule checks over the raw batch.
//!
//! Advisory counters only; they never feed the risk score.

use crate::config::RulesConfig;
use crate::types::invoice::InvoiceRecord;
use chrono::NaiveTime;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Rule-check counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    /// Distinct invoice numbers that appear more than once
    pub duplicate_invoices: usize,
    pub high_value: usize,
    pub off_hours: usize,
    pub weekend: usize,
}

#[derive(Debug, Clone)]
pub struct RuleChecker {
    high_value_threshold: f64,
    business_start: NaiveTime,
    business_end: NaiveTime,
}

impl RuleChecker {
    pub fn new(config: &RulesConfig) -> Self {
        Self {
            high_value_threshold: config.high_value_threshold,
            business_start: config.business_hours_start,
            business_end: config.business_hours_end,
        }
    }

    pub fn is_high_value(&self, record: &InvoiceRecord) -> bool {
        record.amount > self.high_value_threshold
    }

    /// Strictly outside the business-hours window
    pub fn is_off_hours(&self, record: &InvoiceRecord) -> bool {
        record.time < self.business_start || record.time > self.business_end
    }

    pub fn check(&self, records: &[InvoiceRecord]) -> RuleSummary {
        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for record in records {
            *occurrences.entry(record.invoice_no.as_str()).or_insert(0) += 1;
        }

        let summary = RuleSummary {
            duplicate_invoices: occurrences.values().filter(|&&n| n > 1).count(),
            high_value: records.iter().filter(|r| self.is_high_value(r)).count(),
            off_hours: records.iter().filter(|r| self.is_off_hours(r)).count(),
            weekend: records.iter().filter(|r| r.is_weekend()).count(),
        };

        info!(
            duplicates = summary.duplicate_invoices,
            high_value = summary.high_value,
            off_hours = summary.off_hours,
            weekend = summary.weekend,
            "Rule checks complete"
        );
        summary
    }
}

impl Default for RuleChecker {
    fn default() -> Self {
        Self::new(&RulesConfig::default())
    }
}
