//! Synthetic Invoice Generator
//!
//! Writes a seeded batch of invoices with a share of injected anomalies
//! (large amounts, off-hour or weekend postings, duplicate numbers) for
//! exercising the scoring pipeline.

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

const VENDORS: [(&str, f64); 8] = [
    ("Acme Supplies", 1_200.0),
    ("Globex Logistics", 4_500.0),
    ("Initech Software", 2_800.0),
    ("Umbrella Facilities", 900.0),
    ("Stark Components", 7_500.0),
    ("Wayne Consulting", 12_000.0),
    ("Hooli Cloud", 3_300.0),
    ("Vandelay Imports", 650.0),
];

const DEPARTMENTS: [&str; 5] = ["Finance", "Operations", "IT", "Marketing", "Facilities"];

/// Generate a synthetic invoice CSV
#[derive(Debug, Parser)]
#[command(name = "generate-invoices", version)]
struct Args {
    /// Output CSV path
    #[arg(long, default_value = "synthetic_invoices.csv")]
    output: PathBuf,

    /// Number of invoices
    #[arg(long, default_value_t = 1000)]
    count: usize,

    /// Share of invoices given an injected anomaly
    #[arg(long, default_value_t = 0.05)]
    anomaly_rate: f64,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// First invoice date (YYYY-MM-DD)
    #[arg(long, default_value = "2024-01-01")]
    start_date: NaiveDate,

    /// Number of calendar days covered
    #[arg(long, default_value_t = 60)]
    days: i64,
}

#[derive(Debug, Clone, Serialize)]
struct InvoiceRow {
    #[serde(rename = "Invoice No")]
    invoice_no: String,
    #[serde(rename = "Vendor Name")]
    vendor: String,
    #[serde(rename = "Department")]
    department: String,
    #[serde(rename = "Amount")]
    amount: f64,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Time")]
    time: String,
}

#[derive(Debug, Clone, Copy)]
enum Anomaly {
    LargeAmount,
    OffHours,
    Weekend,
    Duplicate,
}

/// Invoice generator for testing
struct InvoiceGenerator {
    rng: StdRng,
    start_date: NaiveDate,
    days: i64,
    counter: u64,
}

impl InvoiceGenerator {
    fn new(seed: u64, start_date: NaiveDate, days: i64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            start_date,
            days: days.max(1),
            counter: 0,
        }
    }

    /// A routine invoice: weekday, business hours, near the vendor's usual amount
    fn generate_regular(&mut self) -> InvoiceRow {
        self.counter += 1;
        let (vendor, typical) = VENDORS[self.rng.gen_range(0..VENDORS.len())];
        let amount = typical * self.rng.gen_range(0.6..1.4);
        let date = self.weekday_date();
        let time = self.time_between(8, 18);

        InvoiceRow {
            invoice_no: format!("INV-{:06}", self.counter),
            vendor: vendor.to_string(),
            department: DEPARTMENTS[self.rng.gen_range(0..DEPARTMENTS.len())].to_string(),
            amount: round_cents(amount),
            date: date.format("%Y-%m-%d").to_string(),
            time: time.format("%H:%M:%S").to_string(),
        }
    }

    fn generate_anomalous(&mut self, previous: Option<&InvoiceRow>) -> InvoiceRow {
        let kind = match self.rng.gen_range(0..4) {
            0 => Anomaly::LargeAmount,
            1 => Anomaly::OffHours,
            2 => Anomaly::Weekend,
            _ => Anomaly::Duplicate,
        };

        let mut row = self.generate_regular();
        match kind {
            Anomaly::LargeAmount => {
                row.amount = round_cents(self.rng.gen_range(80_000.0..250_000.0));
            }
            Anomaly::OffHours => {
                let time = if self.rng.gen_bool(0.5) {
                    self.time_between(0, 5)
                } else {
                    self.time_between(21, 23)
                };
                row.time = time.format("%H:%M:%S").to_string();
            }
            Anomaly::Weekend => {
                row.date = self.weekend_date().format("%Y-%m-%d").to_string();
            }
            Anomaly::Duplicate => {
                if let Some(previous) = previous {
                    row = previous.clone();
                }
            }
        }
        row
    }

    fn random_date(&mut self) -> NaiveDate {
        self.start_date + Duration::days(self.rng.gen_range(0..self.days))
    }

    fn weekday_date(&mut self) -> NaiveDate {
        let date = self.random_date();
        match date.weekday() {
            Weekday::Sat => date - Duration::days(1),
            Weekday::Sun => date - Duration::days(2),
            _ => date,
        }
    }

    fn weekend_date(&mut self) -> NaiveDate {
        let date = self.random_date();
        let to_saturday = (5 - date.weekday().num_days_from_monday() as i64).rem_euclid(7);
        date + Duration::days(to_saturday + self.rng.gen_range(0..2))
    }

    /// Uniform time from `start_hour`:00:00 up to `end_hour`:59:59
    fn time_between(&mut self, start_hour: u32, end_hour: u32) -> NaiveTime {
        let seconds = self.rng.gen_range(start_hour * 3600..(end_hour + 1) * 3600);
        NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or_default()
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_invoices=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(
        output = %args.output.display(),
        count = args.count,
        anomaly_rate = args.anomaly_rate,
        seed = args.seed,
        "Generating synthetic invoices"
    );

    let rate = args.anomaly_rate.clamp(0.0, 1.0);
    let mut generator = InvoiceGenerator::new(args.seed, args.start_date, args.days);
    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut previous: Option<InvoiceRow> = None;
    let mut anomalies = 0;
    for _ in 0..args.count {
        let row = if generator.rng.gen_bool(rate) {
            anomalies += 1;
            generator.generate_anomalous(previous.as_ref())
        } else {
            generator.generate_regular()
        };
        writer.serialize(&row)?;
        previous = Some(row);
    }
    writer.flush()?;

    info!(
        "Completed! Wrote {} invoices ({} with injected anomalies)",
        args.count, anomalies
    );
    Ok(())
}
