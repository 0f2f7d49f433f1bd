//! Tabular input and output using Polars
//!
//! Reads purchasing-card transactions from CSV into [`RawTransaction`]s and
//! writes clustering reports back out as CSV or JSON.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::error::ClusterError;
use crate::pipeline::ClusteringReport;
use crate::transaction::RawTransaction;

/// Column holding the division identifier
pub const DIVISION_COLUMN: &str = "division";
/// Column holding the transaction date
pub const DATE_COLUMN: &str = "date";
/// Column holding the transaction amount
pub const AMOUNT_COLUMN: &str = "amount";
/// Column holding the vendor name
pub const VENDOR_COLUMN: &str = "vendor";
/// Column holding the merchant category
pub const CATEGORY_COLUMN: &str = "category";

/// Load transactions from a CSV file with a header row
///
/// Every column is read as text and parsed here, so a malformed value is
/// reported with its row. Empty cells become `None` and are rejected later by
/// [`crate::transaction::validate_transactions`].
///
/// # Arguments
/// * `path` - Path to the CSV file
///
/// # Returns
/// * One `RawTransaction` per data row, in file order
pub fn load_transactions(path: impl AsRef<Path>) -> anyhow::Result<Vec<RawTransaction>> {
    let path = path.as_ref();
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .with_context(|| format!("failed to open {}", path.display()))?
        .collect()
        .with_context(|| format!("failed to read CSV from {}", path.display()))?;

    let divisions = text_column(&df, DIVISION_COLUMN)?;
    let dates = text_column(&df, DATE_COLUMN)?;
    let amounts = text_column(&df, AMOUNT_COLUMN)?;
    let vendors = text_column(&df, VENDOR_COLUMN)?;
    let categories = text_column(&df, CATEGORY_COLUMN)?;

    let mut rows = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let date = match cell(dates, row) {
            Some(text) => Some(parse_date(text).ok_or_else(|| {
                ClusterError::invalid_input(Some(row), format!("date '{text}' is not a recognised date"))
            })?),
            None => None,
        };
        let amount = match cell(amounts, row) {
            Some(text) => Some(text.parse::<f64>().map_err(|_| {
                ClusterError::invalid_input(Some(row), format!("amount '{text}' is not a number"))
            })?),
            None => None,
        };

        rows.push(RawTransaction {
            division_id: cell(divisions, row).map(str::to_string),
            date,
            amount,
            vendor: cell(vendors, row).map(str::to_string),
            category: cell(categories, row).map(str::to_string),
        });
    }

    tracing::info!(rows = rows.len(), path = %path.display(), "loaded transactions");
    Ok(rows)
}

fn text_column<'a>(df: &'a DataFrame, name: &str) -> anyhow::Result<&'a StringChunked> {
    df.column(name)
        .with_context(|| format!("input is missing required column '{name}'"))?
        .str()
        .with_context(|| format!("column '{name}' is not text"))
}

/// Trimmed cell text; blank cells count as missing.
fn cell(column: &StringChunked, row: usize) -> Option<&str> {
    column.get(row).map(str::trim).filter(|s| !s.is_empty())
}

/// Parse `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` (or with a space) and RFC 3339 dates.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date());
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|datetime| datetime.date_naive())
}

/// Flat per-division records as a DataFrame
///
/// The five fixed columns are followed by one column per profile feature,
/// null for excluded divisions.
pub fn report_frame(report: &ClusteringReport) -> anyhow::Result<DataFrame> {
    let records = report.records();
    let mut columns = vec![
        Series::new(
            "division_id",
            records.iter().map(|r| r.division_id.clone()).collect::<Vec<_>>(),
        ),
        Series::new("cluster", records.iter().map(|r| r.cluster_id).collect::<Vec<_>>()),
        Series::new("confidence", records.iter().map(|r| r.confidence).collect::<Vec<_>>()),
        Series::new(
            "outlier_score",
            records.iter().map(|r| r.outlier_score).collect::<Vec<_>>(),
        ),
        Series::new("excluded", records.iter().map(|r| r.excluded).collect::<Vec<_>>()),
    ];
    for (j, name) in report.feature_names.iter().enumerate() {
        let values: Vec<Option<f64>> = records
            .iter()
            .map(|r| r.profile.as_ref().and_then(|p| p.get(j).copied()))
            .collect();
        columns.push(Series::new(name.as_str(), values));
    }
    let df = DataFrame::new(columns).context("report columns do not line up")?;
    Ok(df)
}

/// Write one row per division: id, cluster (-1 for noise), confidence,
/// outlier score (empty for excluded divisions), the excluded flag and the
/// raw profile values
pub fn write_report_csv(report: &ClusteringReport, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let mut df = report_frame(report)?;
    let mut file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}

/// Write the full report, including cluster summaries and the run configuration
pub fn write_report_json(report: &ClusteringReport, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}
