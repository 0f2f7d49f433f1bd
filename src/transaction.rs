//! Purchasing-card transaction records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};

/// One row as delivered by the ingestion collaborator. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub division_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub vendor: Option<String>,
    pub category: Option<String>,
}

/// A validated purchase. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    division_id: String,
    date: NaiveDate,
    amount: f64,
    vendor: String,
    category: String,
}

impl TransactionRecord {
    /// Build a record, rejecting blank identifiers and negative or non-finite amounts.
    pub fn new(
        division_id: impl Into<String>,
        date: NaiveDate,
        amount: f64,
        vendor: impl Into<String>,
        category: impl Into<String>,
    ) -> Result<Self> {
        let record = Self {
            division_id: division_id.into().trim().to_string(),
            date,
            amount,
            vendor: vendor.into().trim().to_string(),
            category: category.into().trim().to_string(),
        };
        record.check(None)?;
        Ok(record)
    }

    fn check(&self, row: Option<usize>) -> Result<()> {
        if self.division_id.is_empty() {
            return Err(ClusterError::invalid_input(row, "division id is blank"));
        }
        if self.vendor.is_empty() {
            return Err(ClusterError::invalid_input(row, "vendor is blank"));
        }
        if self.category.is_empty() {
            return Err(ClusterError::invalid_input(row, "category is blank"));
        }
        if !self.amount.is_finite() {
            return Err(ClusterError::invalid_input(
                row,
                format!("amount {} is not finite", self.amount),
            ));
        }
        if self.amount < 0.0 {
            return Err(ClusterError::invalid_input(
                row,
                format!("amount {} is negative", self.amount),
            ));
        }
        Ok(())
    }

    pub fn division_id(&self) -> &str {
        &self.division_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl RawTransaction {
    /// Convert into a validated record, naming the first missing field.
    pub fn into_record(self, row: Option<usize>) -> Result<TransactionRecord> {
        let missing = |field: &str| ClusterError::invalid_input(row, format!("{field} is missing"));

        let record = TransactionRecord {
            division_id: self.division_id.ok_or_else(|| missing("division"))?.trim().to_string(),
            date: self.date.ok_or_else(|| missing("date"))?,
            amount: self.amount.ok_or_else(|| missing("amount"))?,
            vendor: self.vendor.ok_or_else(|| missing("vendor"))?.trim().to_string(),
            category: self.category.ok_or_else(|| missing("category"))?.trim().to_string(),
        };
        record.check(row)?;
        Ok(record)
    }
}

/// Validate a whole table. The first bad row aborts the run.
pub fn validate_transactions(rows: Vec<RawTransaction>) -> Result<Vec<TransactionRecord>> {
    rows.into_iter()
        .enumerate()
        .map(|(row, raw)| raw.into_record(Some(row)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawTransaction {
        RawTransaction {
            division_id: Some(" Parks, Forestry & Recreation ".to_string()),
            date: NaiveDate::from_ymd_opt(2014, 3, 12),
            amount: Some(42.5),
            vendor: Some("HOME DEPOT".to_string()),
            category: Some("Hardware".to_string()),
        }
    }

    #[test]
    fn test_complete_row_converts_and_trims() {
        let record = raw().into_record(Some(0)).unwrap();
        assert_eq!(record.division_id(), "Parks, Forestry & Recreation");
        assert_eq!(record.amount(), 42.5);
        assert_eq!(record.vendor(), "HOME DEPOT");
    }

    #[test]
    fn test_missing_fields_are_invalid_input() {
        let cases: Vec<(RawTransaction, &str)> = vec![
            (RawTransaction { division_id: None, ..raw() }, "division is missing"),
            (RawTransaction { date: None, ..raw() }, "date is missing"),
            (RawTransaction { amount: None, ..raw() }, "amount is missing"),
            (RawTransaction { vendor: None, ..raw() }, "vendor is missing"),
            (RawTransaction { category: None, ..raw() }, "category is missing"),
            (
                RawTransaction { division_id: Some("   ".to_string()), ..raw() },
                "division id is blank",
            ),
            (RawTransaction { amount: Some(-1.0), ..raw() }, "negative"),
            (RawTransaction { amount: Some(f64::NAN), ..raw() }, "not finite"),
        ];

        for (row, needle) in cases {
            let err = row.into_record(Some(7)).unwrap_err();
            assert!(matches!(err, ClusterError::InvalidInput { row: Some(7), .. }));
            assert!(err.to_string().contains(needle), "{} should mention {}", err, needle);
        }
    }

    #[test]
    fn test_validate_transactions_reports_first_bad_row() {
        let rows = vec![raw(), raw(), RawTransaction { amount: None, ..raw() }];
        let err = validate_transactions(rows).unwrap_err();
        assert_eq!(
            err,
            ClusterError::invalid_input(Some(2), "amount is missing")
        );
    }

    #[test]
    fn test_zero_amount_is_allowed() {
        let date = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        assert!(TransactionRecord::new("Fire Services", date, 0.0, "ACME", "Supplies").is_ok());
        assert!(TransactionRecord::new("", date, 1.0, "ACME", "Supplies").is_err());
    }
}
