//! Error types for profile construction and clustering.

use thiserror::Error;

/// Errors that abort a clustering run.
///
/// A division with too little history is not an error at run level; it is
/// excluded and reported through [`crate::profile::ExcludedDivision`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClusterError {
    /// A transaction record is missing a required field or holds an invalid value.
    #[error(
        "Invalid input{}: {}",
        .row.map(|r| format!(" at row {r}")).unwrap_or_default(),
        .message
    )]
    InvalidInput {
        /// Zero-based row of the offending record, when known
        row: Option<usize>,
        /// What is wrong with the record
        message: String,
    },

    /// A configuration value is out of range or inconsistent with the population.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Description of what's wrong with the parameter
        message: String,
    },

    /// Not enough points to run the clusterer at all.
    #[error("Insufficient data: required {required}, actual {actual}")]
    InsufficientData {
        /// Minimum required points
        required: usize,
        /// Points actually provided
        actual: usize,
    },

    /// A point or feature row does not match the matrix dimensionality.
    #[error("Dimension mismatch: expected {expected}, actual {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension provided
        actual: usize,
    },

    /// A group-by or frame extraction over the transaction table failed.
    #[error("Aggregation failed: {message}")]
    Aggregation {
        /// Message from the data frame engine
        message: String,
    },
}

impl From<polars::prelude::PolarsError> for ClusterError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        Self::Aggregation {
            message: err.to_string(),
        }
    }
}

impl ClusterError {
    /// Create an InvalidInput error tied to a record row.
    pub fn invalid_input(row: Option<usize>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            row,
            message: message.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create an InsufficientData error.
    pub fn insufficient_data(required: usize, actual: usize) -> Self {
        Self::InsufficientData { required, actual }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }
}

/// Common result type used throughout the library.
pub type Result<T> = std::result::Result<T, ClusterError>;
