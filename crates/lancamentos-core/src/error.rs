// crates/lancamentos-core/src/error.rs

use thiserror::Error;

use crate::normalize::{AMOUNT_PRECISION, AMOUNT_SCALE};
use crate::period::PeriodError;
use crate::validation::ValidationReport;
use crate::warehouse::UnresolvedFact;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("required columns not found: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    #[error("{0}")]
    Validation(ValidationReport),

    #[error("row {row}: invalid amount '{value}': {source}")]
    InvalidAmount {
        row: usize,
        value: String,
        #[source]
        source: AmountError,
    },

    #[error(transparent)]
    InvalidPeriod(#[from] PeriodError),

    #[error("{} staged rows do not resolve to their dimensions: {}", .unresolved.len(), summarize_unresolved(.unresolved))]
    ReferentialIntegrity { unresolved: Vec<UnresolvedFact> },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Why an amount cell cannot be carried exactly by the `NUMERIC(15, 2)`
/// warehouse columns.
#[derive(Error, Debug)]
pub enum AmountError {
    #[error("not a decimal number: {0}")]
    Parse(#[from] rust_decimal::Error),

    #[error("more than {} fractional digits", AMOUNT_SCALE)]
    TooManyFractionalDigits,

    #[error("absolute value must be below 10^{}", AMOUNT_PRECISION - AMOUNT_SCALE)]
    OutOfRange,
}

/// A database round-trip that failed, tagged with the warehouse operation
/// that issued it.
#[derive(Error, Debug)]
#[error("{operation} failed: {source}")]
pub struct StorageError {
    pub operation: &'static str,
    #[source]
    pub source: sqlx::Error,
}

impl StorageError {
    pub fn new(operation: &'static str, source: sqlx::Error) -> Self {
        Self { operation, source }
    }
}

fn summarize_unresolved(unresolved: &[UnresolvedFact]) -> String {
    const SHOWN: usize = 5;
    let mut parts: Vec<String> = unresolved
        .iter()
        .take(SHOWN)
        .map(|fact| {
            format!(
                "row {} ({} '{}', hash {})",
                fact.row, fact.dimension, fact.natural_key, fact.content_hash
            )
        })
        .collect();
    if unresolved.len() > SHOWN {
        parts.push(format!("and {} more", unresolved.len() - SHOWN));
    }
    parts.join("; ")
}

pub type Result<T> = std::result::Result<T, EtlError>;
