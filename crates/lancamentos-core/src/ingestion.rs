use tracing::{info, warn};

use crate::error::{EtlError, Result};
use crate::normalize::normalize_row;
use crate::record::{RawRow, TransactionRecord};
use crate::validation::{validate_rows, ColumnMap};

/// A validated, normalized batch read from one CSV file.
#[derive(Debug, Clone)]
pub struct Batch {
    pub source: String,
    pub records: Vec<TransactionRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reads the CSV, checks the header, validates every row and normalizes
/// the batch. Nothing is returned unless the whole file is valid.
pub fn read_batch(source: &str, contents: &[u8]) -> Result<Batch> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .has_headers(true)
        .flexible(true)
        .from_reader(contents);

    let columns = ColumnMap::from_headers(reader.headers()?).inspect_err(|err| {
        warn!(source, error = %err, "Rejected file header");
    })?;

    let mut rows: Vec<RawRow> = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        rows.push(columns.extract(index + 1, &record));
    }

    if let Err(report) = validate_rows(&rows) {
        warn!(
            source,
            offending_rows = report.issues.len(),
            total_rows = report.total_rows,
            "Rejected batch with missing required values"
        );
        return Err(EtlError::Validation(report));
    }

    let records = rows
        .iter()
        .map(normalize_row)
        .collect::<Result<Vec<_>>>()
        .inspect_err(|err| warn!(source, error = %err, "Failed to normalize batch"))?;

    info!(source, rows = records.len(), "Batch validated and normalized");

    Ok(Batch {
        source: source.to_string(),
        records,
    })
}
