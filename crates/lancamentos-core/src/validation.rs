use std::fmt;

use csv::StringRecord;
use serde::Serialize;

use crate::error::{EtlError, Result};
use crate::record::{Field, RawRow};

const UTF8_BOM: char = '\u{feff}';

/// Position of every required column within the CSV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    positions: [usize; 7],
}

impl ColumnMap {
    /// Locates each required column, reporting all absent columns at once.
    pub fn from_headers(headers: &StringRecord) -> Result<Self> {
        let mut positions = [0usize; 7];
        let mut missing = Vec::new();

        for field in Field::ALL {
            let position = headers
                .iter()
                .position(|header| field.matches_header(header.trim_start_matches(UTF8_BOM)));
            match position {
                Some(index) => positions[field.index()] = index,
                None => missing.push(field.header().to_string()),
            }
        }

        if missing.is_empty() {
            Ok(Self { positions })
        } else {
            Err(EtlError::MissingColumns { columns: missing })
        }
    }

    pub fn position(&self, field: Field) -> usize {
        self.positions[field.index()]
    }

    /// Extracts the required columns of one data row. Short rows leave the
    /// trailing fields absent rather than failing.
    pub fn extract(&self, row: usize, record: &StringRecord) -> RawRow {
        let mut raw = RawRow::new(row);
        for field in Field::ALL {
            if let Some(value) = record.get(self.position(field)) {
                raw.set(field, value);
            }
        }
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub missing: Vec<Field>,
}

/// Every row of a batch that lacks required values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub total_rows: usize,
    pub issues: Vec<RowIssue>,
}

impl ValidationReport {
    pub fn offending_rows(&self) -> Vec<usize> {
        self.issues.iter().map(|issue| issue.row).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} rows are missing required values",
            self.issues.len(),
            self.total_rows
        )?;
        for (i, issue) in self.issues.iter().enumerate() {
            let fields: Vec<&str> = issue.missing.iter().map(Field::header).collect();
            let separator = if i == 0 { ": " } else { "; " };
            write!(f, "{separator}row {} ({})", issue.row, fields.join(", "))?;
        }
        Ok(())
    }
}

/// Checks every row; the batch is rejected as a whole if any row is missing
/// a required value.
pub fn validate_rows(rows: &[RawRow]) -> std::result::Result<(), ValidationReport> {
    let issues: Vec<RowIssue> = rows
        .iter()
        .filter_map(|raw| {
            let missing = raw.missing_fields();
            (!missing.is_empty()).then(|| RowIssue {
                row: raw.row,
                missing,
            })
        })
        .collect();

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationReport {
            total_rows: rows.len(),
            issues,
        })
    }
}
