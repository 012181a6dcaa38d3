use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::normalize::content_hash;

/// A required input column. Every column is recognised under its English
/// header and under the Portuguese header of the monthly spreadsheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Description,
    Type,
    Group,
    Category,
    Classification,
    Period,
    Amount,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Description,
        Field::Type,
        Field::Group,
        Field::Category,
        Field::Classification,
        Field::Period,
        Field::Amount,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            Field::Description => "Description",
            Field::Type => "Type",
            Field::Group => "Group",
            Field::Category => "Category",
            Field::Classification => "Classification",
            Field::Period => "Date",
            Field::Amount => "Value",
        }
    }

    pub fn localized_header(&self) -> &'static str {
        match self {
            Field::Description => "Descrição",
            Field::Type => "Tipo",
            Field::Group => "Grupo",
            Field::Category => "Categoria",
            Field::Classification => "Classificação",
            Field::Period => "Data",
            Field::Amount => "Valor",
        }
    }

    pub fn matches_header(&self, header: &str) -> bool {
        let header = header.trim();
        header == self.header() || header == self.localized_header()
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// One CSV data row before validation, with the raw text of each required
/// column. `row` is the 1-based data row number (the header is not counted).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub row: usize,
    values: [Option<String>; 7],
}

impl RawRow {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            values: Default::default(),
        }
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.values[field.index()] = Some(value.into());
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    /// Fields that are absent, empty or whitespace only.
    pub fn missing_fields(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|field| is_blank(self.get(*field)))
            .collect()
    }
}

pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Canonical business content of a transaction: trimmed text and an amount
/// carried at two fractional digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFields {
    pub transaction_type: String,
    pub group: String,
    pub category: String,
    pub classification: String,
    pub period: String,
    pub description: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub row: usize,
    pub fields: RecordFields,
    content_hash: String,
}

impl TransactionRecord {
    pub fn new(row: usize, fields: RecordFields) -> Self {
        let content_hash = content_hash(&fields);
        Self {
            row,
            fields,
            content_hash,
        }
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}
