//! Locale-aware amount parsing and the content hash used as the fact
//! table's deduplication key.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{AmountError, EtlError, Result};
use crate::record::{Field, RawRow, RecordFields, TransactionRecord};

/// Fractional digits carried by amounts in staging and in the fact table.
pub const AMOUNT_SCALE: u32 = 2;

/// Total digits of the warehouse amount columns.
pub const AMOUNT_PRECISION: u32 = 15;

/// Parses an amount written with `.` as thousands separator and `,` as
/// decimal separator (`"1.234,56"`) into an exact decimal.
///
/// Values are never rounded: an amount needing more than [`AMOUNT_SCALE`]
/// fractional digits, or too large for the warehouse columns, is rejected.
/// Trailing fractional zeros do not count, so `"1,230"` is `1.23`.
///
/// A blank string is zero. Callers must validate presence first; the zero
/// default only applies to rows that already passed validation.
pub fn parse_amount(raw: &str) -> std::result::Result<Decimal, AmountError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let canonical = trimmed.replace('.', "").replace(',', ".");
    let value = Decimal::from_str(&canonical)?.normalize();

    if value.scale() > AMOUNT_SCALE {
        return Err(AmountError::TooManyFractionalDigits);
    }
    let limit = Decimal::from(10_i64.pow(AMOUNT_PRECISION - AMOUNT_SCALE));
    if value.abs() >= limit {
        return Err(AmountError::OutOfRange);
    }
    Ok(value)
}

/// Pads to [`AMOUNT_SCALE`] digits, so `5000`, `5000.0` and `5000.00`
/// render identically. Values with more fractional digits keep them; this
/// never rounds.
pub fn canonical_amount(value: Decimal) -> Decimal {
    let mut amount = value.normalize();
    if amount.scale() < AMOUNT_SCALE {
        amount.rescale(AMOUNT_SCALE);
    }
    amount
}

/// MD5 over `type-group-category-period-description-amount`.
///
/// Type, group, category and description are trimmed and lower-cased, the
/// period is only trimmed and the amount is rendered at its canonical scale.
/// Classification does not take part in the hash.
///
/// Descriptions are case-folded: two transactions that differ only by the
/// casing of their description produce the same hash and are loaded once.
pub fn content_hash(fields: &RecordFields) -> String {
    let base = [
        fold(&fields.transaction_type),
        fold(&fields.group),
        fold(&fields.category),
        fields.period.trim().to_string(),
        fold(&fields.description),
        canonical_amount(fields.amount).to_string(),
    ]
    .join("-");
    format!("{:x}", md5::compute(base.as_bytes()))
}

fn fold(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Turns a validated row into a typed record. Text fields are trimmed here so
/// staging, dimensions and the hash all see the same values.
pub fn normalize_row(raw: &RawRow) -> Result<TransactionRecord> {
    let text = |field: Field| raw.get(field).unwrap_or_default().trim().to_string();

    let raw_amount = raw.get(Field::Amount).unwrap_or_default();
    let amount = parse_amount(raw_amount).map_err(|source| EtlError::InvalidAmount {
        row: raw.row,
        value: raw_amount.to_string(),
        source,
    })?;

    let fields = RecordFields {
        transaction_type: text(Field::Type),
        group: text(Field::Group),
        category: text(Field::Category),
        classification: text(Field::Classification),
        period: text(Field::Period),
        description: text(Field::Description),
        amount: canonical_amount(amount),
    };

    Ok(TransactionRecord::new(raw.row, fields))
}
