use std::collections::BTreeSet;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::period::{Period, PeriodError};
use crate::warehouse::{Dimension, TimeRow, Warehouse};

/// New rows inserted into each dimension by one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DimensionReport {
    pub types: u64,
    pub groups: u64,
    pub categories: u64,
    pub classifications: u64,
    pub periods: u64,
}

impl DimensionReport {
    pub fn total(&self) -> u64 {
        self.types + self.groups + self.categories + self.classifications + self.periods
    }
}

/// One time row per distinct (year, month), ordered chronologically. Fails
/// on the first period that does not parse.
pub fn derive_time_rows<S: AsRef<str>>(periods: &[S]) -> std::result::Result<Vec<TimeRow>, PeriodError> {
    let mut distinct = BTreeSet::new();
    for value in periods {
        distinct.insert(value.as_ref().parse::<Period>()?);
    }
    Ok(distinct.iter().map(Period::time_row).collect())
}

/// Brings every dimension up to date with staging.
///
/// Periods are parsed before anything is written, so a malformed period
/// leaves every dimension untouched. The categorical dimensions follow the
/// type, group, category chain; classification and time stand alone.
pub async fn resolve_dimensions<W>(warehouse: &W) -> Result<DimensionReport>
where
    W: Warehouse + ?Sized,
{
    let periods = warehouse.staged_periods().await?;
    let time_rows = derive_time_rows(&periods)?;

    let report = DimensionReport {
        types: warehouse.upsert_types().await?,
        groups: warehouse.upsert_groups().await?,
        categories: warehouse.upsert_categories().await?,
        classifications: warehouse.upsert_classifications().await?,
        periods: warehouse.upsert_time(&time_rows).await?,
    };

    for (dimension, inserted) in [
        (Dimension::Type, report.types),
        (Dimension::Group, report.groups),
        (Dimension::Category, report.categories),
        (Dimension::Classification, report.classifications),
        (Dimension::Time, report.periods),
    ] {
        info!(dimension = %dimension, table = dimension.table(), inserted, "Dimension resolved");
    }

    Ok(report)
}
