//! Storage seam for the star schema. Each method is one phase of a run and
//! commits on its own.

mod memory;
mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::StorageError;
use crate::record::TransactionRecord;

pub use memory::{FactRow, MemoryWarehouse};
pub use postgres::PostgresWarehouse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Type,
    Group,
    Category,
    Classification,
    Time,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Type => "type",
            Dimension::Group => "group",
            Dimension::Category => "category",
            Dimension::Classification => "classification",
            Dimension::Time => "time",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Dimension::Type => "dim_tipo",
            Dimension::Group => "dim_grupo",
            Dimension::Category => "dim_categoria",
            Dimension::Classification => "dim_classificacao",
            Dimension::Time => "dim_tempo",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the time dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRow {
    pub year: i32,
    pub month: u32,
    pub week: u32,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
}

/// A staged row whose natural key has no matching dimension row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedFact {
    pub row: usize,
    pub content_hash: String,
    pub dimension: Dimension,
    pub natural_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FactLoad {
    pub staged: u64,
    pub inserted: u64,
    pub skipped: u64,
    /// Non-empty means nothing was inserted.
    pub unresolved: Vec<UnresolvedFact>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarehouseCounts {
    pub staging: u64,
    pub types: u64,
    pub groups: u64,
    pub categories: u64,
    pub classifications: u64,
    pub periods: u64,
    pub facts: u64,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Drops and recreates staging with `records`, atomically.
    async fn replace_staging(
        &self,
        records: &[TransactionRecord],
        chunk_size: usize,
    ) -> Result<u64, StorageError>;

    async fn staged_periods(&self) -> Result<Vec<String>, StorageError>;

    async fn upsert_types(&self) -> Result<u64, StorageError>;

    /// Requires types to be resolved.
    async fn upsert_groups(&self) -> Result<u64, StorageError>;

    /// Requires groups to be resolved.
    async fn upsert_categories(&self) -> Result<u64, StorageError>;

    async fn upsert_classifications(&self) -> Result<u64, StorageError>;

    async fn upsert_time(&self, rows: &[TimeRow]) -> Result<u64, StorageError>;

    /// Inserts facts whose hash is new. Refuses to insert anything when a
    /// staged row fails to join one of its dimensions.
    async fn load_facts(&self) -> Result<FactLoad, StorageError>;

    async fn counts(&self) -> Result<WarehouseCounts, StorageError>;
}
