use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{Dimension, FactLoad, TimeRow, UnresolvedFact, Warehouse, WarehouseCounts};
use crate::error::StorageError;
use crate::period::Period;
use crate::record::TransactionRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRow {
    pub type_id: i64,
    pub group_id: i64,
    pub category_id: i64,
    pub time_id: i64,
    pub classification_id: i64,
    pub description: String,
    pub amount: Decimal,
    pub content_hash: String,
}

#[derive(Debug, Default)]
struct Tables {
    staging: Option<Vec<TransactionRecord>>,
    types: BTreeMap<String, i64>,
    groups: BTreeMap<(i64, String), i64>,
    categories: BTreeMap<(i64, String), i64>,
    classifications: BTreeMap<String, i64>,
    time: BTreeMap<(i32, u32), (i64, TimeRow)>,
    facts: Vec<FactRow>,
    next_id: i64,
}

impl Tables {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn staged(&self) -> &[TransactionRecord] {
        self.staging.as_deref().unwrap_or_default()
    }
}

/// In-process warehouse with the same natural-key semantics as
/// [`PostgresWarehouse`](super::PostgresWarehouse). Every method holds the
/// lock for its whole duration, which stands in for a transaction.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<Tables>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn facts(&self) -> Vec<FactRow> {
        self.lock().facts.clone()
    }

    pub fn time_rows(&self) -> Vec<TimeRow> {
        self.lock()
            .time
            .values()
            .map(|(_, row)| row.clone())
            .collect()
    }

    pub fn type_names(&self) -> Vec<String> {
        self.lock().types.keys().cloned().collect()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn replace_staging(
        &self,
        records: &[TransactionRecord],
        _chunk_size: usize,
    ) -> Result<u64, StorageError> {
        let mut tables = self.lock();
        tables.staging = Some(records.to_vec());
        Ok(records.len() as u64)
    }

    async fn staged_periods(&self) -> Result<Vec<String>, StorageError> {
        let tables = self.lock();
        let mut seen = HashSet::new();
        Ok(tables
            .staged()
            .iter()
            .filter(|record| seen.insert(record.fields.period.as_str()))
            .map(|record| record.fields.period.clone())
            .collect())
    }

    async fn upsert_types(&self) -> Result<u64, StorageError> {
        let mut tables = self.lock();
        let names: Vec<String> = tables
            .staged()
            .iter()
            .map(|record| record.fields.transaction_type.clone())
            .collect();
        let mut inserted = 0;
        for name in names {
            if !tables.types.contains_key(&name) {
                let id = tables.allocate();
                tables.types.insert(name, id);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_groups(&self) -> Result<u64, StorageError> {
        let mut tables = self.lock();
        let keys: Vec<(i64, String)> = tables
            .staged()
            .iter()
            .filter_map(|record| {
                let type_id = *tables.types.get(&record.fields.transaction_type)?;
                Some((type_id, record.fields.group.clone()))
            })
            .collect();
        let mut inserted = 0;
        for key in keys {
            if !tables.groups.contains_key(&key) {
                let id = tables.allocate();
                tables.groups.insert(key, id);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_categories(&self) -> Result<u64, StorageError> {
        let mut tables = self.lock();
        let keys: Vec<(i64, String)> = tables
            .staged()
            .iter()
            .filter_map(|record| {
                let type_id = *tables.types.get(&record.fields.transaction_type)?;
                let group_id = *tables.groups.get(&(type_id, record.fields.group.clone()))?;
                Some((group_id, record.fields.category.clone()))
            })
            .collect();
        let mut inserted = 0;
        for key in keys {
            if !tables.categories.contains_key(&key) {
                let id = tables.allocate();
                tables.categories.insert(key, id);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_classifications(&self) -> Result<u64, StorageError> {
        let mut tables = self.lock();
        let names: Vec<String> = tables
            .staged()
            .iter()
            .map(|record| record.fields.classification.clone())
            .collect();
        let mut inserted = 0;
        for name in names {
            if !tables.classifications.contains_key(&name) {
                let id = tables.allocate();
                tables.classifications.insert(name, id);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_time(&self, rows: &[TimeRow]) -> Result<u64, StorageError> {
        let mut tables = self.lock();
        let mut inserted = 0;
        for row in rows {
            let key = (row.year, row.month);
            if !tables.time.contains_key(&key) {
                let id = tables.allocate();
                tables.time.insert(key, (id, row.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn load_facts(&self) -> Result<FactLoad, StorageError> {
        let mut tables = self.lock();
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();

        for record in tables.staged() {
            let fields = &record.fields;
            let unresolved_at = |dimension: Dimension, natural_key: String| UnresolvedFact {
                row: record.row,
                content_hash: record.content_hash().to_string(),
                dimension,
                natural_key,
            };

            let type_id = tables.types.get(&fields.transaction_type).copied();
            let group_id = type_id
                .and_then(|id| tables.groups.get(&(id, fields.group.clone())).copied());
            let category_id = group_id
                .and_then(|id| tables.categories.get(&(id, fields.category.clone())).copied());
            let classification_id = tables.classifications.get(&fields.classification).copied();
            let time_id = fields
                .period
                .parse::<Period>()
                .ok()
                .and_then(|period| tables.time.get(&(period.year, period.month)))
                .map(|(id, _)| *id);

            let mut missing = Vec::new();
            if type_id.is_none() {
                missing.push(unresolved_at(Dimension::Type, fields.transaction_type.clone()));
            }
            if group_id.is_none() {
                missing.push(unresolved_at(
                    Dimension::Group,
                    format!("{}/{}", fields.transaction_type, fields.group),
                ));
            }
            if category_id.is_none() {
                missing.push(unresolved_at(
                    Dimension::Category,
                    format!("{}/{}/{}", fields.transaction_type, fields.group, fields.category),
                ));
            }
            if classification_id.is_none() {
                missing.push(unresolved_at(
                    Dimension::Classification,
                    fields.classification.clone(),
                ));
            }
            if time_id.is_none() {
                missing.push(unresolved_at(Dimension::Time, fields.period.clone()));
            }

            match (type_id, group_id, category_id, classification_id, time_id) {
                (
                    Some(type_id),
                    Some(group_id),
                    Some(category_id),
                    Some(classification_id),
                    Some(time_id),
                ) => {
                    resolved.push(FactRow {
                        type_id,
                        group_id,
                        category_id,
                        time_id,
                        classification_id,
                        description: fields.description.clone(),
                        amount: fields.amount,
                        content_hash: record.content_hash().to_string(),
                    });
                }
                _ => unresolved.extend(missing),
            }
        }

        let staged = tables.staged().len() as u64;
        if !unresolved.is_empty() {
            return Ok(FactLoad {
                staged,
                inserted: 0,
                skipped: 0,
                unresolved,
            });
        }

        let mut known: HashSet<String> = tables
            .facts
            .iter()
            .map(|fact| fact.content_hash.clone())
            .collect();
        let mut inserted = 0;
        for fact in resolved {
            if known.insert(fact.content_hash.clone()) {
                tables.facts.push(fact);
                inserted += 1;
            }
        }

        Ok(FactLoad {
            staged,
            inserted,
            skipped: staged - inserted,
            unresolved,
        })
    }

    async fn counts(&self) -> Result<WarehouseCounts, StorageError> {
        let tables = self.lock();
        Ok(WarehouseCounts {
            staging: tables.staged().len() as u64,
            types: tables.types.len() as u64,
            groups: tables.groups.len() as u64,
            categories: tables.categories.len() as u64,
            classifications: tables.classifications.len() as u64,
            periods: tables.time.len() as u64,
            facts: tables.facts.len() as u64,
        })
    }
}
