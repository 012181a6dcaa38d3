use serde::Serialize;
use tracing::{info, warn};

use crate::error::{EtlError, Result};
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FactReport {
    pub staged: u64,
    pub inserted: u64,
    /// Staged rows whose content hash was already loaded.
    pub skipped: u64,
}

/// Inserts one fact per staged row with a new content hash. A staged row
/// that does not join one of its dimensions aborts the load.
pub async fn load_facts<W>(warehouse: &W) -> Result<FactReport>
where
    W: Warehouse + ?Sized,
{
    let load = warehouse.load_facts().await?;

    if !load.unresolved.is_empty() {
        for fact in &load.unresolved {
            warn!(
                row = fact.row,
                content_hash = %fact.content_hash,
                dimension = %fact.dimension,
                natural_key = %fact.natural_key,
                "Staged row does not resolve to a dimension"
            );
        }
        return Err(EtlError::ReferentialIntegrity {
            unresolved: load.unresolved,
        });
    }

    info!(
        staged = load.staged,
        inserted = load.inserted,
        skipped = load.skipped,
        "Facts loaded"
    );

    Ok(FactReport {
        staged: load.staged,
        inserted: load.inserted,
        skipped: load.skipped,
    })
}
