use tracing::info;

use crate::error::Result;
use crate::ingestion::Batch;
use crate::warehouse::Warehouse;

/// Replaces the staging table with `batch`. Previous staging content is
/// discarded; the swap is atomic.
pub async fn replace_staging<W>(warehouse: &W, batch: &Batch, chunk_size: usize) -> Result<u64>
where
    W: Warehouse + ?Sized,
{
    let staged = warehouse.replace_staging(&batch.records, chunk_size).await?;
    info!(rows = staged, "Staging table replaced");
    Ok(staged)
}
