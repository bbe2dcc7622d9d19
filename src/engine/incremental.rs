//! Delta-only re-validation cutoff.

use chrono::{DateTime, Utc};

use crate::domain::mapping::TableMapping;
use crate::domain::repositories::ResultRepository;
use crate::engine::error::EngineError;

/// Cutoff for a fresh run of `mapping`: the start time of the latest
/// completed run, or `None` for a full scan (incremental mode off or no
/// completed run yet).
///
/// Computed once per run; resumed runs reuse the value stored on the run.
pub async fn resolve_threshold(
    mapping: &TableMapping,
    results: &dyn ResultRepository,
) -> Result<Option<DateTime<Utc>>, EngineError> {
    let Some(column) = mapping.incremental_column() else {
        return Ok(None);
    };
    let table_id = mapping.table_id();
    let threshold = results.last_success_timestamp(&table_id, column).await?;
    match threshold {
        Some(ts) => tracing::info!(table = %table_id, column, threshold = %ts, "Incremental scan"),
        None => tracing::info!(table = %table_id, column, "No completed run yet, full scan"),
    }
    Ok(threshold)
}
