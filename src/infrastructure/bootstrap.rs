//! Wires a validated configuration into a ready-to-run coordinator.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::engine::coordinator::ValidationCoordinator;
use crate::engine::gate::LocalClock;
use crate::engine::state_machine::EngineContext;
use crate::infrastructure::config::ValidatedConfig;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::notifier::{CompositeNotifier, JsonReportNotifier, LogNotifier};
use crate::infrastructure::progress_repository::SqliteProgressRepository;
use crate::infrastructure::result_repository::SqliteResultRepository;
use crate::infrastructure::sqlite_comparator::SqliteComparator;

/// Opens the progress store (creating and migrating it when needed), the
/// cross-linked comparator and the configured notifiers.
pub async fn build_coordinator(config: &ValidatedConfig) -> Result<ValidationCoordinator> {
    let progress_db = DatabaseConnection::new(&config.progress_database.to_string_lossy()).await?;
    progress_db.migrate().await?;
    let pool = progress_db.pool().clone();

    let max_connections = u32::try_from(config.settings.max_concurrent_validations).unwrap_or(u32::MAX);
    let comparator = SqliteComparator::connect(
        &config.target_database,
        &config.source_database,
        &config.db_link_name,
        max_connections,
    )
    .await?;

    let ctx = EngineContext {
        comparator: Arc::new(comparator),
        progress: Arc::new(SqliteProgressRepository::new(pool.clone())),
        results: Arc::new(SqliteResultRepository::new(pool)),
        clock: Arc::new(LocalClock),
    };

    let mut notifier = CompositeNotifier::new().with(Arc::new(LogNotifier));
    if let Some(path) = &config.report.json_path {
        notifier = notifier.with(Arc::new(JsonReportNotifier::new(path)));
    }

    info!(
        progress = %config.progress_database.display(),
        tables = config.mappings.len(),
        "Validator infrastructure ready"
    );
    Ok(
        ValidationCoordinator::new(config.mappings.clone(), config.settings.clone(), ctx)
            .with_notifier(Arc::new(notifier)),
    )
}
