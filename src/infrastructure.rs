//! Infrastructure layer: configuration, logging, SQLite persistence, the
//! cross-link comparator and report notifiers.

pub mod bootstrap;
pub mod config;
pub mod database_connection;
pub mod logging;
pub mod memory_store;
pub mod notifier;
pub mod progress_repository;
pub mod result_repository;
pub mod run_rows;
pub mod sqlite_comparator;

pub use bootstrap::build_coordinator;
pub use config::{AppConfig, ConfigError, LoggingConfig, ValidatedConfig};
pub use database_connection::DatabaseConnection;
pub use logging::init_logging_with_config;
pub use memory_store::InMemoryValidationStore;
pub use notifier::{CompositeNotifier, JsonReportNotifier, LogNotifier};
pub use progress_repository::SqliteProgressRepository;
pub use result_repository::SqliteResultRepository;
pub use sqlite_comparator::SqliteComparator;
