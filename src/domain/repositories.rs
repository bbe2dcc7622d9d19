//! Repository interfaces for validation progress and results
//!
//! Each validation task only reads and writes rows keyed by its own table
//! and run identifier.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::outcome::MismatchDetail;
use crate::domain::run::ValidationRun;
use crate::domain::value_objects::RunId;

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Most recent run recorded for the table, whatever its status.
    async fn load_checkpoint(&self, table_id: &str) -> Result<Option<ValidationRun>>;

    /// Atomically stores status, resume key, tallies and samples.
    async fn save_checkpoint(&self, run: &ValidationRun) -> Result<()>;

    /// Latest run per table whose status is not COMPLETED.
    async fn list_resumable(&self) -> Result<Vec<ValidationRun>>;
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Stores the summary of a finished run (upsert by run id).
    async fn save_result(&self, run: &ValidationRun) -> Result<()>;

    /// Start time of the latest COMPLETED run for the table whose incremental
    /// column is `incremental_column` or which ran without one.
    async fn last_success_timestamp(
        &self,
        table_id: &str,
        incremental_column: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Replaces the stored samples of a run.
    async fn save_mismatch_samples(&self, run_id: RunId, samples: &[MismatchDetail]) -> Result<()>;

    // History
    async fn recent_results(&self, limit: u32) -> Result<Vec<ValidationRun>>;
}
