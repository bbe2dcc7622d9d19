//! SQLite progress store: one row per validation run, rewritten at every
//! checkpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::domain::repositories::ProgressRepository;
use crate::domain::run::ValidationRun;
use crate::infrastructure::run_rows::{
    fmt_opt_ts, fmt_ts, get_opt_ts, get_run_id, get_status, get_tallies, get_ts,
};

pub struct SqliteProgressRepository {
    pool: SqlitePool,
}

impl SqliteProgressRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &SqliteRow) -> Result<ValidationRun> {
        let last_key: Option<String> = row.try_get("last_key")?;
        let last_key = last_key
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .context("decoding last_key")?;
        let samples: String = row.try_get("mismatch_samples")?;
        let mismatch_samples = serde_json::from_str(&samples).context("decoding mismatch_samples")?;

        Ok(ValidationRun {
            run_id: get_run_id(row)?,
            table_id: row.try_get("table_id")?,
            status: get_status(row)?,
            started_at: get_ts(row, "started_at")?,
            ended_at: get_opt_ts(row, "ended_at")?,
            last_key,
            tallies: get_tallies(row)?,
            chunks_completed: row.try_get::<i64, _>("chunks_completed")? as u64,
            incremental_column: row.try_get("incremental_column")?,
            incremental_threshold: get_opt_ts(row, "incremental_threshold")?,
            mismatch_samples,
            error: row.try_get("error")?,
            updated_at: get_ts(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl ProgressRepository for SqliteProgressRepository {
    async fn load_checkpoint(&self, table_id: &str) -> Result<Option<ValidationRun>> {
        let row = sqlx::query(
            r"
            SELECT * FROM validation_runs
            WHERE table_id = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT 1
            ",
        )
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn save_checkpoint(&self, run: &ValidationRun) -> Result<()> {
        let last_key = run.last_key.as_ref().map(serde_json::to_string).transpose()?;
        let samples = serde_json::to_string(&run.mismatch_samples)?;

        sqlx::query(
            r"
            INSERT INTO validation_runs (
                run_id, table_id, status, started_at, ended_at, last_key,
                rows_compared, rows_matched, rows_mismatched, missing_on_source, missing_on_target,
                chunks_completed, incremental_column, incremental_threshold,
                mismatch_samples, error, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                last_key = excluded.last_key,
                rows_compared = excluded.rows_compared,
                rows_matched = excluded.rows_matched,
                rows_mismatched = excluded.rows_mismatched,
                missing_on_source = excluded.missing_on_source,
                missing_on_target = excluded.missing_on_target,
                chunks_completed = excluded.chunks_completed,
                incremental_column = excluded.incremental_column,
                incremental_threshold = excluded.incremental_threshold,
                mismatch_samples = excluded.mismatch_samples,
                error = excluded.error,
                updated_at = excluded.updated_at
            ",
        )
        .bind(run.run_id.to_string())
        .bind(&run.table_id)
        .bind(run.status.as_str())
        .bind(fmt_ts(run.started_at))
        .bind(fmt_opt_ts(run.ended_at))
        .bind(last_key)
        .bind(run.tallies.compared as i64)
        .bind(run.tallies.matched as i64)
        .bind(run.tallies.mismatched as i64)
        .bind(run.tallies.missing_on_source as i64)
        .bind(run.tallies.missing_on_target as i64)
        .bind(run.chunks_completed as i64)
        .bind(&run.incremental_column)
        .bind(fmt_opt_ts(run.incremental_threshold))
        .bind(samples)
        .bind(&run.error)
        .bind(fmt_ts(run.updated_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving checkpoint for {}", run.table_id))?;

        Ok(())
    }

    async fn list_resumable(&self) -> Result<Vec<ValidationRun>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM validation_runs AS r
            WHERE r.rowid = (
                SELECT l.rowid FROM validation_runs AS l
                WHERE l.table_id = r.table_id
                ORDER BY l.started_at DESC, l.rowid DESC
                LIMIT 1
            )
            AND r.status <> 'COMPLETED'
            ORDER BY r.table_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_run).collect()
    }
}
