//! Repository for finished validation runs and their mismatch samples.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::domain::outcome::{MismatchDetail, MismatchKind};
use crate::domain::repositories::ResultRepository;
use crate::domain::run::ValidationRun;
use crate::domain::value_objects::RunId;
use crate::infrastructure::run_rows::{
    fmt_opt_ts, fmt_ts, get_opt_ts, get_run_id, get_status, get_tallies, get_ts, parse_ts,
};

pub struct SqliteResultRepository {
    pool: SqlitePool,
}

impl SqliteResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored samples of a run, in their original order.
    pub async fn mismatch_samples(&self, run_id: RunId) -> Result<Vec<MismatchDetail>> {
        let rows = sqlx::query(
            "SELECT key_values, kind, columns FROM mismatch_samples WHERE run_id = ? ORDER BY seq",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get("key_values")?;
                let kind: String = row.try_get("kind")?;
                let columns: Option<String> = row.try_get("columns")?;
                Ok(MismatchDetail {
                    key: serde_json::from_str(&key).context("decoding sample key")?,
                    kind: MismatchKind::parse(&kind)
                        .ok_or_else(|| anyhow::anyhow!("Unknown mismatch kind: {kind}"))?,
                    columns: columns
                        .map(|c| serde_json::from_str(&c))
                        .transpose()
                        .context("decoding sample columns")?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    fn row_to_summary(row: &SqliteRow) -> Result<ValidationRun> {
        let started_at = get_ts(row, "started_at")?;
        let ended_at = get_opt_ts(row, "ended_at")?;
        Ok(ValidationRun {
            run_id: get_run_id(row)?,
            table_id: row.try_get("table_id")?,
            status: get_status(row)?,
            started_at,
            ended_at,
            last_key: None,
            tallies: get_tallies(row)?,
            chunks_completed: row.try_get::<i64, _>("chunks_completed")? as u64,
            incremental_column: row.try_get("incremental_column")?,
            incremental_threshold: get_opt_ts(row, "incremental_threshold")?,
            mismatch_samples: Vec::new(),
            error: row.try_get("error")?,
            updated_at: ended_at.unwrap_or(started_at),
        })
    }
}

#[async_trait]
impl ResultRepository for SqliteResultRepository {
    async fn save_result(&self, run: &ValidationRun) -> Result<()> {
        // Timestamps come from the run, never the system clock.
        let recorded_at = run.ended_at.unwrap_or(run.updated_at);
        let duration_secs = run.duration(recorded_at).num_milliseconds() as f64 / 1000.0;

        sqlx::query(
            r"
            INSERT INTO validation_results (
                run_id, table_id, status, started_at, ended_at,
                rows_compared, rows_matched, rows_mismatched, missing_on_source, missing_on_target,
                chunks_completed, incremental_column, incremental_threshold,
                duration_secs, error, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                rows_compared = excluded.rows_compared,
                rows_matched = excluded.rows_matched,
                rows_mismatched = excluded.rows_mismatched,
                missing_on_source = excluded.missing_on_source,
                missing_on_target = excluded.missing_on_target,
                chunks_completed = excluded.chunks_completed,
                duration_secs = excluded.duration_secs,
                error = excluded.error,
                recorded_at = excluded.recorded_at
            ",
        )
        .bind(run.run_id.to_string())
        .bind(&run.table_id)
        .bind(run.status.as_str())
        .bind(fmt_ts(run.started_at))
        .bind(fmt_opt_ts(run.ended_at))
        .bind(run.tallies.compared as i64)
        .bind(run.tallies.matched as i64)
        .bind(run.tallies.mismatched as i64)
        .bind(run.tallies.missing_on_source as i64)
        .bind(run.tallies.missing_on_target as i64)
        .bind(run.chunks_completed as i64)
        .bind(&run.incremental_column)
        .bind(fmt_opt_ts(run.incremental_threshold))
        .bind(duration_secs)
        .bind(&run.error)
        .bind(fmt_ts(recorded_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving result for {}", run.table_id))?;

        Ok(())
    }

    async fn last_success_timestamp(
        &self,
        table_id: &str,
        incremental_column: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let started_at: Option<String> = sqlx::query_scalar(
            r"
            SELECT started_at FROM validation_results
            WHERE table_id = ?
              AND status = 'COMPLETED'
              AND (incremental_column IS NULL OR incremental_column = ? COLLATE NOCASE)
            ORDER BY started_at DESC
            LIMIT 1
            ",
        )
        .bind(table_id)
        .bind(incremental_column)
        .fetch_optional(&self.pool)
        .await?;

        started_at.map(|ts| parse_ts("started_at", &ts)).transpose()
    }

    async fn save_mismatch_samples(&self, run_id: RunId, samples: &[MismatchDetail]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let run_id = run_id.to_string();

        sqlx::query("DELETE FROM mismatch_samples WHERE run_id = ?")
            .bind(&run_id)
            .execute(&mut *tx)
            .await?;

        for (seq, sample) in samples.iter().enumerate() {
            let columns = (!sample.columns.is_empty())
                .then(|| serde_json::to_string(&sample.columns))
                .transpose()?;
            sqlx::query(
                "INSERT INTO mismatch_samples (run_id, seq, key_values, kind, columns) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&run_id)
            .bind(seq as i64)
            .bind(serde_json::to_string(&sample.key)?)
            .bind(sample.kind.as_str())
            .bind(columns)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("committing mismatch samples")?;
        Ok(())
    }

    async fn recent_results(&self, limit: u32) -> Result<Vec<ValidationRun>> {
        let rows = sqlx::query(
            "SELECT * FROM validation_results ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_summary).collect()
    }
}
