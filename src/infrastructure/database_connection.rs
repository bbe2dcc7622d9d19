// Progress database connection and schema management
// Holds validation runs, finished results and mismatch samples.

use anyhow::{Context, Result};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating directory for {db_path}"))?;
            }
        }
        if !Path::new(db_path).exists() {
            tokio::fs::File::create(db_path)
                .await
                .with_context(|| format!("creating progress database {db_path}"))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&format!("sqlite:{db_path}"))
            .await
            .with_context(|| format!("connecting to progress database {db_path}"))?;

        Ok(Self { pool })
    }

    /// Private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("opening in-memory progress database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_runs_sql = r"
            CREATE TABLE IF NOT EXISTS validation_runs (
                run_id TEXT PRIMARY KEY,
                table_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                last_key TEXT,
                rows_compared INTEGER NOT NULL DEFAULT 0,
                rows_matched INTEGER NOT NULL DEFAULT 0,
                rows_mismatched INTEGER NOT NULL DEFAULT 0,
                missing_on_source INTEGER NOT NULL DEFAULT 0,
                missing_on_target INTEGER NOT NULL DEFAULT 0,
                chunks_completed INTEGER NOT NULL DEFAULT 0,
                incremental_column TEXT,
                incremental_threshold TEXT,
                mismatch_samples TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                updated_at TEXT NOT NULL
            )
        ";

        let create_results_sql = r"
            CREATE TABLE IF NOT EXISTS validation_results (
                run_id TEXT PRIMARY KEY,
                table_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                rows_compared INTEGER NOT NULL,
                rows_matched INTEGER NOT NULL,
                rows_mismatched INTEGER NOT NULL,
                missing_on_source INTEGER NOT NULL,
                missing_on_target INTEGER NOT NULL,
                chunks_completed INTEGER NOT NULL,
                incremental_column TEXT,
                incremental_threshold TEXT,
                duration_secs REAL NOT NULL DEFAULT 0,
                error TEXT,
                recorded_at TEXT NOT NULL
            )
        ";

        let create_samples_sql = r"
            CREATE TABLE IF NOT EXISTS mismatch_samples (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                key_values TEXT NOT NULL,
                kind TEXT NOT NULL,
                columns TEXT,
                PRIMARY KEY (run_id, seq)
            )
        ";

        let create_indexes_sql = [
            "CREATE INDEX IF NOT EXISTS idx_runs_table ON validation_runs (table_id, started_at)",
            "CREATE INDEX IF NOT EXISTS idx_runs_status ON validation_runs (status)",
            "CREATE INDEX IF NOT EXISTS idx_results_table ON validation_results (table_id, status, started_at)",
        ];

        sqlx::query(create_runs_sql).execute(&self.pool).await?;
        sqlx::query(create_results_sql).execute(&self.pool).await?;
        sqlx::query(create_samples_sql).execute(&self.pool).await?;
        for sql in create_indexes_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}
