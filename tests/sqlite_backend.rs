//! Full stack over real SQLite files: configuration, cross-linked comparator,
//! progress store and JSON report.

use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

use table_validator::domain::outcome::MismatchKind;
use table_validator::domain::report::{AggregateReport, ReportVerdict};
use table_validator::domain::repositories::{ProgressRepository, ResultRepository};
use table_validator::domain::run::RunStatus;
use table_validator::domain::value_objects::{KeyTuple, KeyValue};
use table_validator::infrastructure::config::AppConfig;
use table_validator::infrastructure::{
    DatabaseConnection, SqliteProgressRepository, SqliteResultRepository, build_coordinator,
};

async fn create_db(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap()
}

async fn exec(pool: &SqlitePool, sql: &str) {
    sqlx::query(sql).execute(pool).await.unwrap();
}

async fn seed(dir: &Path) {
    let source = create_db(&dir.join("source.db")).await;
    let target = create_db(&dir.join("target.db")).await;

    for pool in [&source, &target] {
        exec(
            pool,
            "CREATE TABLE ORDERS (
                ORDER_ID INTEGER NOT NULL,
                LINE_NO INTEGER NOT NULL,
                SKU TEXT,
                AMOUNT REAL,
                LOAD_TS TEXT,
                PRIMARY KEY (ORDER_ID, LINE_NO)
            )",
        )
        .await;
        exec(pool, "CREATE TABLE ITEMS (CODE TEXT PRIMARY KEY, LABEL TEXT, ACTIVE INTEGER)").await;
    }

    for order in 1..=4_i64 {
        for line in 1..=3_i64 {
            for (pool, stamp) in [(&source, "src"), (&target, "tgt")] {
                sqlx::query("INSERT INTO ORDERS VALUES (?, ?, 'A', ?, ?)")
                    .bind(order)
                    .bind(line)
                    .bind((order * 10 + line) as f64)
                    .bind(stamp)
                    .execute(pool)
                    .await
                    .unwrap();
            }
        }
    }
    exec(&target, "UPDATE ORDERS SET AMOUNT = 999.5 WHERE ORDER_ID = 2 AND LINE_NO = 2").await;
    exec(&target, "UPDATE ORDERS SET SKU = NULL WHERE ORDER_ID = 4 AND LINE_NO = 1").await;
    exec(&target, "DELETE FROM ORDERS WHERE ORDER_ID = 3 AND LINE_NO = 3").await;
    exec(&target, "INSERT INTO ORDERS VALUES (5, 1, 'B', 51.0, 'tgt')").await;

    for (code, active) in [("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1), ("f", 0)] {
        sqlx::query("INSERT INTO ITEMS VALUES (?, ?, ?)")
            .bind(code)
            .bind(format!("item {code}"))
            .bind(active)
            .execute(&source)
            .await
            .unwrap();
        if active == 1 {
            sqlx::query("INSERT INTO ITEMS VALUES (?, ?, ?)")
                .bind(code)
                .bind(format!("item {code}"))
                .bind(active)
                .execute(&target)
                .await
                .unwrap();
        }
    }

    source.close().await;
    target.close().await;
}

fn config(dir: &Path) -> AppConfig {
    serde_json::from_value(json!({
        "source_database": dir.join("source.db"),
        "target_database": dir.join("target.db"),
        "db_link_name": "src_link",
        "progress_database": dir.join("state").join("progress.db"),
        "max_concurrent_validations": 2,
        "report": { "json_path": dir.join("reports").join("last.json") },
        "table_mappings": [
            {
                "source_table": "ORDERS",
                "target_table": "ORDERS",
                "natural_keys": ["ORDER_ID", "LINE_NO"],
                "exclude_columns": ["LOAD_TS"],
                "chunk_size": 5
            },
            {
                "source_table": "ITEMS",
                "target_table": "ITEMS",
                "natural_keys": ["CODE"],
                "chunk_size": 2,
                "where_clause": "ACTIVE = 1"
            }
        ]
    }))
    .unwrap()
}

fn key(order: i64, line: i64) -> KeyTuple {
    KeyTuple::new(vec![KeyValue::from(order), KeyValue::from(line)])
}

#[tokio::test]
async fn validates_sqlite_tables_over_an_attached_source() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path()).await;
    let config = config(dir.path()).validate().unwrap();

    let coordinator = build_coordinator(&config).await.unwrap();
    let report = coordinator.run_all(None, false).await.unwrap();

    let orders = report.table("ORDERS").unwrap();
    assert_eq!(orders.status, RunStatus::Completed, "{:?}", orders.error);
    assert_eq!(orders.tallies.compared, 13);
    assert_eq!(orders.tallies.matched, 9);
    assert_eq!(orders.tallies.mismatched, 2);
    assert_eq!(orders.tallies.missing_on_target, 1);
    assert_eq!(orders.tallies.missing_on_source, 1);

    let samples: Vec<_> = orders
        .mismatch_samples
        .iter()
        .map(|d| (d.key.clone(), d.kind, d.columns.clone()))
        .collect();
    assert_eq!(
        samples,
        vec![
            (key(2, 2), MismatchKind::ValueMismatch, vec!["AMOUNT".to_string()]),
            (key(3, 3), MismatchKind::MissingOnTarget, vec![]),
            (key(4, 1), MismatchKind::ValueMismatch, vec!["SKU".to_string()]),
            (key(5, 1), MismatchKind::MissingOnSource, vec![]),
        ]
    );

    let items = report.table("ITEMS").unwrap();
    assert_eq!(items.status, RunStatus::Completed, "{:?}", items.error);
    assert_eq!(items.tallies.matched, 5);
    assert!(items.tallies.is_clean());

    assert_eq!(report.verdict(), ReportVerdict::Discrepancies);

    let written: AggregateReport = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("reports").join("last.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(written.tables.len(), 2);

    let progress_db = DatabaseConnection::new(&dir.path().join("state").join("progress.db").to_string_lossy())
        .await
        .unwrap();
    let results = SqliteResultRepository::new(progress_db.pool().clone());
    let recent = results.recent_results(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|r| r.status == RunStatus::Completed));
    let stored = results.mismatch_samples(orders.run_id.unwrap()).await.unwrap();
    assert_eq!(stored.len(), 4);

    let progress = SqliteProgressRepository::new(progress_db.pool().clone());
    assert!(progress.list_resumable().await.unwrap().is_empty());
    let checkpoint = progress.load_checkpoint("ORDERS").await.unwrap().unwrap();
    assert_eq!(checkpoint.last_key, Some(key(5, 1)));
}

#[tokio::test]
async fn missing_columns_fail_only_their_table() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path()).await;
    let mut config = config(dir.path());
    config.table_mappings[1].natural_keys = vec!["NO_SUCH_KEY".to_string()];
    let config = config.validate().unwrap();

    let coordinator = build_coordinator(&config).await.unwrap();
    let report = coordinator.run_all(None, false).await.unwrap();

    assert_eq!(report.table("ORDERS").unwrap().status, RunStatus::Completed);
    let items = report.table("ITEMS").unwrap();
    assert_eq!(items.status, RunStatus::Failed);
    assert!(items.error.as_deref().unwrap().contains("NO_SUCH_KEY"));
    assert_eq!(report.verdict().exit_code(), 2);
}
