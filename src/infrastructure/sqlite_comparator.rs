//! SQLite comparator backend.
//!
//! The target database is opened read-only as the main schema and the
//! source database file is attached to every pooled connection under the
//! configured link name, so one statement can read both sides.
//!
//! Each chunk is a single keyset query:
//!
//! ```text
//! SELECT keys, in_source, in_target, <one IS NOT flag per compared column>
//! FROM (
//!     SELECT keys FROM link.src WHERE filter AND newer AND keys > lower
//!     UNION
//!     SELECT keys FROM tgt      WHERE filter AND newer AND keys > lower
//!     ORDER BY keys LIMIT n
//! ) k
//! LEFT JOIN (SELECT * FROM link.src WHERE filter) s ON keys match
//! LEFT JOIN (SELECT * FROM tgt WHERE filter) t      ON keys match
//! ORDER BY keys
//! ```
//!
//! The incremental cutoff only selects which keys are visited; the joined
//! rows are read whole so a row changed on one side only still shows up as
//! a value mismatch. Natural-key columns are assumed NOT NULL.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::chunk::ChunkRange;
use crate::domain::gateway::{ComparatorError, ComparatorGateway};
use crate::domain::mapping::TableMapping;
use crate::domain::outcome::{ComparisonOutcome, MismatchDetail, MismatchKind};
use crate::domain::value_objects::{KeyTuple, KeyValue};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const THRESHOLD_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columns resolved once per mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnPlan {
    source: String,
    target: String,
    keys: Vec<String>,
    compared: Vec<String>,
}

#[derive(Debug, Clone)]
enum SqlArg {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&KeyValue> for SqlArg {
    fn from(value: &KeyValue) -> Self {
        match value {
            KeyValue::Integer(v) => Self::Integer(*v),
            KeyValue::Real(v) => Self::Real(*v),
            KeyValue::Text(v) => Self::Text(v.clone()),
        }
    }
}

pub struct SqliteComparator {
    pool: SqlitePool,
    link_name: String,
    plans: RwLock<HashMap<String, Arc<ColumnPlan>>>,
}

impl SqliteComparator {
    /// Opens `target` read-only and attaches `source` as `link_name` on
    /// every connection of a pool of `max_connections`.
    pub async fn connect(
        target: &Path,
        source: &Path,
        link_name: &str,
        max_connections: u32,
    ) -> Result<Self> {
        if !source.exists() {
            bail!("source database {} does not exist", source.display());
        }
        let options = SqliteConnectOptions::new()
            .filename(target)
            .read_only(true)
            .create_if_missing(false);

        let source_path = source.to_string_lossy().into_owned();
        let attach_sql = format!("ATTACH DATABASE ? AS {}", quote_ident(link_name));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .after_connect(move |conn, _meta| {
                let source_path = source_path.clone();
                let attach_sql = attach_sql.clone();
                Box::pin(async move {
                    sqlx::query(&attach_sql).bind(source_path).execute(conn).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .with_context(|| format!("opening target database {}", target.display()))?;

        info!(
            target = %target.display(),
            source = %source.display(),
            link = link_name,
            "Comparator connected"
        );
        Ok(Self::from_pool(pool, link_name))
    }

    /// Uses a pool whose connections already have the source attached.
    pub fn from_pool(pool: SqlitePool, link_name: &str) -> Self {
        Self {
            pool,
            link_name: link_name.to_string(),
            plans: RwLock::new(HashMap::new()),
        }
    }

    async fn plan(&self, mapping: &TableMapping) -> Result<Arc<ColumnPlan>, ComparatorError> {
        let table_id = mapping.table_id();
        if let Some(plan) = self.plans.read().await.get(&table_id) {
            return Ok(Arc::clone(plan));
        }

        let (source_schema, source_table) = split_qualified(&mapping.source_table, &self.link_name);
        let (target_schema, target_table) = split_qualified(&mapping.target_table, "main");
        let source_columns = self.columns(source_schema, source_table).await?;
        let target_columns = self.columns(target_schema, target_table).await?;

        let plan = build_plan(mapping, &self.link_name, &source_columns, &target_columns)
            .map_err(|e| ComparatorError::fatal(format!("{table_id}: {e}")))?;
        debug!(table = %table_id, compared = ?plan.compared, "Resolved column plan");

        let plan = Arc::new(plan);
        self.plans.write().await.insert(table_id, Arc::clone(&plan));
        Ok(plan)
    }

    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<String>, ComparatorError> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info(?1, ?2) ORDER BY cid")
                .bind(table)
                .bind(schema)
                .fetch_all(&self.pool)
                .await
                .map_err(classify)?;
        if names.is_empty() {
            return Err(ComparatorError::fatal(format!("table {schema}.{table} not found")));
        }
        Ok(names)
    }
}

#[async_trait]
impl ComparatorGateway for SqliteComparator {
    async fn compare(
        &self,
        mapping: &TableMapping,
        range: &ChunkRange,
        incremental_threshold: Option<DateTime<Utc>>,
    ) -> Result<ComparisonOutcome, ComparatorError> {
        let plan = self.plan(mapping).await?;
        let newer = mapping
            .incremental_column()
            .zip(incremental_threshold)
            .map(|(column, ts)| (column, ts.format(THRESHOLD_FORMAT).to_string()));
        let (sql, args) = build_chunk_query(&plan, range, mapping.where_clause.as_deref(), newer);

        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = match arg {
                SqlArg::Integer(v) => query.bind(*v),
                SqlArg::Real(v) => query.bind(*v),
                SqlArg::Text(v) => query.bind(v.as_str()),
            };
        }
        let rows = query.fetch_all(&self.pool).await.map_err(classify)?;

        let mut outcome = ComparisonOutcome::empty();
        for row in &rows {
            let (key, finding) = classify_row(&plan, row)?;
            outcome.record(key, finding);
        }
        Ok(outcome)
    }
}

fn build_plan(
    mapping: &TableMapping,
    link_name: &str,
    source_columns: &[String],
    target_columns: &[String],
) -> Result<ColumnPlan> {
    let has = |columns: &[String], name: &str| columns.iter().any(|c| c.eq_ignore_ascii_case(name));

    for key in &mapping.natural_keys {
        if !has(source_columns, key) || !has(target_columns, key) {
            bail!("natural key column {key} must exist on both sides");
        }
    }
    if let Some(column) = mapping.incremental_column() {
        if !has(source_columns, column) || !has(target_columns, column) {
            bail!("incremental column {column} must exist on both sides");
        }
    }

    let compared = target_columns
        .iter()
        .filter(|c| has(source_columns, c))
        .filter(|c| !mapping.is_natural_key(c) && !mapping.is_excluded(c))
        .cloned()
        .collect();

    let source = if mapping.source_table.contains('.') {
        quote_path(&mapping.source_table)
    } else {
        format!("{}.{}", quote_ident(link_name), quote_ident(&mapping.source_table))
    };

    Ok(ColumnPlan {
        source,
        target: quote_path(&mapping.target_table),
        keys: mapping.natural_keys.clone(),
        compared,
    })
}

fn build_chunk_query(
    plan: &ColumnPlan,
    range: &ChunkRange,
    where_clause: Option<&str>,
    newer: Option<(&str, String)>,
) -> (String, Vec<SqlArg>) {
    let mut args = Vec::new();
    let key_list = plan.keys.iter().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ");
    let filter = where_clause.map(|w| format!("({w})"));

    let keyset_arm = |table: &str, args: &mut Vec<SqlArg>| {
        let mut conditions: Vec<String> = filter.iter().cloned().collect();
        if let Some((column, threshold)) = &newer {
            conditions.push(format!("{} > ?", quote_ident(column)));
            args.push(SqlArg::Text(threshold.clone()));
        }
        let disjuncts = range.lower_bound_disjuncts();
        if !disjuncts.is_empty() {
            let rendered: Vec<String> = disjuncts
                .iter()
                .map(|terms| {
                    let parts: Vec<String> = terms
                        .iter()
                        .map(|term| {
                            args.push(SqlArg::from(term.value));
                            format!("{} {} ?", quote_ident(term.column), term.op.as_sql())
                        })
                        .collect();
                    format!("({})", parts.join(" AND "))
                })
                .collect();
            conditions.push(format!("({})", rendered.join(" OR ")));
        }
        let mut sql = format!("SELECT {key_list} FROM {table}");
        if !conditions.is_empty() {
            let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
        }
        sql
    };

    let source_arm = keyset_arm(&plan.source, &mut args);
    let target_arm = keyset_arm(&plan.target, &mut args);
    let order_positions = (1..=plan.keys.len()).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
    args.push(SqlArg::Integer(i64::from(range.limit)));

    let side = |table: &str| match &filter {
        Some(f) => format!("(SELECT * FROM {table} WHERE {f})"),
        None => format!("(SELECT * FROM {table})"),
    };
    let join_on = |alias: &str| {
        plan.keys
            .iter()
            .map(|k| format!("{alias}.{q} = k.{q}", q = quote_ident(k)))
            .collect::<Vec<_>>()
            .join(" AND ")
    };
    let first_key = quote_ident(&plan.keys[0]);

    let mut select = plan
        .keys
        .iter()
        .map(|k| format!("k.{}", quote_ident(k)))
        .collect::<Vec<_>>();
    select.push(format!("(s.{first_key} IS NOT NULL) AS in_source"));
    select.push(format!("(t.{first_key} IS NOT NULL) AS in_target"));
    for (i, column) in plan.compared.iter().enumerate() {
        let q = quote_ident(column);
        select.push(format!("(s.{q} IS NOT t.{q}) AS diff_{i}"));
    }
    let order_by = plan
        .keys
        .iter()
        .map(|k| format!("k.{}", quote_ident(k)))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT {select} FROM ({source_arm} UNION {target_arm} ORDER BY {order_positions} LIMIT ?) AS k \
         LEFT JOIN {source_side} AS s ON {source_on} \
         LEFT JOIN {target_side} AS t ON {target_on} \
         ORDER BY {order_by}",
        select = select.join(", "),
        source_side = side(&plan.source),
        source_on = join_on("s"),
        target_side = side(&plan.target),
        target_on = join_on("t"),
    );
    (sql, args)
}

fn classify_row(
    plan: &ColumnPlan,
    row: &SqliteRow,
) -> Result<(KeyTuple, Option<MismatchDetail>), ComparatorError> {
    let width = plan.keys.len();
    let values = (0..width)
        .map(|i| decode_key_value(row, i, &plan.keys[i]))
        .collect::<Result<Vec<_>, _>>()?;
    let key = KeyTuple::new(values);

    let flag = |index: usize| -> Result<bool, ComparatorError> {
        row.try_get::<i64, _>(index)
            .map(|v| v != 0)
            .map_err(|e| ComparatorError::fatal(format!("decoding comparison flag: {e}")))
    };
    let in_source = flag(width)?;
    let in_target = flag(width + 1)?;

    let finding = match (in_source, in_target) {
        (true, true) => {
            let mut differing = Vec::new();
            for (i, column) in plan.compared.iter().enumerate() {
                if flag(width + 2 + i)? {
                    differing.push(column.clone());
                }
            }
            (!differing.is_empty()).then(|| MismatchDetail::value_mismatch(key.clone(), differing))
        }
        (true, false) => Some(MismatchDetail::new(key.clone(), MismatchKind::MissingOnTarget)),
        (false, true) => Some(MismatchDetail::new(key.clone(), MismatchKind::MissingOnSource)),
        (false, false) => {
            return Err(ComparatorError::fatal(format!(
                "key {key} selected but found on neither side"
            )));
        }
    };
    Ok((key, finding))
}

fn decode_key_value(row: &SqliteRow, index: usize, column: &str) -> Result<KeyValue, ComparatorError> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| ComparatorError::fatal(format!("reading key column {column}: {e}")))?;
    if raw.is_null() {
        return Err(ComparatorError::fatal(format!("natural key column {column} is NULL")));
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let decoded = match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => row.try_get::<i64, _>(index).map(KeyValue::Integer),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row.try_get::<f64, _>(index).map(KeyValue::Real),
        "TEXT" | "VARCHAR" | "CHAR" | "CLOB" | "DATETIME" | "DATE" | "TIME" => {
            row.try_get::<String, _>(index).map(KeyValue::Text)
        }
        other => {
            return Err(ComparatorError::fatal(format!(
                "natural key column {column} has unsupported type {other}"
            )));
        }
    };
    decoded.map_err(|e| ComparatorError::fatal(format!("decoding key column {column}: {e}")))
}

/// Connection-level problems are transient; everything else is fatal.
fn classify(err: sqlx::Error) -> ComparatorError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Protocol(_) => {
            ComparatorError::transient(err.to_string())
        }
        sqlx::Error::Database(db)
            if db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)) =>
        {
            ComparatorError::transient(err.to_string())
        }
        _ => ComparatorError::fatal(err.to_string()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_path(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// `schema.table` or `(default_schema, table)`.
fn split_qualified<'a>(name: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    name.split_once('.').unwrap_or((default_schema, name))
}

/// Validates a link name before it is spliced into `ATTACH`.
pub fn check_link_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid database link name {name:?}");
    }
    if name.eq_ignore_ascii_case("main") || name.eq_ignore_ascii_case("temp") {
        bail!("database link name {name:?} is reserved");
    }
    Ok(())
}
