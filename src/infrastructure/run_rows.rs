//! Column codecs shared by the sqlx repositories.
//!
//! Timestamps are stored as RFC 3339 text with microsecond precision and a
//! `Z` suffix, so text order equals time order.

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::domain::run::{RunStatus, RunTallies};
use crate::domain::value_objects::RunId;

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn fmt_opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(fmt_ts)
}

pub fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("Failed to parse {column}: {e}"))
}

pub fn get_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.try_get(column)?;
    parse_ts(column, &value)
}

pub fn get_opt_ts(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.try_get(column)?;
    value.map(|v| parse_ts(column, &v)).transpose()
}

pub fn get_run_id(row: &SqliteRow) -> Result<RunId> {
    let value: String = row.try_get("run_id")?;
    RunId::parse(&value).map_err(|e| anyhow!("Invalid run_id {value}: {e}"))
}

pub fn get_status(row: &SqliteRow) -> Result<RunStatus> {
    let value: String = row.try_get("status")?;
    value.parse().map_err(|e: String| anyhow!(e))
}

pub fn get_tallies(row: &SqliteRow) -> Result<RunTallies> {
    Ok(RunTallies {
        compared: row.try_get::<i64, _>("rows_compared")? as u64,
        matched: row.try_get::<i64, _>("rows_matched")? as u64,
        mismatched: row.try_get::<i64, _>("rows_mismatched")? as u64,
        missing_on_source: row.try_get::<i64, _>("missing_on_source")? as u64,
        missing_on_target: row.try_get::<i64, _>("missing_on_target")? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();
        assert!(fmt_ts(early) < fmt_ts(late));
        assert_eq!(parse_ts("t", &fmt_ts(late)).unwrap(), late);
        assert!(parse_ts("t", "yesterday").is_err());
    }
}
