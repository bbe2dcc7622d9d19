//! Aggregate outcome of one `run_all` call and the notification contract.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::domain::outcome::MismatchDetail;
use crate::domain::run::{RunStatus, RunTallies, ValidationRun};
use crate::domain::value_objects::RunId;

/// Per-table line of the aggregate report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub table_id: String,
    /// Absent when the table failed before a run could be recorded.
    pub run_id: Option<RunId>,
    pub status: RunStatus,
    pub tallies: RunTallies,
    pub chunks_completed: u64,
    pub duration_secs: f64,
    pub error: Option<String>,
    pub mismatch_samples: Vec<MismatchDetail>,
}

impl TableReport {
    #[must_use]
    pub fn from_run(run: &ValidationRun, now: DateTime<Utc>) -> Self {
        Self {
            table_id: run.table_id.clone(),
            run_id: Some(run.run_id),
            status: run.status,
            tallies: run.tallies,
            chunks_completed: run.chunks_completed,
            duration_secs: run.duration(now).num_milliseconds() as f64 / 1000.0,
            error: run.error.clone(),
            mismatch_samples: run.mismatch_samples.clone(),
        }
    }

    #[must_use]
    pub fn failed_before_start(table_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            run_id: None,
            status: RunStatus::Failed,
            tallies: RunTallies::default(),
            chunks_completed: 0,
            duration_secs: 0.0,
            error: Some(error.into()),
            mismatch_samples: Vec::new(),
        }
    }

    /// Validation ran to the end of the table.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Overall verdict, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportVerdict {
    /// Every table completed with zero findings.
    Clean,
    /// Every table completed, some with findings.
    Discrepancies,
    /// At least one table could not be validated.
    Incomplete,
}

impl ReportVerdict {
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Discrepancies => 1,
            Self::Incomplete => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
    pub success: bool,
}

impl AggregateReport {
    #[must_use]
    pub fn new(started_at: DateTime<Utc>, finished_at: DateTime<Utc>, tables: Vec<TableReport>) -> Self {
        let success = tables.iter().all(|t| t.is_complete() && t.tallies.is_clean());
        Self {
            started_at,
            finished_at,
            tables,
            success,
        }
    }

    #[must_use]
    pub fn verdict(&self) -> ReportVerdict {
        if self.tables.iter().any(|t| !t.is_complete()) {
            ReportVerdict::Incomplete
        } else if self.tables.iter().any(|t| !t.tallies.is_clean()) {
            ReportVerdict::Discrepancies
        } else {
            ReportVerdict::Clean
        }
    }

    #[must_use]
    pub fn table(&self, table_id: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table_id == table_id)
    }

    /// Tables that could not be validated.
    pub fn errors(&self) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(|t| !t.is_complete())
    }

    /// Tables validated to the end with discrepancies.
    pub fn findings(&self) -> impl Iterator<Item = &TableReport> {
        self.tables
            .iter()
            .filter(|t| t.is_complete() && !t.tallies.is_clean())
    }

    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;

        let _ = writeln!(out, "Data Validation Report - {} tables processed", self.tables.len());
        let _ = writeln!(
            out,
            "Started {}  Finished {}  ({elapsed:.2}s)",
            self.started_at.to_rfc3339(),
            self.finished_at.to_rfc3339()
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<32} {:<10} {:>12} {:>12} {:>12} {:>12} {:>12} {:>10}",
            "TABLE", "STATUS", "COMPARED", "MATCHED", "MISMATCHED", "MISS_SOURCE", "MISS_TARGET", "SECONDS"
        );
        for t in &self.tables {
            let _ = writeln!(
                out,
                "{:<32} {:<10} {:>12} {:>12} {:>12} {:>12} {:>12} {:>10.2}",
                t.table_id,
                t.status.as_str(),
                t.tallies.compared,
                t.tallies.matched,
                t.tallies.mismatched,
                t.tallies.missing_on_source,
                t.tallies.missing_on_target,
                t.duration_secs
            );
        }

        let errors: Vec<_> = self.errors().collect();
        if !errors.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Could not complete validation:");
            for t in errors {
                let cause = t.error.as_deref().unwrap_or("not finished");
                let _ = writeln!(out, "  - {} [{}]: {cause}", t.table_id, t.status);
            }
        }

        let findings: Vec<_> = self.findings().collect();
        if !findings.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Completed with discrepancies:");
            for t in findings {
                let _ = writeln!(
                    out,
                    "  - {}: {} mismatched, {} missing on source, {} missing on target",
                    t.table_id, t.tallies.mismatched, t.tallies.missing_on_source, t.tallies.missing_on_target
                );
                for sample in t.mismatch_samples.iter().take(10) {
                    if sample.columns.is_empty() {
                        let _ = writeln!(out, "      {} {}", sample.kind, sample.key);
                    } else {
                        let _ = writeln!(out, "      {} {} [{}]", sample.kind, sample.key, sample.columns.join(", "));
                    }
                }
            }
        }

        let completed = self.tables.iter().filter(|t| t.is_complete()).count();
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Summary: {} tables, {completed} completed, {} with discrepancies, {} not completed",
            self.tables.len(),
            self.findings().count(),
            self.errors().count()
        );
        out
    }
}

/// Delivers the aggregate report. Failures are logged by the caller and
/// never fail the validation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, report: &AggregateReport) -> Result<()>;
}
