//! Validation run entity, its lifecycle and running tallies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::outcome::{ComparisonOutcome, MismatchDetail};
use crate::domain::value_objects::{KeyTuple, RunId};

/// Lifecycle status of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// A persisted run in this status can be picked up by `--resume`.
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        !matches!(self, Self::Completed)
    }

    /// Allowed lifecycle edges.
    ///
    /// `FAILED -> RUNNING` and `PAUSED -> RUNNING` are explicit resumes;
    /// `FAILED -> PAUSED` is a resumed run that meets a closed window or a
    /// cancellation before its first chunk. `RUNNING -> RUNNING` is a
    /// checkpoint.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use RunStatus::{Completed, Failed, Paused, Pending, Running};
        matches!(
            (self, next),
            (Pending, Running | Paused | Failed)
                | (Running, Running | Paused | Completed | Failed)
                | (Paused, Running | Paused | Failed)
                | (Failed, Running | Paused)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("Invalid RunStatus: {other}")),
        }
    }
}

/// Exact per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTallies {
    pub compared: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub missing_on_source: u64,
    pub missing_on_target: u64,
}

impl RunTallies {
    pub fn absorb(&mut self, outcome: &ComparisonOutcome) {
        self.compared += outcome.rows_compared;
        self.matched += outcome.matched;
        self.mismatched += outcome.mismatched;
        self.missing_on_source += outcome.missing_on_source;
        self.missing_on_target += outcome.missing_on_target;
    }

    /// Rows that differ in any way.
    #[must_use]
    pub const fn findings(&self) -> u64 {
        self.mismatched + self.missing_on_source + self.missing_on_target
    }

    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.findings() == 0
    }
}

/// One attempt to validate one table mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub run_id: RunId,
    pub table_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Upper key of the last completed chunk; `None` before the first one.
    pub last_key: Option<KeyTuple>,
    pub tallies: RunTallies,
    pub chunks_completed: u64,
    /// Incremental column in force for this run, if any.
    pub incremental_column: Option<String>,
    /// Rows not newer than this were excluded from the scan.
    pub incremental_threshold: Option<DateTime<Utc>>,
    /// Order-stable prefix of discrepancies, bounded by the configured cap.
    #[serde(default)]
    pub mismatch_samples: Vec<MismatchDetail>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ValidationRun {
    #[must_use]
    pub fn new(table_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: RunId::new(),
            table_id: table_id.into(),
            status: RunStatus::Pending,
            started_at,
            ended_at: None,
            last_key: None,
            tallies: RunTallies::default(),
            chunks_completed: 0,
            incremental_column: None,
            incremental_threshold: None,
            mismatch_samples: Vec::new(),
            error: None,
            updated_at: started_at,
        }
    }

    /// Folds one chunk outcome into the run.
    ///
    /// Counts always add; samples are appended in order until `cap` is
    /// reached and dropped afterwards.
    pub fn absorb_chunk(&mut self, outcome: &ComparisonOutcome, cap: usize) {
        self.tallies.absorb(outcome);
        let room = cap.saturating_sub(self.mismatch_samples.len());
        self.mismatch_samples
            .extend(outcome.details.iter().take(room).cloned());
        if let Some(key) = &outcome.last_key {
            self.last_key = Some(key.clone());
        }
        self.chunks_completed += 1;
    }

    /// Wall-clock time spent so far, or in total once ended.
    #[must_use]
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::MismatchKind;

    fn outcome_with_missing(keys: std::ops::Range<i64>) -> ComparisonOutcome {
        let mut outcome = ComparisonOutcome::empty();
        for k in keys {
            let key = KeyTuple::single(k);
            outcome.record(
                key.clone(),
                Some(MismatchDetail::new(key, MismatchKind::MissingOnTarget)),
            );
        }
        outcome
    }

    #[test]
    fn absorb_caps_samples_but_not_counts() {
        let mut run = ValidationRun::new("T", Utc::now());
        run.absorb_chunk(&outcome_with_missing(0..3), 4);
        run.absorb_chunk(&outcome_with_missing(3..6), 4);

        assert_eq!(run.tallies.missing_on_target, 6);
        assert_eq!(run.tallies.compared, 6);
        assert_eq!(run.mismatch_samples.len(), 4);
        let kept: Vec<_> = run.mismatch_samples.iter().map(|d| d.key.clone()).collect();
        assert_eq!(kept, (0..4).map(KeyTuple::single).collect::<Vec<_>>());
        assert_eq!(run.last_key, Some(KeyTuple::single(5)));
        assert_eq!(run.chunks_completed, 2);
    }

    #[test]
    fn zero_cap_keeps_no_samples() {
        let mut run = ValidationRun::new("T", Utc::now());
        run.absorb_chunk(&outcome_with_missing(0..3), 0);
        assert!(run.mismatch_samples.is_empty());
        assert_eq!(run.tallies.findings(), 3);
        assert!(!run.tallies.is_clean());
    }

    #[test]
    fn lifecycle_edges() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Paused));
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Failed.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Failed.can_transition_to(RunStatus::Paused));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn status_parses_its_storage_form() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("DONE".parse::<RunStatus>().is_err());
        assert!(RunStatus::Failed.is_resumable());
        assert!(!RunStatus::Completed.is_resumable());
    }
}
