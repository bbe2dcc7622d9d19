//! Result of comparing one chunk.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::value_objects::KeyTuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    ValueMismatch,
    MissingOnSource,
    MissingOnTarget,
}

impl MismatchKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValueMismatch => "VALUE_MISMATCH",
            Self::MissingOnSource => "MISSING_ON_SOURCE",
            Self::MissingOnTarget => "MISSING_ON_TARGET",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "VALUE_MISMATCH" => Some(Self::ValueMismatch),
            "MISSING_ON_SOURCE" => Some(Self::MissingOnSource),
            "MISSING_ON_TARGET" => Some(Self::MissingOnTarget),
            _ => None,
        }
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrepant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchDetail {
    pub key: KeyTuple,
    pub kind: MismatchKind,
    /// Differing columns, only for value mismatches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

impl MismatchDetail {
    #[must_use]
    pub const fn new(key: KeyTuple, kind: MismatchKind) -> Self {
        Self {
            key,
            kind,
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn value_mismatch(key: KeyTuple, columns: Vec<String>) -> Self {
        Self {
            key,
            kind: MismatchKind::ValueMismatch,
            columns,
        }
    }
}

/// Counts and samples for one chunk, as reported by the comparator.
///
/// `last_key` is the greatest key visited; `None` together with
/// `rows_compared == 0` means the table is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub rows_compared: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub missing_on_source: u64,
    pub missing_on_target: u64,
    pub last_key: Option<KeyTuple>,
    /// Discrepancies in ascending key order.
    pub details: Vec<MismatchDetail>,
}

impl ComparisonOutcome {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows_compared == 0
    }

    /// Records one visited key.
    pub fn record(&mut self, key: KeyTuple, finding: Option<MismatchDetail>) {
        self.rows_compared += 1;
        match finding.as_ref().map(|d| d.kind) {
            None => self.matched += 1,
            Some(MismatchKind::ValueMismatch) => self.mismatched += 1,
            Some(MismatchKind::MissingOnSource) => self.missing_on_source += 1,
            Some(MismatchKind::MissingOnTarget) => self.missing_on_target += 1,
        }
        if let Some(detail) = finding {
            self.details.push(detail);
        }
        self.last_key = Some(key);
    }

    /// Counts add up to the number of keys visited.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.matched + self.mismatched + self.missing_on_source + self.missing_on_target
            == self.rows_compared
    }
}
