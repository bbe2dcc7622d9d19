//! Contract of the component that compares one chunk of a table pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::chunk::ChunkRange;
use crate::domain::mapping::TableMapping;
use crate::domain::outcome::ComparisonOutcome;

#[derive(Debug, thiserror::Error)]
pub enum ComparatorError {
    /// Connection loss, pool timeout, lock contention. Worth retrying the
    /// same range.
    #[error("transient comparator failure: {message}")]
    Transient { message: String },

    /// Schema problems, bad SQL, missing columns. Retrying cannot help.
    #[error("comparator failure: {message}")]
    Fatal { message: String },
}

impl ComparatorError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Read-only comparison of one key range.
///
/// Implementations visit the union of both sides' natural keys strictly
/// after `range.lower`, in ascending key order, at most `range.limit` of
/// them, skipping rows whose incremental column is not newer than
/// `incremental_threshold` when one is given. An outcome with no rows
/// signals that the table is exhausted.
#[async_trait]
pub trait ComparatorGateway: Send + Sync {
    async fn compare(
        &self,
        mapping: &TableMapping,
        range: &ChunkRange,
        incremental_threshold: Option<DateTime<Utc>>,
    ) -> Result<ComparisonOutcome, ComparatorError>;
}
