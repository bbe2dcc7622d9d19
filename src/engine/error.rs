//! Engine error type.

use crate::domain::gateway::ComparatorError;
use crate::domain::mapping::MappingError;
use crate::domain::run::RunStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Comparator(#[from] ComparatorError),

    #[error("progress/result store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("chunk cursor error: {0}")]
    Cursor(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("{table}: run cannot move from {from} to {to}")]
    InvalidTransition {
        table: String,
        from: RunStatus,
        to: RunStatus,
    },
}

impl EngineError {
    /// Only transient comparator failures are retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Comparator(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<MappingError> for EngineError {
    fn from(err: MappingError) -> Self {
        Self::Config(err.to_string())
    }
}
