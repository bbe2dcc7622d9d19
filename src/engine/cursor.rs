//! Chunk cursor: computes key ranges and checks that every chunk moves the
//! scan strictly forward.

use crate::domain::chunk::ChunkRange;
use crate::domain::outcome::ComparisonOutcome;
use crate::domain::value_objects::KeyTuple;
use crate::engine::error::EngineError;

/// What the state machine should do after a chunk was compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorStep {
    /// More keys may follow `upper`.
    Continue { upper: KeyTuple },
    /// The table is exhausted. `upper` is the last key visited by this
    /// (short) chunk, or `None` if the chunk was empty.
    Final { upper: Option<KeyTuple> },
}

#[derive(Debug, Clone)]
pub struct ChunkCursor {
    key_columns: Vec<String>,
}

impl ChunkCursor {
    #[must_use]
    pub const fn new(key_columns: Vec<String>) -> Self {
        Self { key_columns }
    }

    /// Range of at most `chunk_size` keys strictly after `last_upper`.
    #[must_use]
    pub fn next_range(&self, last_upper: Option<&KeyTuple>, chunk_size: u32) -> ChunkRange {
        ChunkRange::new(self.key_columns.clone(), last_upper.cloned(), chunk_size)
    }

    /// Validates the comparator's outcome for `range` and decides whether
    /// the scan continues.
    pub fn advance(&self, range: &ChunkRange, outcome: &ComparisonOutcome) -> Result<CursorStep, EngineError> {
        if outcome.is_empty() {
            return Ok(CursorStep::Final { upper: None });
        }
        if !outcome.is_consistent() {
            return Err(EngineError::Cursor(format!(
                "chunk {range}: counts do not add up to {} rows compared",
                outcome.rows_compared
            )));
        }
        if outcome.rows_compared > u64::from(range.limit) {
            return Err(EngineError::Cursor(format!(
                "chunk {range}: comparator returned {} rows, more than the limit",
                outcome.rows_compared
            )));
        }
        let Some(upper) = outcome.last_key.clone() else {
            return Err(EngineError::Cursor(format!(
                "chunk {range}: {} rows compared but no last key reported",
                outcome.rows_compared
            )));
        };
        if upper.arity() != self.key_columns.len() {
            return Err(EngineError::Cursor(format!(
                "chunk {range}: last key {upper} has {} values, natural key has {}",
                upper.arity(),
                self.key_columns.len()
            )));
        }
        if let Some(lower) = &range.lower {
            if upper <= *lower {
                return Err(EngineError::Cursor(format!(
                    "chunk {range}: last key {upper} does not advance past {lower}"
                )));
            }
        }

        if outcome.rows_compared < u64::from(range.limit) {
            Ok(CursorStep::Final { upper: Some(upper) })
        } else {
            Ok(CursorStep::Continue { upper })
        }
    }
}
