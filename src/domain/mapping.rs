//! Static description of one source/target table pair.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::window::RunWindow;

/// Table pair to validate, resolved from configuration.
///
/// Column names are matched case-insensitively, the way the database
/// catalogs treat unquoted identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub source_table: String,
    pub target_table: String,
    /// Ordered natural-key columns; chunk ordering follows this order.
    pub natural_keys: Vec<String>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    pub chunk_size: u32,
    #[serde(default)]
    pub incremental_mode: bool,
    #[serde(default)]
    pub incremental_column: Option<String>,
    /// Static row filter applied on both sides.
    #[serde(default)]
    pub where_clause: Option<String>,
    /// Overrides the global run window for this table only.
    #[serde(default)]
    pub run_window: Option<RunWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("{table}: at least one natural key column is required")]
    NoNaturalKeys { table: String },

    #[error("{table}: natural key column '{column}' is listed more than once")]
    DuplicateKey { table: String, column: String },

    #[error("{table}: natural key column '{column}' is also excluded from comparison")]
    KeyExcluded { table: String, column: String },

    #[error("{table}: chunk_size must be greater than zero")]
    ZeroChunkSize { table: String },

    #[error("{table}: incremental mode requires an incremental column")]
    MissingIncrementalColumn { table: String },

    #[error("{table}: incremental column '{column}' cannot be a natural key column")]
    IncrementalColumnIsKey { table: String, column: String },

    #[error("{table}: source and target table names must not be empty")]
    EmptyTableName { table: String },
}

impl TableMapping {
    /// Minimal mapping with defaults for every optional attribute.
    pub fn new(
        source_table: impl Into<String>,
        target_table: impl Into<String>,
        natural_keys: Vec<String>,
        chunk_size: u32,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            natural_keys,
            exclude_columns: Vec::new(),
            chunk_size,
            incremental_mode: false,
            incremental_column: None,
            where_clause: None,
            run_window: None,
        }
    }

    /// Stable identifier used to key progress and results.
    #[must_use]
    pub fn table_id(&self) -> String {
        if self.source_table.eq_ignore_ascii_case(&self.target_table) {
            self.source_table.clone()
        } else {
            format!("{}=>{}", self.source_table, self.target_table)
        }
    }

    /// True when `name` selects this mapping (table id or source table).
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        self.table_id().eq_ignore_ascii_case(name) || self.source_table.eq_ignore_ascii_case(name)
    }

    /// Incremental column, only when incremental mode is active.
    #[must_use]
    pub fn incremental_column(&self) -> Option<&str> {
        if self.incremental_mode {
            self.incremental_column.as_deref()
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_excluded(&self, column: &str) -> bool {
        self.exclude_columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    #[must_use]
    pub fn is_natural_key(&self, column: &str) -> bool {
        self.natural_keys.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        let table = self.table_id();

        if self.source_table.trim().is_empty() || self.target_table.trim().is_empty() {
            return Err(MappingError::EmptyTableName { table });
        }
        if self.natural_keys.is_empty() {
            return Err(MappingError::NoNaturalKeys { table });
        }

        let mut seen = HashSet::new();
        for key in &self.natural_keys {
            if !seen.insert(key.to_ascii_lowercase()) {
                return Err(MappingError::DuplicateKey { table, column: key.clone() });
            }
            if self.is_excluded(key) {
                return Err(MappingError::KeyExcluded { table, column: key.clone() });
            }
        }

        if self.chunk_size == 0 {
            return Err(MappingError::ZeroChunkSize { table });
        }

        if self.incremental_mode {
            match self.incremental_column.as_deref() {
                None | Some("") => return Err(MappingError::MissingIncrementalColumn { table }),
                Some(column) if self.is_natural_key(column) => {
                    return Err(MappingError::IncrementalColumnIsKey {
                        table,
                        column: column.to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}
