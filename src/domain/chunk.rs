//! Key range describing one chunk of a table scan.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::value_objects::{KeyTuple, KeyValue};

/// Comparison operator inside a lower-bound term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyOp {
    Eq,
    Gt,
}

impl KeyOp {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
        }
    }
}

/// `column <op> value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTerm<'a> {
    pub column: &'a str,
    pub op: KeyOp,
    pub value: &'a KeyValue,
}

/// Half-open key range: keys strictly greater than `lower`, at most `limit`
/// of them, in ascending natural-key order.
///
/// `upper` is unknown while the chunk is being compared and is filled in
/// from the last key the comparison actually visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRange {
    pub key_columns: Vec<String>,
    pub lower: Option<KeyTuple>,
    pub upper: Option<KeyTuple>,
    pub limit: u32,
}

impl ChunkRange {
    #[must_use]
    pub fn new(key_columns: Vec<String>, lower: Option<KeyTuple>, limit: u32) -> Self {
        Self {
            key_columns,
            lower,
            upper: None,
            limit,
        }
    }

    #[must_use]
    pub fn with_upper(mut self, upper: KeyTuple) -> Self {
        self.upper = Some(upper);
        self
    }

    #[must_use]
    pub fn is_first(&self) -> bool {
        self.lower.is_none()
    }

    /// Lexicographic `(k1, .., kn) > (v1, .., vn)` expanded into a
    /// disjunction of conjunctions:
    ///
    /// ```text
    /// k1 > v1
    /// OR (k1 = v1 AND k2 > v2)
    /// OR (k1 = v1 AND k2 = v2 AND k3 > v3) ...
    /// ```
    ///
    /// Empty when the range starts at the beginning of the table.
    #[must_use]
    pub fn lower_bound_disjuncts(&self) -> Vec<Vec<KeyTerm<'_>>> {
        let Some(lower) = &self.lower else {
            return Vec::new();
        };
        let pairs: Vec<_> = self.key_columns.iter().zip(lower.values()).collect();

        (0..pairs.len())
            .map(|pivot| {
                pairs[..=pivot]
                    .iter()
                    .enumerate()
                    .map(|(i, (column, value))| KeyTerm {
                        column: column.as_str(),
                        op: if i == pivot { KeyOp::Gt } else { KeyOp::Eq },
                        value,
                    })
                    .collect()
            })
            .collect()
    }

    /// Whether `key` falls inside this range once `upper` is known.
    #[must_use]
    pub fn contains(&self, key: &KeyTuple) -> bool {
        let above_lower = self.lower.as_ref().is_none_or(|lower| key > lower);
        let below_upper = self.upper.as_ref().is_none_or(|upper| key <= upper);
        above_lower && below_upper
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Some(lower) => write!(f, "({lower}")?,
            None => write!(f, "(-inf")?,
        }
        match &self.upper {
            Some(upper) => write!(f, ", {upper}]")?,
            None => write!(f, ", +inf)")?,
        }
        write!(f, " limit {}", self.limit)
    }
}
