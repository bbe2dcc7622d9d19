//! In-memory view of every table task scheduled by one coordinator.
//!
//! Owned by the coordinator and handed to its tasks by reference; it only
//! tracks scheduling state. Run state itself lives in the state machines
//! and the progress store.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::run::RunStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Waiting for a concurrency slot.
    Queued,
    /// Holding a slot and comparing chunks.
    Active,
    /// Window closed; slot released until `resume_at`.
    Paused { resume_at: DateTime<Utc> },
    /// Backing off after a transient failure.
    Retrying { attempt: u32, resume_at: DateTime<Utc> },
    /// Task ended with the run in this status.
    Finished(RunStatus),
}

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    slots: Arc<RwLock<HashMap<String, SlotState>>>,
}

impl RunRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, table_id: &str, state: SlotState) {
        let mut slots = self.slots.write().await;
        slots.insert(table_id.to_string(), state);
    }

    pub async fn get(&self, table_id: &str) -> Option<SlotState> {
        self.slots.read().await.get(table_id).cloned()
    }

    /// Sorted copy of all slots.
    pub async fn snapshot(&self) -> Vec<(String, SlotState)> {
        let slots = self.slots.read().await;
        let mut entries: Vec<_> = slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn count_active(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|s| matches!(s, SlotState::Active))
            .count()
    }

    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }
}
