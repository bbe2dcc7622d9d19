//! In-memory progress and result store for tests and dry runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::outcome::MismatchDetail;
use crate::domain::repositories::{ProgressRepository, ResultRepository};
use crate::domain::run::{RunStatus, ValidationRun};
use crate::domain::value_objects::RunId;

#[derive(Debug, Default)]
struct StoreState {
    /// Insertion order breaks ties between runs started at the same instant.
    runs: Vec<ValidationRun>,
    results: Vec<ValidationRun>,
    samples: HashMap<RunId, Vec<MismatchDetail>>,
    checkpoint_writes: u64,
}

impl StoreState {
    fn latest_run(&self, table_id: &str) -> Option<&ValidationRun> {
        self.runs
            .iter()
            .enumerate()
            .filter(|(_, run)| run.table_id == table_id)
            .max_by_key(|(i, run)| (run.started_at, *i))
            .map(|(_, run)| run)
    }
}

/// Implements both repository traits over shared in-process state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryValidationStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryValidationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run ever checkpointed, in first-seen order.
    pub async fn runs(&self) -> Vec<ValidationRun> {
        self.state.read().await.runs.clone()
    }

    pub async fn results(&self) -> Vec<ValidationRun> {
        self.state.read().await.results.clone()
    }

    pub async fn samples(&self, run_id: RunId) -> Vec<MismatchDetail> {
        self.state
            .read()
            .await
            .samples
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn checkpoint_writes(&self) -> u64 {
        self.state.read().await.checkpoint_writes
    }
}

#[async_trait]
impl ProgressRepository for InMemoryValidationStore {
    async fn load_checkpoint(&self, table_id: &str) -> Result<Option<ValidationRun>> {
        Ok(self.state.read().await.latest_run(table_id).cloned())
    }

    async fn save_checkpoint(&self, run: &ValidationRun) -> Result<()> {
        let mut state = self.state.write().await;
        state.checkpoint_writes += 1;
        match state.runs.iter_mut().find(|r| r.run_id == run.run_id) {
            Some(existing) => *existing = run.clone(),
            None => state.runs.push(run.clone()),
        }
        Ok(())
    }

    async fn list_resumable(&self) -> Result<Vec<ValidationRun>> {
        let state = self.state.read().await;
        let mut tables: Vec<&str> = state.runs.iter().map(|r| r.table_id.as_str()).collect();
        tables.sort_unstable();
        tables.dedup();

        Ok(tables
            .into_iter()
            .filter_map(|table| state.latest_run(table))
            .filter(|run| run.status.is_resumable())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResultRepository for InMemoryValidationStore {
    async fn save_result(&self, run: &ValidationRun) -> Result<()> {
        let mut state = self.state.write().await;
        let mut summary = run.clone();
        summary.mismatch_samples.clear();
        match state.results.iter_mut().find(|r| r.run_id == run.run_id) {
            Some(existing) => *existing = summary,
            None => state.results.push(summary),
        }
        Ok(())
    }

    async fn last_success_timestamp(
        &self,
        table_id: &str,
        incremental_column: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        Ok(state
            .results
            .iter()
            .filter(|r| r.table_id == table_id && r.status == RunStatus::Completed)
            .filter(|r| {
                r.incremental_column
                    .as_deref()
                    .is_none_or(|c| c.eq_ignore_ascii_case(incremental_column))
            })
            .map(|r| r.started_at)
            .max())
    }

    async fn save_mismatch_samples(&self, run_id: RunId, samples: &[MismatchDetail]) -> Result<()> {
        self.state.write().await.samples.insert(run_id, samples.to_vec());
        Ok(())
    }

    async fn recent_results(&self, limit: u32) -> Result<Vec<ValidationRun>> {
        let state = self.state.read().await;
        let mut results = state.results.clone();
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        results.truncate(limit as usize);
        Ok(results)
    }
}
