//! Per-table validation state machine.
//!
//! Drives one table from PENDING to COMPLETED or FAILED, one chunk at a
//! time. Every mutation is applied to a copy of the run, persisted, and
//! only then adopted, so the in-memory run never gets ahead of the
//! progress store.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::gateway::ComparatorGateway;
use crate::domain::mapping::TableMapping;
use crate::domain::report::TableReport;
use crate::domain::repositories::{ProgressRepository, ResultRepository};
use crate::domain::run::{RunStatus, ValidationRun};
use crate::engine::cursor::{ChunkCursor, CursorStep};
use crate::engine::error::EngineError;
use crate::engine::gate::{GateDecision, RunWindowGate, WallClock};
use crate::engine::incremental;

/// Collaborators shared by every table task.
#[derive(Clone)]
pub struct EngineContext {
    pub comparator: Arc<dyn ComparatorGateway>,
    pub progress: Arc<dyn ProgressRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub clock: Arc<dyn WallClock>,
}

/// How a call to [`TableStateMachine::advance`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Completed,
    /// Window closed; call `advance` again after `wait`.
    Paused { wait: Duration },
    /// Cancellation observed between chunks; run left PAUSED.
    Cancelled,
}

pub struct TableStateMachine {
    mapping: Arc<TableMapping>,
    run: ValidationRun,
    cursor: ChunkCursor,
    ctx: EngineContext,
    max_mismatch_details: usize,
}

impl std::fmt::Debug for TableStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStateMachine")
            .field("table", &self.run.table_id)
            .field("run_id", &self.run.run_id)
            .field("status", &self.run.status)
            .finish_non_exhaustive()
    }
}

impl TableStateMachine {
    /// Creates and persists a new PENDING run. Any earlier unfinished run
    /// for the table is superseded.
    pub async fn start_fresh(
        mapping: Arc<TableMapping>,
        ctx: EngineContext,
        max_mismatch_details: usize,
    ) -> Result<Self, EngineError> {
        let threshold = incremental::resolve_threshold(&mapping, ctx.results.as_ref()).await?;

        let mut run = ValidationRun::new(mapping.table_id(), ctx.clock.now_utc());
        run.incremental_column = mapping.incremental_column().map(str::to_string);
        run.incremental_threshold = threshold;
        ctx.progress.save_checkpoint(&run).await?;

        info!(table = %run.table_id, run_id = %run.run_id, "Created validation run");
        Ok(Self::assemble(mapping, run, ctx, max_mismatch_details))
    }

    /// Picks up a persisted, unfinished run at its checkpoint. The
    /// incremental cutoff recorded on the run is kept.
    pub fn resume(
        mapping: Arc<TableMapping>,
        checkpoint: ValidationRun,
        ctx: EngineContext,
        max_mismatch_details: usize,
    ) -> Result<Self, EngineError> {
        if checkpoint.table_id != mapping.table_id() {
            return Err(EngineError::Config(format!(
                "checkpoint for {} cannot resume mapping {}",
                checkpoint.table_id,
                mapping.table_id()
            )));
        }
        if !checkpoint.status.is_resumable() {
            return Err(EngineError::InvalidTransition {
                table: checkpoint.table_id,
                from: checkpoint.status,
                to: RunStatus::Running,
            });
        }

        info!(
            table = %checkpoint.table_id,
            run_id = %checkpoint.run_id,
            status = %checkpoint.status,
            chunks = checkpoint.chunks_completed,
            last_key = ?checkpoint.last_key,
            "Resuming validation run from checkpoint"
        );
        Ok(Self::assemble(mapping, checkpoint, ctx, max_mismatch_details))
    }

    fn assemble(
        mapping: Arc<TableMapping>,
        run: ValidationRun,
        ctx: EngineContext,
        max_mismatch_details: usize,
    ) -> Self {
        let cursor = ChunkCursor::new(mapping.natural_keys.clone());
        Self {
            mapping,
            run,
            cursor,
            ctx,
            max_mismatch_details,
        }
    }

    #[must_use]
    pub const fn run(&self) -> &ValidationRun {
        &self.run
    }

    #[must_use]
    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }

    #[must_use]
    pub fn table_id(&self) -> &str {
        &self.run.table_id
    }

    #[must_use]
    pub fn report(&self) -> TableReport {
        TableReport::from_run(&self.run, self.ctx.clock.now_utc())
    }

    /// Compares chunks until the table is exhausted, the window closes or
    /// cancellation is requested.
    ///
    /// Errors leave the run at its last checkpoint (status RUNNING); the
    /// caller decides between retrying and [`Self::fail`].
    pub async fn advance(
        &mut self,
        gate: &RunWindowGate,
        cancel: &CancellationToken,
    ) -> Result<AdvanceOutcome, EngineError> {
        loop {
            if cancel.is_cancelled() {
                self.suspend().await?;
                return Ok(AdvanceOutcome::Cancelled);
            }

            if let GateDecision::Closed { wait } = gate.check() {
                self.transition(RunStatus::Paused).await?;
                info!(
                    table = %self.run.table_id,
                    wait_secs = wait.as_secs(),
                    "Run window closed, pausing at checkpoint"
                );
                return Ok(AdvanceOutcome::Paused { wait });
            }

            if self.run.status != RunStatus::Running {
                self.transition(RunStatus::Running).await?;
            }

            let range = self
                .cursor
                .next_range(self.run.last_key.as_ref(), self.mapping.chunk_size);
            let outcome = self
                .ctx
                .comparator
                .compare(&self.mapping, &range, self.run.incremental_threshold)
                .await?;
            let step = self.cursor.advance(&range, &outcome)?;

            let mut next = self.run.clone();
            if !outcome.is_empty() {
                next.absorb_chunk(&outcome, self.max_mismatch_details);
            }
            next.updated_at = self.ctx.clock.now_utc();

            match step {
                CursorStep::Continue { upper } => {
                    self.commit(next).await?;
                    debug!(
                        table = %self.run.table_id,
                        chunk = self.run.chunks_completed,
                        rows = outcome.rows_compared,
                        upper = %upper,
                        "Checkpointed chunk"
                    );
                }
                CursorStep::Final { .. } => {
                    self.finalize(next).await?;
                    return Ok(AdvanceOutcome::Completed);
                }
            }
        }
    }

    /// Persists FAILED with the cause, keeping the last good checkpoint.
    pub async fn fail(&mut self, cause: &EngineError) -> Result<(), EngineError> {
        let mut next = self.run.clone();
        let now = self.ctx.clock.now_utc();
        next.status = RunStatus::Failed;
        next.error = Some(cause.to_string());
        next.ended_at = Some(now);
        next.updated_at = now;

        self.ctx.results.save_result(&next).await?;
        self.ctx
            .results
            .save_mismatch_samples(next.run_id, &next.mismatch_samples)
            .await?;
        self.commit(next).await?;

        warn!(
            table = %self.run.table_id,
            run_id = %self.run.run_id,
            chunks = self.run.chunks_completed,
            error = %cause,
            "Validation run failed"
        );
        Ok(())
    }

    /// Persists PAUSED at the current checkpoint. A resumed FAILED run is
    /// paused as well; a COMPLETED run is left alone.
    pub async fn suspend(&mut self) -> Result<(), EngineError> {
        if matches!(self.run.status, RunStatus::Completed | RunStatus::Paused) {
            return Ok(());
        }
        self.transition(RunStatus::Paused).await?;
        info!(table = %self.run.table_id, chunks = self.run.chunks_completed, "Validation run suspended");
        Ok(())
    }

    async fn finalize(&mut self, mut next: ValidationRun) -> Result<(), EngineError> {
        next.status = RunStatus::Completed;
        next.ended_at = Some(next.updated_at);

        // The result goes first: a crash before the COMPLETED checkpoint
        // re-runs the final chunk and overwrites the same result row.
        self.ctx.results.save_result(&next).await?;
        self.ctx
            .results
            .save_mismatch_samples(next.run_id, &next.mismatch_samples)
            .await?;
        self.commit(next).await?;

        let t = &self.run.tallies;
        info!(
            table = %self.run.table_id,
            run_id = %self.run.run_id,
            chunks = self.run.chunks_completed,
            compared = t.compared,
            matched = t.matched,
            mismatched = t.mismatched,
            missing_on_source = t.missing_on_source,
            missing_on_target = t.missing_on_target,
            "Validation run completed"
        );
        Ok(())
    }

    async fn transition(&mut self, status: RunStatus) -> Result<(), EngineError> {
        if !self.run.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                table: self.run.table_id.clone(),
                from: self.run.status,
                to: status,
            });
        }
        let mut next = self.run.clone();
        next.status = status;
        next.updated_at = self.ctx.clock.now_utc();
        if status == RunStatus::Running || self.run.status == RunStatus::Failed {
            next.error = None;
            next.ended_at = None;
        }
        self.commit(next).await
    }

    async fn commit(&mut self, next: ValidationRun) -> Result<(), EngineError> {
        self.ctx.progress.save_checkpoint(&next).await?;
        self.run = next;
        Ok(())
    }
}
