//! # Validation Coordinator
//!
//! Runs one state machine per selected table under bounded concurrency.
//! A task holds a concurrency slot only while it is comparing chunks; it
//! gives the slot back while waiting for its run window or a retry backoff
//! and sleeps exactly until the reported wake-up time.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::mapping::TableMapping;
use crate::domain::report::{AggregateReport, Notifier, TableReport};
use crate::domain::run::{RunStatus, ValidationRun};
use crate::domain::window::RunWindow;
use crate::engine::error::EngineError;
use crate::engine::gate::RunWindowGate;
use crate::engine::registry::{RunRegistry, SlotState};
use crate::engine::retry::RetryPolicy;
use crate::engine::state_machine::{AdvanceOutcome, EngineContext, TableStateMachine};

/// Engine-level knobs, resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_concurrent_validations: usize,
    pub max_mismatch_details: usize,
    /// Default window; a mapping's own window takes precedence.
    pub run_window: Option<RunWindow>,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_validations: 5,
            max_mismatch_details: 1000,
            run_window: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrent_validations == 0 {
            return Err(EngineError::Config(
                "max_concurrent_validations must be at least 1".into(),
            ));
        }
        self.retry.validate().map_err(EngineError::Config)
    }
}

pub struct ValidationCoordinator {
    mappings: Vec<Arc<TableMapping>>,
    settings: EngineSettings,
    ctx: EngineContext,
    notifier: Option<Arc<dyn Notifier>>,
    registry: RunRegistry,
    cancel: CancellationToken,
}

impl ValidationCoordinator {
    pub fn new(mappings: Vec<TableMapping>, settings: EngineSettings, ctx: EngineContext) -> Self {
        Self {
            mappings: mappings.into_iter().map(Arc::new).collect(),
            settings,
            ctx,
            notifier: None,
            registry: RunRegistry::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Token that cancels the current and future `run_all` calls. Tables
    /// stop between chunks and are left PAUSED.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Validates the selected tables (all when `selected` is `None` or
    /// empty) and hands the aggregate report to the notifier.
    ///
    /// Configuration problems fail the whole call before any table starts.
    /// Per-table failures are recorded in the report instead.
    pub async fn run_all(
        &self,
        selected: Option<&[String]>,
        resume: bool,
    ) -> Result<AggregateReport, EngineError> {
        self.validate()?;
        let mappings = self.select(selected)?;
        let started_at = self.ctx.clock.now_utc();
        self.registry.clear().await;

        let work = if resume {
            self.resumable_work(mappings).await?
        } else {
            mappings.into_iter().map(|m| (m, None)).collect()
        };

        info!(
            tables = work.len(),
            resume,
            max_concurrent = self.settings.max_concurrent_validations,
            "Starting validation"
        );

        let mut tables = Vec::with_capacity(work.len());
        let mut handles: Vec<(String, JoinHandle<TableReport>)> = Vec::with_capacity(work.len());
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_validations));

        for (mapping, checkpoint) in work {
            let table_id = mapping.table_id();
            let machine = match self.prepare(Arc::clone(&mapping), checkpoint).await {
                Ok(machine) => machine,
                Err(err) => {
                    error!(table = %table_id, error = %err, "Could not start validation");
                    tables.push((table_id.clone(), Some(TableReport::failed_before_start(&table_id, err.to_string()))));
                    continue;
                }
            };

            let window = mapping.run_window.clone().or_else(|| self.settings.run_window.clone());
            let task = TableTask {
                machine,
                gate: RunWindowGate::new(window, Arc::clone(&self.ctx.clock)),
                semaphore: Arc::clone(&semaphore),
                registry: self.registry.clone(),
                retry: self.settings.retry.clone(),
                cancel: self.cancel.clone(),
                ctx: self.ctx.clone(),
            };
            self.registry.set(&table_id, SlotState::Queued).await;
            tables.push((table_id.clone(), None));
            handles.push((table_id, tokio::spawn(task.drive())));
        }

        let (ids, handles): (Vec<String>, Vec<JoinHandle<TableReport>>) = handles.into_iter().unzip();
        let finished: Vec<TableReport> = join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, table_id)| match joined {
                Ok(report) => report,
                Err(join_err) => {
                    error!(table = %table_id, error = %join_err, "Validation task aborted");
                    TableReport::failed_before_start(&table_id, format!("validation task aborted: {join_err}"))
                }
            })
            .collect();

        // Keep configured order in the report.
        let mut finished = finished.into_iter();
        let tables: Vec<TableReport> = tables
            .into_iter()
            .filter_map(|(_, early)| early.or_else(|| finished.next()))
            .collect();

        let report = AggregateReport::new(started_at, self.ctx.clock.now_utc(), tables);
        info!(
            tables = report.tables.len(),
            success = report.success,
            verdict = ?report.verdict(),
            "Validation finished"
        );

        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.send(&report).await {
                warn!(error = %err, "Report notification failed");
            }
        }
        Ok(report)
    }

    fn validate(&self) -> Result<(), EngineError> {
        self.settings.validate()?;
        let mut ids = HashSet::new();
        for mapping in &self.mappings {
            mapping.validate()?;
            if !ids.insert(mapping.table_id().to_ascii_lowercase()) {
                return Err(EngineError::Config(format!(
                    "table {} is mapped more than once",
                    mapping.table_id()
                )));
            }
        }
        Ok(())
    }

    fn select(&self, selected: Option<&[String]>) -> Result<Vec<Arc<TableMapping>>, EngineError> {
        let Some(names) = selected.filter(|names| !names.is_empty()) else {
            return Ok(self.mappings.clone());
        };
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.mappings.iter().any(|m| m.matches_name(name)))
        {
            return Err(EngineError::UnknownTable(unknown.clone()));
        }
        Ok(self
            .mappings
            .iter()
            .filter(|m| names.iter().any(|name| m.matches_name(name)))
            .cloned()
            .collect())
    }

    async fn resumable_work(
        &self,
        mappings: Vec<Arc<TableMapping>>,
    ) -> Result<Vec<(Arc<TableMapping>, Option<ValidationRun>)>, EngineError> {
        let mut resumable = self.ctx.progress.list_resumable().await?;
        let work: Vec<_> = mappings
            .into_iter()
            .filter_map(|mapping| {
                let table_id = mapping.table_id();
                let index = resumable.iter().position(|run| run.table_id == table_id)?;
                Some((mapping, Some(resumable.swap_remove(index))))
            })
            .collect();
        info!(tables = work.len(), "Resuming unfinished runs");
        Ok(work)
    }

    async fn prepare(
        &self,
        mapping: Arc<TableMapping>,
        checkpoint: Option<ValidationRun>,
    ) -> Result<TableStateMachine, EngineError> {
        let cap = self.settings.max_mismatch_details;
        match checkpoint {
            Some(run) => TableStateMachine::resume(mapping, run, self.ctx.clone(), cap),
            None => TableStateMachine::start_fresh(mapping, self.ctx.clone(), cap).await,
        }
    }
}

/// Everything one spawned table task owns.
struct TableTask {
    machine: TableStateMachine,
    gate: RunWindowGate,
    semaphore: Arc<Semaphore>,
    registry: RunRegistry,
    retry: RetryPolicy,
    cancel: CancellationToken,
    ctx: EngineContext,
}

impl TableTask {
    async fn drive(mut self) -> TableReport {
        let table_id = self.machine.table_id().to_string();
        let mut failures = 0u32;
        let mut failure_note = None;

        loop {
            self.registry.set(&table_id, SlotState::Queued).await;
            let permit = tokio::select! {
                () = self.cancel.cancelled() => None,
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                self.suspend_quietly().await;
                break;
            };

            self.registry.set(&table_id, SlotState::Active).await;
            let chunks_before = self.machine.run().chunks_completed;
            let result = self.machine.advance(&self.gate, &self.cancel).await;
            drop(permit);

            if self.machine.run().chunks_completed > chunks_before {
                failures = 0;
            }

            match result {
                Ok(AdvanceOutcome::Completed | AdvanceOutcome::Cancelled) => break,
                Ok(AdvanceOutcome::Paused { wait }) => {
                    self.registry
                        .set(&table_id, SlotState::Paused { resume_at: self.wake_time(wait) })
                        .await;
                    if !self.sleep_or_cancel(wait).await {
                        break;
                    }
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if !self.retry.should_retry(failures) {
                        failure_note = self.fail(&err).await;
                        break;
                    }
                    let delay = self.retry.delay_for(failures);
                    warn!(
                        table = %table_id,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying chunk"
                    );
                    self.registry
                        .set(&table_id, SlotState::Retrying { attempt: failures, resume_at: self.wake_time(delay) })
                        .await;
                    if !self.sleep_or_cancel(delay).await {
                        self.suspend_quietly().await;
                        break;
                    }
                }
                Err(err) => {
                    failure_note = self.fail(&err).await;
                    break;
                }
            }
        }

        let mut report = self.machine.report();
        if let Some(note) = failure_note {
            report.status = RunStatus::Failed;
            report.error = Some(note);
        }
        self.registry.set(&table_id, SlotState::Finished(report.status)).await;
        report
    }

    /// Persists FAILED; if even that fails, returns the cause to report.
    async fn fail(&mut self, err: &EngineError) -> Option<String> {
        match self.machine.fail(err).await {
            Ok(()) => None,
            Err(store_err) => {
                error!(
                    table = %self.machine.table_id(),
                    error = %err,
                    store_error = %store_err,
                    "Could not record failed run"
                );
                Some(format!("{err} (failure not recorded: {store_err})"))
            }
        }
    }

    async fn suspend_quietly(&mut self) {
        if let Err(err) = self.machine.suspend().await {
            warn!(table = %self.machine.table_id(), error = %err, "Could not record suspended run");
        }
    }

    /// `false` when cancelled before `wait` elapsed.
    async fn sleep_or_cancel(&self, wait: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(wait) => true,
        }
    }

    fn wake_time(&self, wait: Duration) -> chrono::DateTime<chrono::Utc> {
        self.ctx.clock.now_utc() + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
