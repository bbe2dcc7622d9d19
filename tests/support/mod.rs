//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use table_validator::domain::chunk::ChunkRange;
use table_validator::domain::gateway::{ComparatorError, ComparatorGateway};
use table_validator::domain::mapping::TableMapping;
use table_validator::domain::outcome::{ComparisonOutcome, MismatchDetail, MismatchKind};
use table_validator::domain::report::{AggregateReport, Notifier};
use table_validator::domain::value_objects::KeyTuple;
use table_validator::engine::gate::WallClock;
use table_validator::engine::retry::RetryPolicy;
use table_validator::engine::state_machine::EngineContext;
use table_validator::engine::EngineSettings;
use table_validator::infrastructure::memory_store::InMemoryValidationStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Row {
    pub fn named(name: impl Into<String>) -> Self {
        let mut values = BTreeMap::new();
        values.insert("NAME".to_string(), name.into());
        Self { values, updated_at: None }
    }

    #[must_use]
    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }
}

/// Both sides of one table, keyed by natural key.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub source: BTreeMap<KeyTuple, Row>,
    pub target: BTreeMap<KeyTuple, Row>,
}

impl Dataset {
    /// Identical rows for every key present on a side.
    pub fn from_keys(source: impl IntoIterator<Item = i64>, target: impl IntoIterator<Item = i64>) -> Self {
        let side = |keys: &mut dyn Iterator<Item = i64>| {
            keys.map(|k| (KeyTuple::single(k), Row::named(format!("row-{k}"))))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            source: side(&mut source.into_iter()),
            target: side(&mut target.into_iter()),
        }
    }

    pub fn set_target(&mut self, key: i64, row: Row) {
        self.target.insert(KeyTuple::single(key), row);
    }

    pub fn union_keys(&self) -> Vec<KeyTuple> {
        self.source
            .keys()
            .chain(self.target.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompareCall {
    pub table_id: String,
    pub lower: Option<KeyTuple>,
    pub at_local: NaiveDateTime,
    pub visited: Vec<KeyTuple>,
}

/// Comparator over in-memory datasets with scripted delays and failures.
pub struct MemoryComparator {
    tables: Mutex<HashMap<String, Dataset>>,
    chunk_time: Duration,
    clock: Option<Arc<dyn WallClock>>,
    failures: Mutex<HashMap<String, VecDeque<ComparatorError>>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    calls: Mutex<Vec<CompareCall>>,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemoryComparator {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            chunk_time: Duration::ZERO,
            clock: None,
            failures: Mutex::new(HashMap::new()),
            cancel_after: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MemoryComparator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(self, table_id: &str, data: Dataset) -> Self {
        self.tables.lock().unwrap().insert(table_id.to_string(), data);
        self
    }

    /// Every chunk takes `chunk_time` of (tokio) time.
    #[must_use]
    pub fn with_chunk_time(mut self, chunk_time: Duration) -> Self {
        self.chunk_time = chunk_time;
        self
    }

    /// Clock used to stamp recorded calls.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// The next calls for `table_id` fail with these errors, in order.
    pub fn fail_next(&self, table_id: &str, errors: Vec<ComparatorError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(table_id.to_string())
            .or_default()
            .extend(errors);
    }

    /// Cancel `token` once `chunks` comparisons have succeeded.
    pub fn cancel_after(&self, chunks: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((chunks, token));
    }

    pub fn update_table(&self, table_id: &str, update: impl FnOnce(&mut Dataset)) {
        let mut tables = self.tables.lock().unwrap();
        update(tables.entry(table_id.to_string()).or_default());
    }

    pub fn calls(&self) -> Vec<CompareCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, table_id: &str) -> Vec<CompareCall> {
        self.calls().into_iter().filter(|c| c.table_id == table_id).collect()
    }

    /// Keys visited for `table_id`, in visiting order, across all calls.
    pub fn visited(&self, table_id: &str) -> Vec<KeyTuple> {
        self.calls_for(table_id).into_iter().flat_map(|c| c.visited).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn chunk(
        data: &Dataset,
        mapping: &TableMapping,
        range: &ChunkRange,
        threshold: Option<DateTime<Utc>>,
    ) -> (ComparisonOutcome, Vec<KeyTuple>) {
        let newer = |row: Option<&Row>| match (threshold, row) {
            (None, _) => true,
            (Some(ts), Some(row)) => row.updated_at.is_some_and(|at| at > ts),
            (Some(_), None) => false,
        };

        let mut outcome = ComparisonOutcome::empty();
        let mut visited = Vec::new();
        let keys = data
            .union_keys()
            .into_iter()
            .filter(|key| range.lower.as_ref().is_none_or(|lower| key > lower))
            .filter(|key| newer(data.source.get(key)) || newer(data.target.get(key)))
            .take(range.limit as usize);

        for key in keys {
            let finding = match (data.source.get(&key), data.target.get(&key)) {
                (Some(source), Some(target)) => {
                    let columns: Vec<String> = source
                        .values
                        .keys()
                        .chain(target.values.keys())
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .filter(|c| !mapping.is_excluded(c))
                        .filter(|c| source.values.get(*c) != target.values.get(*c))
                        .cloned()
                        .collect();
                    (!columns.is_empty()).then(|| MismatchDetail::value_mismatch(key.clone(), columns))
                }
                (Some(_), None) => Some(MismatchDetail::new(key.clone(), MismatchKind::MissingOnTarget)),
                (None, Some(_)) => Some(MismatchDetail::new(key.clone(), MismatchKind::MissingOnSource)),
                (None, None) => unreachable!("key came from one of the sides"),
            };
            visited.push(key.clone());
            outcome.record(key, finding);
        }
        (outcome, visited)
    }
}

#[async_trait]
impl ComparatorGateway for MemoryComparator {
    async fn compare(
        &self,
        mapping: &TableMapping,
        range: &ChunkRange,
        incremental_threshold: Option<DateTime<Utc>>,
    ) -> Result<ComparisonOutcome, ComparatorError> {
        let table_id = mapping.table_id();
        let at_local = self
            .clock
            .as_ref()
            .map_or_else(|| Utc::now().naive_utc(), |clock| clock.now_local());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.chunk_time.is_zero() {
            tokio::time::sleep(self.chunk_time).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&table_id)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }

        let (outcome, visited) = {
            let tables = self.tables.lock().unwrap();
            let Some(data) = tables.get(&table_id) else {
                return Err(ComparatorError::fatal(format!("table {table_id} not found")));
            };
            Self::chunk(data, mapping, range, incremental_threshold)
        };

        self.calls.lock().unwrap().push(CompareCall {
            table_id,
            lower: range.lower.clone(),
            at_local,
            visited,
        });

        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if done >= *after {
                token.cancel();
            }
        }
        Ok(outcome)
    }
}

/// Wall clock that starts at a fixed local instant and advances with tokio
/// time, so paused-time tests see window boundaries exactly.
pub struct TokioWallClock {
    base_local: NaiveDateTime,
    base_utc: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioWallClock {
    pub fn starting_at(base_local: NaiveDateTime) -> Self {
        Self {
            base_local,
            base_utc: base_local.and_utc(),
            started: tokio::time::Instant::now(),
        }
    }

    /// Starts at the current real time.
    pub fn real() -> Self {
        let now = Utc::now();
        Self {
            base_local: now.naive_utc(),
            base_utc: now,
            started: tokio::time::Instant::now(),
        }
    }

    fn elapsed(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl WallClock for TokioWallClock {
    fn now_local(&self) -> NaiveDateTime {
        self.base_local + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.base_utc + self.elapsed()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    reports: Mutex<Vec<AggregateReport>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<AggregateReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, report: &AggregateReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, s)
        .unwrap()
}

pub fn mapping(table: &str, chunk_size: u32) -> TableMapping {
    TableMapping::new(table, table, vec!["ID".to_string()], chunk_size)
}

pub fn context(
    comparator: Arc<MemoryComparator>,
    store: &InMemoryValidationStore,
    clock: Arc<dyn WallClock>,
) -> EngineContext {
    EngineContext {
        comparator,
        progress: Arc::new(store.clone()),
        results: Arc::new(store.clone()),
        clock,
    }
}

pub fn settings(max_concurrent_validations: usize) -> EngineSettings {
    EngineSettings {
        max_concurrent_validations,
        retry: RetryPolicy {
            jitter_range_ms: 0,
            ..RetryPolicy::default()
        },
        ..EngineSettings::default()
    }
}
