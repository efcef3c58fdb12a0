//! Parallel batch scheduler with checkpoint/resume
//!
//! Units are split into contiguous batches, one per worker thread. Workers
//! report over two channels (results and string-tagged progress events); a
//! single coordinator task owns all counters and is the only checkpoint
//! writer.

use crate::config::SchedulerConfig;
use crate::error::{SimResult, SimulationError};
use crate::progress::ScanProgress;
use crate::types::ResumeMode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod checkpoint;
pub mod worker;

pub use checkpoint::{
    CheckpointKey, CheckpointState, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    StoredCheckpoint,
};

/// Something the scheduler can process and track by id
pub trait WorkUnit: Send + Sync + 'static {
    fn unit_id(&self) -> String;
}

impl<T: WorkUnit> WorkUnit for Arc<T> {
    fn unit_id(&self) -> String {
        self.as_ref().unit_id()
    }
}

/// Result of processing one unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome<R> {
    Success(R),
    /// Processed, nothing produced (reported as `FAIL`)
    NoResult,
    /// Not eligible for processing (reported as `SKIP`)
    Skipped,
}

/// Per-unit work function run on worker threads
pub trait UnitProcessor<U>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn process(&self, unit: &U) -> SimResult<UnitOutcome<Self::Output>>;
}

/// Progress message sent from workers to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Success(String),
    Fail(String),
    Skip(String),
    Error(String, String),
    BatchError(String),
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Success(id) => write!(f, "SUCCESS:{}", id),
            ProgressEvent::Fail(id) => write!(f, "FAIL:{}", id),
            ProgressEvent::Skip(id) => write!(f, "SKIP:{}", id),
            ProgressEvent::Error(id, cause) => write!(f, "ERROR:{}:{}", id, cause),
            ProgressEvent::BatchError(cause) => write!(f, "BATCH_ERROR:{}", cause),
        }
    }
}

impl FromStr for ProgressEvent {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, rest) = s
            .split_once(':')
            .ok_or_else(|| SimulationError::Internal(format!("malformed progress event: {}", s)))?;
        match tag {
            "SUCCESS" => Ok(ProgressEvent::Success(rest.to_string())),
            "FAIL" => Ok(ProgressEvent::Fail(rest.to_string())),
            "SKIP" => Ok(ProgressEvent::Skip(rest.to_string())),
            "ERROR" => {
                let (id, cause) = rest.split_once(':').unwrap_or((rest, ""));
                Ok(ProgressEvent::Error(id.to_string(), cause.to_string()))
            }
            "BATCH_ERROR" => Ok(ProgressEvent::BatchError(rest.to_string())),
            _ => Err(SimulationError::Internal(format!("unknown progress tag: {}", tag))),
        }
    }
}

/// Runtime knobs for one scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// 0 means one worker per available core
    pub workers: usize,
    pub checkpoint_interval: Duration,
    pub show_progress: bool,
    pub resume: ResumeMode,
    pub label: String,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            checkpoint_interval: Duration::from_secs(60),
            show_progress: false,
            resume: ResumeMode::Resume,
            label: "units".to_string(),
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &SchedulerConfig, resume: ResumeMode) -> Self {
        Self {
            workers: config.workers,
            checkpoint_interval: Duration::from_secs(config.checkpoint_interval_secs),
            show_progress: config.show_progress,
            resume,
            label: "units".to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            worker::available_workers()
        } else {
            self.workers
        }
    }
}

/// Outcome of one scheduler run, results ordered by unit id
#[derive(Debug, Clone)]
pub struct SchedulerReport<R> {
    pub run_id: Uuid,
    pub results: Vec<R>,
    pub total_units: usize,
    /// Units processed by this invocation (excludes resumed ones)
    pub processed_this_run: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub batch_errors: usize,
    /// Units never reported complete (abandoned by a failed batch)
    pub unfinished: usize,
    pub resumed: bool,
}

impl<R> SchedulerReport<R> {
    fn from_state(state: CheckpointState<R>, processed_this_run: usize, batch_errors: usize, resumed: bool) -> Self {
        let unfinished = state.total_units.saturating_sub(state.processed());
        SchedulerReport {
            run_id: state.run_id,
            total_units: state.total_units,
            processed_this_run,
            succeeded: state.succeeded,
            failed: state.failed,
            skipped: state.skipped,
            batch_errors,
            unfinished,
            resumed,
            results: state.results.into_values().collect(),
        }
    }
}

/// Coordinator for batched, checkpointed processing
pub struct BatchScheduler {
    options: SchedulerOptions,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl BatchScheduler {
    pub fn new(options: SchedulerOptions, store: Option<Arc<dyn CheckpointStore>>) -> Self {
        Self { options, store }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run without an external interrupt
    pub async fn run_to_completion<U, P>(
        &self,
        key: CheckpointKey,
        units: Vec<U>,
        processor: Arc<P>,
    ) -> SimResult<SchedulerReport<P::Output>>
    where
        U: WorkUnit,
        P: UnitProcessor<U>,
        P::Output: Serialize + DeserializeOwned + Clone,
    {
        self.run(key, units, processor, std::future::pending::<()>()).await
    }

    /// Process every unit not already completed under `key`
    ///
    /// When `shutdown` resolves first, a checkpoint is written, workers are
    /// told to stop, and `SimulationError::Interrupted` is returned.
    pub async fn run<U, P, F>(
        &self,
        key: CheckpointKey,
        units: Vec<U>,
        processor: Arc<P>,
        shutdown: F,
    ) -> SimResult<SchedulerReport<P::Output>>
    where
        U: WorkUnit,
        P: UnitProcessor<U>,
        P::Output: Serialize + DeserializeOwned + Clone,
        F: Future<Output = ()>,
    {
        let total = units.len();
        let (mut state, resumed) = match self.restore::<P::Output>(&key, total)? {
            Restored::Finished(state) => {
                info!(
                    "✅ {} already complete ({} results), nothing to process",
                    self.options.label,
                    state.results.len()
                );
                return Ok(SchedulerReport::from_state(state, 0, 0, true));
            }
            Restored::Partial(state) => (state, true),
            Restored::Fresh(state) => (state, false),
        };

        let remaining: Vec<U> = units
            .into_iter()
            .filter(|u| !state.is_done(&u.unit_id()))
            .collect();
        let already_done = state.processed();

        if resumed {
            info!(
                "🔄 Resuming {}: {}/{} done, {} remaining",
                self.options.label,
                already_done,
                total,
                remaining.len()
            );
        }

        if remaining.is_empty() {
            self.finalize(&mut state)?;
            return Ok(SchedulerReport::from_state(state, 0, 0, resumed));
        }

        let batches = worker::partition(remaining, self.options.worker_count());
        info!(
            "🚀 Processing {} {} across {} workers",
            total - already_done,
            self.options.label,
            batches.len()
        );

        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<(String, P::Output)>();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let cancel = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(batches.len());
        for (worker_id, batch) in batches.into_iter().enumerate() {
            let processor = Arc::clone(&processor);
            let results_tx = results_tx.clone();
            let progress_tx = progress_tx.clone();
            let cancel = Arc::clone(&cancel);
            handles.push(tokio::task::spawn_blocking(move || {
                worker::run_batch(worker_id, batch, processor, results_tx, progress_tx, cancel)
            }));
        }
        drop(results_tx);
        drop(progress_tx);

        let bar = ScanProgress::new(&self.options.label, total, self.options.show_progress);
        bar.update(state.processed(), state.succeeded, state.failed, state.skipped);

        let period = self.options.checkpoint_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        tokio::pin!(shutdown);

        // successes whose result or event has not arrived yet
        let mut awaiting_result: HashSet<String> = HashSet::new();
        let mut pending_results = HashMap::new();
        let mut batch_errors = 0;
        let mut results_open = true;
        let mut progress_open = true;

        while results_open || progress_open {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    cancel.store(true, Ordering::Relaxed);
                    self.save(&state)?;
                    bar.abandon(&format!("Interrupted at {}/{}", state.processed(), total));
                    warn!("⚠️  Interrupted; checkpoint saved with {}/{} units complete", state.processed(), total);
                    return Err(SimulationError::Interrupted {
                        completed: state.processed(),
                        total,
                    });
                }
                message = results_rx.recv(), if results_open => match message {
                    Some((id, result)) => {
                        if awaiting_result.remove(&id) {
                            state.results.insert(id.clone(), result);
                            state.completed_units.insert(id);
                            state.succeeded += 1;
                        } else {
                            pending_results.insert(id, result);
                        }
                    }
                    None => results_open = false,
                },
                event = progress_rx.recv(), if progress_open => match event {
                    Some(event) => {
                        debug!("{}", event);
                        match event {
                            ProgressEvent::Success(id) => match pending_results.remove(&id) {
                                Some(result) => {
                                    state.results.insert(id.clone(), result);
                                    state.completed_units.insert(id);
                                    state.succeeded += 1;
                                }
                                None => {
                                    awaiting_result.insert(id);
                                }
                            },
                            ProgressEvent::Fail(id) => {
                                state.completed_units.insert(id);
                                state.failed += 1;
                            }
                            ProgressEvent::Skip(id) => {
                                state.completed_units.insert(id);
                                state.skipped += 1;
                            }
                            ProgressEvent::Error(id, cause) => {
                                warn!("❌ {} failed: {}", id, cause);
                                state.completed_units.insert(id);
                                state.failed += 1;
                            }
                            ProgressEvent::BatchError(cause) => {
                                warn!("❌ {}", SimulationError::BatchFailed(cause));
                                batch_errors += 1;
                            }
                        }
                        bar.update(state.processed(), state.succeeded, state.failed, state.skipped);
                    }
                    None => progress_open = false,
                },
                _ = ticker.tick() => {
                    self.save(&state)?;
                    info!("💾 Checkpoint: {}/{} {} done", state.processed(), total, self.options.label);
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("❌ Worker task ended abnormally: {}", SimulationError::from(e));
                batch_errors += 1;
            }
        }

        if !awaiting_result.is_empty() || !pending_results.is_empty() {
            warn!(
                "⚠️  {} successes without matching results",
                awaiting_result.len() + pending_results.len()
            );
        }

        let processed_this_run = state.processed() - already_done;
        bar.finish(state.succeeded, state.failed, state.skipped);

        // abandoned units stay in an incomplete checkpoint for the next resume
        if state.processed() < total {
            self.save(&state)?;
            warn!(
                "⚠️  {} finished with {}/{} units done; {} left for a resumed run",
                self.options.label,
                state.processed(),
                total,
                total - state.processed()
            );
        } else {
            info!(
                "✅ {} complete: {} succeeded, {} failed, {} skipped",
                self.options.label, state.succeeded, state.failed, state.skipped
            );
            self.finalize(&mut state)?;
        }
        Ok(SchedulerReport::from_state(state, processed_this_run, batch_errors, resumed))
    }

    fn restore<R: DeserializeOwned>(&self, key: &CheckpointKey, total: usize) -> SimResult<Restored<R>> {
        let Some(store) = &self.store else {
            return Ok(Restored::Fresh(CheckpointState::new(key.clone(), total)));
        };
        if self.options.resume == ResumeMode::ForceNew {
            return Ok(Restored::Fresh(CheckpointState::new(key.clone(), total)));
        }

        if let Some(stored) = store.latest_incomplete(key)? {
            let mut state: CheckpointState<R> = stored.decode()?;
            // results are only trusted for units marked complete
            let completed = state.completed_units.clone();
            state.results.retain(|id, _| completed.contains(id));
            state.total_units = total;
            return Ok(Restored::Partial(state));
        }
        if let Some(stored) = store.latest_completed(key)? {
            return Ok(Restored::Finished(stored.decode()?));
        }
        Ok(Restored::Fresh(CheckpointState::new(key.clone(), total)))
    }

    fn save<R: Serialize>(&self, state: &CheckpointState<R>) -> SimResult<()> {
        if let Some(store) = &self.store {
            let mut stored = state.to_stored()?;
            stored.updated_at = chrono::Utc::now();
            store.save(&stored)?;
        }
        Ok(())
    }

    fn finalize<R: Serialize>(&self, state: &mut CheckpointState<R>) -> SimResult<()> {
        state.completed = true;
        if let Some(store) = &self.store {
            let mut stored = state.to_stored()?;
            store.finalize(&mut stored)?;
        }
        Ok(())
    }
}

enum Restored<R> {
    Fresh(CheckpointState<R>),
    Partial(CheckpointState<R>),
    Finished(CheckpointState<R>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunClass, Stage};

    struct Doubler;

    impl WorkUnit for u32 {
        fn unit_id(&self) -> String {
            format!("{:04}", self)
        }
    }

    impl UnitProcessor<u32> for Doubler {
        type Output = u32;

        fn process(&self, unit: &u32) -> SimResult<UnitOutcome<u32>> {
            match unit % 5 {
                0 => Ok(UnitOutcome::Skipped),
                1 => Ok(UnitOutcome::NoResult),
                2 => Err(SimulationError::UnitFailed(unit.to_string(), "odd input".to_string())),
                _ => Ok(UnitOutcome::Success(unit * 2)),
            }
        }
    }

    /// Panics the first time it sees unit 3, then doubles like normal
    #[derive(Default)]
    struct PanicsOnce {
        tripped: AtomicBool,
    }

    impl UnitProcessor<u32> for PanicsOnce {
        type Output = u32;

        fn process(&self, unit: &u32) -> SimResult<UnitOutcome<u32>> {
            if *unit == 3 && !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("corrupt unit {}", unit);
            }
            Ok(UnitOutcome::Success(unit * 2))
        }
    }

    fn key() -> CheckpointKey {
        CheckpointKey::new(RunClass::Normal, Stage::EntryScan, "test")
    }

    fn single_worker() -> SchedulerOptions {
        SchedulerOptions {
            workers: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_progress_event_wire_format() {
        let events = [
            ProgressEvent::Success("pool1".to_string()),
            ProgressEvent::Fail("pool2".to_string()),
            ProgressEvent::Skip("pool3".to_string()),
            ProgressEvent::Error("pool4".to_string(), "bad: value".to_string()),
            ProgressEvent::BatchError("worker 0: boom".to_string()),
        ];
        for event in events {
            let wire = event.to_string();
            assert_eq!(wire.parse::<ProgressEvent>().unwrap(), event);
        }
        assert_eq!(ProgressEvent::Error("p".into(), "x".into()).to_string(), "ERROR:p:x");
        assert!("NOPE:1".parse::<ProgressEvent>().is_err());
    }

    #[tokio::test]
    async fn test_run_counts_every_outcome() {
        let options = SchedulerOptions {
            workers: 3,
            ..Default::default()
        };
        let scheduler = BatchScheduler::new(options, None);
        let report = scheduler
            .run_to_completion(key(), (0..20u32).collect(), Arc::new(Doubler))
            .await
            .unwrap();

        assert_eq!(report.total_units, 20);
        assert_eq!(report.processed_this_run, 20);
        assert_eq!(report.skipped, 4);
        assert_eq!(report.failed, 8);
        assert_eq!(report.succeeded, 8);
        assert_eq!(report.unfinished, 0);
        // ordered by unit id
        assert_eq!(report.results, vec![6, 8, 16, 18, 26, 28, 36, 38]);
    }

    #[tokio::test]
    async fn test_interrupt_saves_checkpoint() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let scheduler = BatchScheduler::new(SchedulerOptions::default(), Some(Arc::clone(&store)));

        let result = scheduler
            .run(key(), (0..10u32).collect(), Arc::new(Doubler), async {})
            .await;

        assert!(matches!(result, Err(SimulationError::Interrupted { total: 10, .. })));
        let saved = store.latest_incomplete(&key()).unwrap().unwrap();
        assert!(!saved.completed);
    }

    #[tokio::test]
    async fn test_force_new_ignores_checkpoint() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let first = BatchScheduler::new(SchedulerOptions::default(), Some(Arc::clone(&store)));
        first
            .run_to_completion(key(), (0..10u32).collect(), Arc::new(Doubler))
            .await
            .unwrap();

        let options = SchedulerOptions {
            resume: ResumeMode::ForceNew,
            ..Default::default()
        };
        let second = BatchScheduler::new(options, Some(store));
        let report = second
            .run_to_completion(key(), (0..10u32).collect(), Arc::new(Doubler))
            .await
            .unwrap();
        assert_eq!(report.processed_this_run, 10);
        assert!(!report.resumed);
    }

    #[tokio::test]
    async fn test_batch_error_leaves_units_for_resume() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let processor = Arc::new(PanicsOnce::default());

        let first = BatchScheduler::new(single_worker(), Some(Arc::clone(&store)))
            .run_to_completion(key(), (0..10u32).collect(), Arc::clone(&processor))
            .await
            .unwrap();
        assert_eq!(first.batch_errors, 1);
        assert_eq!(first.succeeded, 3);
        assert_eq!(first.unfinished, 7);
        assert_eq!(first.results, vec![0, 2, 4]);

        let saved = store.latest_incomplete(&key()).unwrap().unwrap();
        assert_eq!(saved.completed_units.len(), 3);
        assert!(store.latest_completed(&key()).unwrap().is_none());

        let second = BatchScheduler::new(single_worker(), Some(Arc::clone(&store)))
            .run_to_completion(key(), (0..10u32).collect(), processor)
            .await
            .unwrap();
        assert!(second.resumed);
        assert_eq!(second.processed_this_run, 7);
        assert_eq!(second.batch_errors, 0);
        assert_eq!(second.succeeded, 10);
        assert_eq!(second.unfinished, 0);
        assert_eq!(second.results, (0..10u32).map(|u| u * 2).collect::<Vec<_>>());
        assert!(store.latest_incomplete(&key()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_skips_completed_units_and_keeps_their_results() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());

        let mut partial: CheckpointState<u32> = CheckpointState::new(key(), 10);
        for unit in 0..5u32 {
            partial.completed_units.insert(unit.unit_id());
            partial.results.insert(unit.unit_id(), 100 + unit);
        }
        partial.succeeded = 5;
        // a result without a completion mark is not trusted
        partial.results.insert(7u32.unit_id(), 999);
        store.save(&partial.to_stored().unwrap()).unwrap();

        let tripped = PanicsOnce {
            tripped: AtomicBool::new(true),
        };
        let report = BatchScheduler::new(SchedulerOptions::default(), Some(Arc::clone(&store)))
            .run_to_completion(key(), (0..10u32).collect(), Arc::new(tripped))
            .await
            .unwrap();

        assert!(report.resumed);
        assert_eq!(report.run_id, partial.run_id);
        assert_eq!(report.processed_this_run, 5);
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.unfinished, 0);
        assert_eq!(report.results, vec![100, 101, 102, 103, 104, 10, 12, 14, 16, 18]);

        let finished = store.latest_completed(&key()).unwrap().unwrap();
        assert_eq!(finished.run_id, partial.run_id);
        assert!(store.latest_incomplete(&key()).unwrap().is_none());
    }
}
