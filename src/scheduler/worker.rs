// Batch partitioning and the per-worker processing loop

use super::{ProgressEvent, UnitOutcome, UnitProcessor, WorkUnit};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Number of workers to use when the configuration leaves it at 0
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Split units into at most `workers` contiguous batches of near-equal size
pub fn partition<U>(units: Vec<U>, workers: usize) -> Vec<Vec<U>> {
    if units.is_empty() {
        return Vec::new();
    }
    let workers = workers.max(1).min(units.len());
    let batch_size = units.len().div_ceil(workers);

    let mut batches = Vec::with_capacity(workers);
    let mut iter = units.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}

/// Process one batch sequentially, reporting over the two channels
///
/// Results are sent before the matching `SUCCESS` event. A panic abandons the
/// rest of the batch and is reported as `BATCH_ERROR`.
pub fn run_batch<U, P>(
    worker_id: usize,
    batch: Vec<U>,
    processor: Arc<P>,
    results: UnboundedSender<(String, P::Output)>,
    progress: UnboundedSender<ProgressEvent>,
    cancel: Arc<AtomicBool>,
) where
    U: WorkUnit,
    P: UnitProcessor<U>,
{
    debug!("Worker {} starting batch of {} units", worker_id, batch.len());

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        for unit in &batch {
            if cancel.load(Ordering::Relaxed) {
                debug!("Worker {} cancelled", worker_id);
                return;
            }

            let id = unit.unit_id();
            let event = match processor.process(unit) {
                Ok(UnitOutcome::Success(result)) => {
                    if results.send((id.clone(), result)).is_err() {
                        return;
                    }
                    ProgressEvent::Success(id)
                }
                Ok(UnitOutcome::NoResult) => ProgressEvent::Fail(id),
                Ok(UnitOutcome::Skipped) => ProgressEvent::Skip(id),
                Err(e) => ProgressEvent::Error(id, e.to_string()),
            };
            if progress.send(event).is_err() {
                return;
            }
        }
    }));

    if let Err(payload) = outcome {
        let cause = panic_message(payload.as_ref());
        warn!("❌ Worker {} batch aborted: {}", worker_id, cause);
        let _ = progress.send(ProgressEvent::BatchError(format!("worker {}: {}", worker_id, cause)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
