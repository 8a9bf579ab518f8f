//! Bounded worker pool draining the sweep matrix
//!
//! A fixed number of worker threads claim items from a shared queue, run the
//! toolchain, classify the outcome, and record it. On cancellation workers
//! stop claiming and whatever is left in the queue comes back unresolved. A
//! fatal runner error stops the pool and is returned instead of an outcome.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use crate::aggregate::Aggregator;
use crate::classifier::classify_outcome;
use crate::matrix::WorkItem;
use crate::runner::{JobRunner, RunnerError};
use crate::signal::CancelState;

/// Worker count when none is configured.
pub const DEFAULT_WORKERS: usize = 2;

/// What was left when the pool wound down.
#[derive(Debug)]
pub struct PoolOutcome {
    /// Items that ran to classification.
    pub resolved: usize,
    /// Items never claimed, in queue order.
    pub unresolved: Vec<WorkItem>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drain `items` through `workers` threads.
///
/// Every resolved item is recorded into the aggregator and echoed as one
/// console line. Returns `Err` only for fatal environment errors; test
/// failures and timeouts are ordinary results.
pub fn run_pool(
    items: Vec<WorkItem>,
    workers: usize,
    runner: &JobRunner,
    aggregator: &Aggregator,
    cancel: &CancelState,
) -> Result<PoolOutcome, RunnerError> {
    let queue = Mutex::new(VecDeque::from(items));
    let fatal: Mutex<Option<RunnerError>> = Mutex::new(None);
    let resolved = AtomicUsize::new(0);
    let workers = workers.max(1);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if cancel.is_requested() || lock(&fatal).is_some() {
                    break;
                }
                let item = match lock(&queue).pop_front() {
                    Some(item) => item,
                    None => break,
                };

                let outcome = match runner.run(&item, cancel) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let mut slot = lock(&fatal);
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        break;
                    }
                };
                let result = match classify_outcome(&outcome) {
                    Ok(result) => result,
                    Err(e) => {
                        let mut slot = lock(&fatal);
                        if slot.is_none() {
                            *slot = Some(RunnerError::Io(e));
                        }
                        break;
                    }
                };

                println!(
                    "[{}] {} ({:.1}s)",
                    result.item,
                    result.status.label(),
                    result.duration_ms as f64 / 1000.0
                );
                aggregator.record(result);
                resolved.fetch_add(1, Ordering::Relaxed);
            });
        }
    });

    if let Some(error) = lock(&fatal).take() {
        return Err(error);
    }

    let unresolved: Vec<WorkItem> = lock(&queue).drain(..).collect();
    Ok(PoolOutcome {
        resolved: resolved.load(Ordering::Relaxed),
        unresolved,
    })
}
