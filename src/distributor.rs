use crate::errors::{AppError, Result};
use crate::intervals::IntervalSet;
use crate::splitter::{Bisector, IntervalSplitter};
use crossbeam_channel::{unbounded, Receiver, Sender};
use rayon::ThreadPool;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const DEFAULT_SPLIT_THRESHOLD: u64 = 1_000_000;

const LARGE_INPUT_EXTENT: u64 = 100_000_000;
const GENOME_INPUT_EXTENT: u64 = 1_000_000_000;

/// A unit of work over one leaf interval set.
pub trait IntervalTask: Send + 'static {
    type Item: Send + 'static;

    fn run(self, progress: &TaskProgress) -> Result<Vec<Self::Item>>;
}

/// Per-task counter of bases handled, written by the task and read by the
/// progress reporter.
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    bases: Arc<AtomicU64>,
}

impl TaskProgress {
    pub fn add(&self, bases: u64) {
        self.bases.fetch_add(bases, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.bases.load(Ordering::Relaxed)
    }
}

/// Read-only view of every task counter, safe to poll from another thread.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    counters: Arc<Mutex<Vec<TaskProgress>>>,
}

impl ProgressHandle {
    pub fn bases_processed(&self) -> u64 {
        match self.counters.lock() {
            Ok(counters) => counters.iter().map(TaskProgress::get).sum(),
            Err(poisoned) => poisoned.into_inner().iter().map(TaskProgress::get).sum(),
        }
    }

    fn register(&self) -> TaskProgress {
        let progress = TaskProgress::default();
        match self.counters.lock() {
            Ok(mut counters) => counters.push(progress.clone()),
            Err(poisoned) => poisoned.into_inner().push(progress.clone()),
        }
        progress
    }
}

/// Splits submitted interval sets until each piece is at most the threshold,
/// then runs one task per piece on the worker pool.
pub struct WorkDistributor<T, F>
where
    T: IntervalTask,
    F: FnMut(IntervalSet) -> Result<Option<T>>,
{
    pool: Arc<ThreadPool>,
    factory: F,
    splitter: Box<dyn IntervalSplitter>,
    base_threshold: u64,
    threshold: u64,
    sender: Option<Sender<Result<Vec<T::Item>>>>,
    receiver: Receiver<Result<Vec<T::Item>>>,
    progress: ProgressHandle,
    submitted: usize,
    results: Vec<T::Item>,
}

impl<T, F> WorkDistributor<T, F>
where
    T: IntervalTask,
    F: FnMut(IntervalSet) -> Result<Option<T>>,
{
    pub fn new(pool: Arc<ThreadPool>, factory: F, threshold: u64) -> Self {
        let (sender, receiver) = unbounded();
        let base_threshold = threshold.max(2);
        Self {
            pool,
            factory,
            splitter: Box::new(Bisector),
            base_threshold,
            threshold: base_threshold,
            sender: Some(sender),
            receiver,
            progress: ProgressHandle::default(),
            submitted: 0,
            results: Vec::new(),
        }
    }

    pub fn with_splitter(mut self, splitter: Box<dyn IntervalSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    /// Effective leaf size for the most recent submission.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn task_count(&self) -> usize {
        self.submitted
    }

    pub fn progress_handle(&self) -> ProgressHandle {
        self.progress.clone()
    }

    pub fn bases_processed(&self) -> u64 {
        self.progress.bases_processed()
    }

    /// Splits `set` into leaves and spawns a task for each. Returns the
    /// number of tasks spawned for this submission.
    pub fn submit(&mut self, set: IntervalSet) -> Result<usize> {
        let Some(sender) = self.sender.clone() else {
            return Err(AppError::InvalidValue {
                flag: "submit".to_string(),
                value: set.to_string(),
                reason: "work distributor no longer accepts submissions".to_string(),
            });
        };

        self.threshold = scaled_threshold(self.base_threshold, set.extent());
        debug!(extent = set.extent(), threshold = self.threshold, "submitting interval set");

        let mut spawned = 0;
        let mut pending = vec![set];
        while let Some(set) = pending.pop() {
            if set.is_empty() {
                continue;
            }
            if set.extent() > self.threshold {
                let (first, second) = self.splitter.split(&set)?;
                pending.push(second);
                pending.push(first);
                continue;
            }

            let Some(task) = (self.factory)(set)? else {
                continue;
            };
            let progress = self.progress.register();
            let sender = sender.clone();
            self.pool.spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(&progress)))
                    .unwrap_or_else(|payload| {
                        Err(AppError::WorkerPanicked {
                            message: panic_message(payload.as_ref()),
                        })
                    });
                // Fails only once the distributor is dropped and nobody waits.
                let _ = sender.send(outcome);
            });
            spawned += 1;
        }

        self.submitted += spawned;
        Ok(spawned)
    }

    /// Closes submission and blocks until every task has reported. The first
    /// failing task aborts the wait with its error.
    pub fn wait_for_completion(&mut self) -> Result<()> {
        self.sender.take();
        let mut finished = 0_usize;
        for outcome in self.receiver.iter() {
            finished += 1;
            match outcome {
                Ok(items) => self.results.extend(items),
                Err(error) => {
                    info!(finished, submitted = self.submitted, "task failed, aborting run");
                    return Err(error);
                }
            }
        }
        debug!(finished, "all interval tasks reported");
        Ok(())
    }

    /// Items from every task, in completion order.
    pub fn into_results(self) -> Vec<T::Item> {
        self.results
    }
}

/// Large inputs get a coarser leaf size to bound the number of tasks.
pub fn scaled_threshold(base: u64, total_extent: u64) -> u64 {
    let mut threshold = base;
    if total_extent > LARGE_INPUT_EXTENT {
        threshold = threshold.saturating_mul(10);
    }
    if total_extent > GENOME_INPUT_EXTENT {
        threshold = threshold.saturating_mul(10);
    }
    threshold
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
