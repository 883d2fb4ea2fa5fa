// pool.rs — Bounded worker pool for independent tasks.
//
// Workers pull task indices from a shared counter and push results into a
// single mutex-guarded vector. Results are sorted by task index after all
// workers join, so completion order never shows in the output.
//
// A `Cancellation` bounds the work: tasks not started before the deadline
// (or beyond the task budget) are skipped and the outcome is marked partial.
// A task that has started always runs to completion, so results already
// pushed are never torn.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Limits on how much of a batch may run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cancellation {
    pub deadline: Option<Instant>,
    /// Maximum number of tasks to start.
    pub budget: Option<usize>,
}

impl Cancellation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn within(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Results of a batch, in task order.
#[derive(Debug, Clone)]
pub struct PoolOutcome<T> {
    pub results: Vec<(usize, T)>,
    pub submitted: usize,
}

impl<T> PoolOutcome<T> {
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    /// Some submitted tasks never ran.
    pub fn is_partial(&self) -> bool {
        self.results.len() < self.submitted
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task(i)` for `i in 0..ntasks`.
    pub fn run<T, F>(&self, ntasks: usize, cancel: &Cancellation, task: F) -> PoolOutcome<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        let limit = cancel.budget.map_or(ntasks, |b| b.min(ntasks));
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<(usize, T)>> = Mutex::new(Vec::with_capacity(limit));

        thread::scope(|scope| {
            for _ in 0..self.workers.min(limit.max(1)) {
                scope.spawn(|| loop {
                    if cancel.expired() {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    if i >= limit {
                        break;
                    }
                    let value = task(i);
                    results
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push((i, value));
                });
            }
        });

        let mut results = results
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        results.sort_by_key(|(i, _)| *i);
        if results.len() < ntasks {
            tracing::warn!(
                completed = results.len(),
                submitted = ntasks,
                "worker pool stopped early, results are partial"
            );
        }
        PoolOutcome {
            results,
            submitted: ntasks,
        }
    }
}
