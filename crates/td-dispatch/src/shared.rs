//! Shared-memory dispatch over a bounded, call-scoped thread pool.

use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use td_types::{internal_error, EvaluationBatch, Point, Problem, TdResult, Value};
use tracing::debug;

use crate::objective::Objective;
use crate::sequential;

/// Evaluates configurations concurrently on a thread pool built for the
/// call and torn down before it returns.
#[derive(Debug, Clone)]
pub struct SharedMemoryDispatcher {
    threads: usize,
    live_threads: Arc<AtomicUsize>,
}

impl SharedMemoryDispatcher {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            live_threads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Pool threads started by this dispatcher that have not exited yet.
    pub fn live_threads(&self) -> usize {
        self.live_threads.load(Ordering::SeqCst)
    }

    /// Evaluate `ids` concurrently. Results come back in the order of `ids`
    /// whatever the completion order; the first failure in that order is
    /// returned once every submitted evaluation has finished.
    pub fn evaluate_subset(
        &self,
        problem: &Problem,
        task_fields: &Point,
        batch: &EvaluationBatch,
        ids: &[usize],
        objective: &dyn Objective,
    ) -> TdResult<Vec<Vec<Value>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let size = self.threads.min(ids.len());
        let started = Arc::clone(&self.live_threads);
        let exited = Arc::clone(&self.live_threads);
        debug!(threads = size, configurations = ids.len(), "evaluating on thread pool");

        // build_scoped joins every pool thread before returning
        let outcomes: Vec<TdResult<Vec<Value>>> = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("td-eval-{i}"))
            .start_handler(move |_| {
                started.fetch_add(1, Ordering::SeqCst);
            })
            .exit_handler(move |_| {
                exited.fetch_sub(1, Ordering::SeqCst);
            })
            .build_scoped(
                |thread| thread.run(),
                |pool| {
                    pool.install(|| {
                        ids.par_iter()
                            .with_max_len(1)
                            .map(|&id| sequential::evaluate_one(problem, task_fields, batch, id, objective))
                            .collect::<Vec<_>>()
                    })
                },
            )
            .map_err(|e| internal_error!("failed to build evaluation pool: {e}"))?;

        outcomes.into_iter().collect()
    }
}
