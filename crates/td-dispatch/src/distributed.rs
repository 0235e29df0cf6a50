//! Distributed dispatch over a spawned worker group.
//!
//! Worker `r` of a group of `size` owns the ids at positions
//! `r, r + size, r + 2 * size, ...`; the manager interleaves the partial
//! lists back into batch order.

use tracing::{info, warn};
use uuid::Uuid;

use td_types::{
    internal_error, DispatchError, EvaluationBatch, ExecutionOptions, Point, Problem, TdResult,
    Value,
};

use crate::protocol::{ReportOutcome, WorkerPayload, WorkerReport};
use crate::spawn::{default_worker_executable, SpawnRequest, Spawner};

/// The ids a worker of rank `rank` in a group of `size` evaluates, in the
/// order it evaluates them.
pub fn stride_ids(ids: &[usize], rank: usize, size: usize) -> Vec<usize> {
    ids.iter().copied().skip(rank).step_by(size.max(1)).collect()
}

/// Number of results worker `rank` owes for a batch of `total`.
fn stride_len(total: usize, rank: usize, size: usize) -> usize {
    if rank >= total {
        0
    } else {
        (total - rank).div_ceil(size)
    }
}

/// Interleave per-worker partial lists back into id order.
///
/// Partial `p` must hold exactly the results for ids `p, p + size, ...`
/// below `total`; a list of any other length is rejected rather than
/// padded or truncated.
pub fn reconstruct_order<T>(partials: Vec<Vec<T>>, total: usize) -> TdResult<Vec<T>> {
    let size = partials.len();
    if size == 0 {
        return if total == 0 {
            Ok(Vec::new())
        } else {
            Err(internal_error!("no partial results for a batch of {total}"))
        };
    }
    for (rank, partial) in partials.iter().enumerate() {
        let expected = stride_len(total, rank, size);
        if partial.len() != expected {
            return Err(DispatchError::Collective {
                rank,
                message: format!("expected {expected} results, got {}", partial.len()),
            }
            .into());
        }
    }

    let mut lists: Vec<_> = partials.into_iter().map(Vec::into_iter).collect();
    let mut ordered = Vec::with_capacity(total);
    for id in 0..total {
        let next = lists[id % size]
            .next()
            .ok_or_else(|| internal_error!("partial {} exhausted at id {id}", id % size))?;
        ordered.push(next);
    }
    Ok(ordered)
}

/// Unpack gathered reports into partial lists, failing the batch on the
/// first worker that did not complete.
fn partials_from_reports(reports: Vec<WorkerReport>, size: usize) -> TdResult<Vec<Vec<Vec<Value>>>> {
    if reports.len() != size {
        return Err(internal_error!("gathered {} reports from {size} workers", reports.len()));
    }
    reports
        .into_iter()
        .enumerate()
        .map(|(rank, report)| -> TdResult<Vec<Vec<Value>>> {
            if report.rank != rank {
                return Err(DispatchError::Collective {
                    rank,
                    message: format!("report claims rank {}", report.rank),
                }
                .into());
            }
            match report.outcome {
                ReportOutcome::Completed { outputs } => Ok(outputs),
                ReportOutcome::Failed { message } => Err(DispatchError::Collective {
                    rank,
                    message: format!("worker failed: {message}"),
                }
                .into()),
            }
        })
        .collect()
}

/// Runs a batch across a worker group launched by `spawner`.
///
/// The workers resolve the objective themselves from the problem's driver
/// locator; nothing callable crosses the process boundary.
pub struct DistributedDispatcher<'a> {
    spawner: &'a dyn Spawner,
}

impl<'a> DistributedDispatcher<'a> {
    pub fn new(spawner: &'a dyn Spawner) -> Self {
        Self { spawner }
    }

    pub fn evaluate(
        &self,
        problem: &Problem,
        task_fields: &Point,
        batch: &EvaluationBatch,
        options: &ExecutionOptions,
    ) -> TdResult<Vec<Vec<Value>>> {
        let total = batch.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let workers = options.objective_multisample_processes.clamp(1, total);
        let request = SpawnRequest {
            executable: options
                .worker_executable
                .clone()
                .unwrap_or_else(default_worker_executable),
            workers,
            threads_per_worker: options.threads_per_worker,
        };
        let dispatch_id = Uuid::new_v4();
        info!(%dispatch_id, workers, configurations = total, "starting distributed dispatch");

        let mut group = self.spawner.spawn(&request)?;
        let payload = WorkerPayload {
            dispatch_id,
            problem: problem.clone(),
            task_fields: task_fields.clone(),
            batch: batch.clone(),
            ids: batch.ids(),
            options: options.for_worker(),
        };
        let partials = group
            .broadcast(&payload)
            .and_then(|()| group.gather())
            .and_then(|reports| partials_from_reports(reports, workers));
        let released = group.disconnect();

        let partials = match (partials, released) {
            (Ok(partials), Ok(())) => partials,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(release)) => {
                warn!(%dispatch_id, error = %release, "worker group release failed after dispatch failure");
                return Err(e);
            }
        };
        let outputs = reconstruct_order(partials, total)?;
        info!(%dispatch_id, configurations = total, "distributed dispatch complete");
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::ThreadSpawner;
    use crate::objective::{objective_fn, DriverResolver, Objective};
    use crate::spawn::WorkerGroup;
    use crate::sequential;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};
    use td_types::{DriverLocator, Space, TdError};

    fn problem() -> Problem {
        Problem::new(Space::new(), Space::new().add_integer("index", 0, 99), 1)
            .with_driver(DriverLocator::new("in-process"))
    }

    fn batch(n: i64) -> EvaluationBatch {
        let space = Space::new().add_integer("index", 0, 99);
        (0..n)
            .map(|i| space.transform(&[Value::Int(i)]).unwrap())
            .collect()
    }

    fn index_times_ten() -> impl Objective {
        objective_fn(|p| {
            let i = p["index"].as_f64().ok_or("index is not numeric")?;
            if i < 0.0 {
                return Err("negative index".into());
            }
            Ok(vec![Value::Float(i * 10.0)])
        })
    }

    fn resolver() -> impl DriverResolver {
        |_: &Problem| -> TdResult<Arc<dyn Objective>> { Ok(Arc::new(index_times_ten())) }
    }

    fn tens(n: usize) -> Vec<Vec<Value>> {
        (0..n).map(|i| vec![Value::Float(i as f64 * 10.0)]).collect()
    }

    #[test]
    fn stride_partition() {
        let ids: Vec<usize> = (0..7).collect();
        assert_eq!(stride_ids(&ids, 0, 3), vec![0, 3, 6]);
        assert_eq!(stride_ids(&ids, 1, 3), vec![1, 4]);
        assert_eq!(stride_ids(&ids, 2, 3), vec![2, 5]);
        assert!(stride_ids(&ids[..2], 2, 3).is_empty());
    }

    #[test]
    fn scenario_a_reconstruction() {
        let partials = vec![vec![0, 20], vec![10, 30]];
        assert_eq!(reconstruct_order(partials, 4).unwrap(), vec![0, 10, 20, 30]);
    }

    #[test]
    fn uneven_partials_stop_at_batch_boundary() {
        let partials = vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]];
        assert_eq!(reconstruct_order(partials, 7).unwrap(), (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn wrong_partial_length_is_a_collective_error() {
        let err = reconstruct_order(vec![vec![0, 2], vec![1, 3, 5]], 4).unwrap_err();
        assert!(matches!(
            err,
            TdError::Dispatch(DispatchError::Collective { rank: 1, .. })
        ));
        assert!(reconstruct_order(vec![vec![0, 2], vec![1]], 4).is_err());
    }

    proptest! {
        #[test]
        fn partition_then_reconstruct_is_identity(total in 0usize..64, size in 1usize..9) {
            let ids: Vec<usize> = (0..total).collect();
            let partials: Vec<Vec<usize>> = (0..size).map(|r| stride_ids(&ids, r, size)).collect();
            let covered: usize = partials.iter().map(Vec::len).sum();
            prop_assert_eq!(covered, total);
            prop_assert_eq!(reconstruct_order(partials, total).unwrap(), ids);
        }
    }

    #[test]
    fn scenario_a_end_to_end() {
        let spawner = ThreadSpawner::new(resolver());
        let out = DistributedDispatcher::new(&spawner)
            .evaluate(&problem(), &Point::new(), &batch(4), &ExecutionOptions::distributed(2))
            .unwrap();
        assert_eq!(out, tens(4));
    }

    #[test]
    fn matches_sequential_for_every_group_size() {
        let objective = index_times_ten();
        let b = batch(11);
        let expected =
            sequential::evaluate_subset(&problem(), &Point::new(), &b, &b.ids(), &objective).unwrap();
        let spawner = ThreadSpawner::new(resolver());
        for workers in 1..=13 {
            let out = DistributedDispatcher::new(&spawner)
                .evaluate(&problem(), &Point::new(), &b, &ExecutionOptions::distributed(workers))
                .unwrap();
            assert_eq!(out, expected, "workers = {workers}");
        }
    }

    #[test]
    fn worker_failure_fails_the_batch() {
        let failing = |_: &Problem| -> TdResult<Arc<dyn Objective>> {
            Ok(Arc::new(objective_fn(|p| {
                if p["index"] == Value::Int(3) {
                    return Err("simulator crashed".into());
                }
                Ok(vec![Value::Int(0)])
            })))
        };
        let spawner = ThreadSpawner::new(failing);
        let err = DistributedDispatcher::new(&spawner)
            .evaluate(&problem(), &Point::new(), &batch(6), &ExecutionOptions::distributed(2))
            .unwrap_err();
        match err {
            TdError::Dispatch(DispatchError::Collective { rank, message }) => {
                assert_eq!(rank, 1);
                assert!(message.contains("simulator crashed"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Records spawn requests and what the group saw.
    struct Recording {
        inner: ThreadSpawner,
        requests: Mutex<Vec<SpawnRequest>>,
    }

    impl Spawner for Recording {
        fn spawn(&self, request: &SpawnRequest) -> TdResult<Box<dyn WorkerGroup>> {
            self.requests.lock().unwrap().push(request.clone());
            self.inner.spawn(request)
        }
    }

    #[test]
    fn group_is_capped_at_batch_size() {
        let spawner = Recording {
            inner: ThreadSpawner::new(resolver()),
            requests: Mutex::new(Vec::new()),
        };
        let options = ExecutionOptions::distributed(8)
            .with_threads_per_worker(4)
            .with_worker_executable("/opt/td/bin/td-worker");
        let out = DistributedDispatcher::new(&spawner)
            .evaluate(&problem(), &Point::new(), &batch(3), &options)
            .unwrap();
        assert_eq!(out, tens(3));

        let requests = spawner.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].workers, 3);
        assert_eq!(requests[0].threads_per_worker, 4);
        assert_eq!(requests[0].executable, std::path::PathBuf::from("/opt/td/bin/td-worker"));
    }

    #[test]
    fn empty_batch_spawns_nothing() {
        let spawner = Recording {
            inner: ThreadSpawner::new(resolver()),
            requests: Mutex::new(Vec::new()),
        };
        let out = DistributedDispatcher::new(&spawner)
            .evaluate(&problem(), &Point::new(), &batch(0), &ExecutionOptions::distributed(4))
            .unwrap();
        assert!(out.is_empty());
        assert!(spawner.requests.lock().unwrap().is_empty());
    }
}
