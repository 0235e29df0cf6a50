//! In-process, one-at-a-time evaluation of a batch subset.

use std::panic::{self, AssertUnwindSafe};

use td_types::{
    validation_error, DispatchError, EvaluationBatch, ObjectiveError, Point, Problem, TdResult,
    Value,
};
use tracing::trace;

use crate::objective::Objective;

/// Evaluate a single configuration of `batch`.
///
/// A panic inside the objective is reported as an objective failure for
/// `id`, the same as a returned error.
pub fn evaluate_one(
    problem: &Problem,
    task_fields: &Point,
    batch: &EvaluationBatch,
    id: usize,
    objective: &dyn Objective,
) -> TdResult<Vec<Value>> {
    let config = batch.get(id).ok_or_else(|| {
        validation_error!("configuration id {id} outside batch of {}", batch.len())
    })?;
    let point = problem.evaluation_point(task_fields, config)?;
    trace!(id, ?point, "evaluating configuration");
    panic::catch_unwind(AssertUnwindSafe(|| objective.evaluate(&point)))
        .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())))
        .map_err(|source| DispatchError::ObjectiveExecution { id, source }.into())
}

fn panic_error(payload: &(dyn std::any::Any + Send)) -> ObjectiveError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("objective panicked: {message}").into()
}

/// Evaluate the configurations named by `ids`, in the order given.
///
/// The output holds one entry per id, positionally aligned with `ids`. The
/// first objective failure stops the loop and is returned as is.
pub fn evaluate_subset(
    problem: &Problem,
    task_fields: &Point,
    batch: &EvaluationBatch,
    ids: &[usize],
    objective: &dyn Objective,
) -> TdResult<Vec<Vec<Value>>> {
    ids.iter()
        .map(|&id| evaluate_one(problem, task_fields, batch, id, objective))
        .collect()
}
