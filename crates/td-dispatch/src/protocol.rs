//! Messages exchanged between the manager and its workers.
//!
//! Each message is one line of JSON. The manager broadcasts a single
//! [`WorkerPayload`]; every worker answers with a single [`WorkerReport`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use td_types::{EvaluationBatch, ExecutionOptions, Point, Problem, TdResult, Value};

/// Environment variable carrying the worker's rank.
pub const RANK_ENV: &str = "TD_WORKER_RANK";
/// Environment variable carrying the worker group size.
pub const SIZE_ENV: &str = "TD_WORKER_SIZE";
/// Environment variable carrying the computation threads per worker.
pub const THREADS_ENV: &str = "TD_WORKER_THREADS";
/// Thread-count variable honoured by OpenMP-based drivers.
pub const OMP_THREADS_ENV: &str = "OMP_NUM_THREADS";

/// Everything a worker needs to evaluate its share of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub dispatch_id: Uuid,
    pub problem: Problem,
    /// Denormalized task coordinate.
    pub task_fields: Point,
    pub batch: EvaluationBatch,
    /// Ids to process across the whole group; each worker takes its stride.
    pub ids: Vec<usize>,
    pub options: ExecutionOptions,
}

/// A worker's answer to the broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub rank: usize,
    pub outcome: ReportOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Outputs for the worker's stride, in stride order.
    Completed { outputs: Vec<Vec<Value>> },
    Failed { message: String },
}

/// Serialize a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> TdResult<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> TdResult<T> {
    Ok(serde_json::from_str(line.trim_end_matches(['\n', '\r']))?)
}
