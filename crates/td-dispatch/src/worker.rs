//! Worker side of a distributed dispatch.

use std::io::{self, BufRead, Stdout, StdinLock, Write};

use td_types::{config_error, DispatchError, TdResult, Value};
use tracing::{debug, info, info_span, warn};

use crate::distributed::stride_ids;
use crate::objective::{CommandResolver, DriverResolver};
use crate::protocol::{
    decode_line, encode_line, ReportOutcome, WorkerPayload, WorkerReport, RANK_ENV, SIZE_ENV,
    THREADS_ENV,
};
use crate::sequential;
use crate::shared::SharedMemoryDispatcher;
use crate::strategy::{Role, Strategy};

/// A worker's connection to its manager.
pub trait Endpoint {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Block until the manager's broadcast arrives.
    fn receive(&mut self) -> TdResult<WorkerPayload>;

    fn report(&mut self, report: &WorkerReport) -> TdResult<()>;
}

/// Line-delimited JSON endpoint, normally the process's stdin and stdout.
pub struct StdioEndpoint<R, W> {
    rank: usize,
    size: usize,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> StdioEndpoint<R, W> {
    pub fn new(rank: usize, size: usize, input: R, output: W) -> Self {
        Self {
            rank,
            size,
            input,
            output,
        }
    }
}

impl StdioEndpoint<StdinLock<'static>, Stdout> {
    /// Endpoint for a spawned worker process: rank and group size come from
    /// the environment, messages over stdin and stdout.
    pub fn from_env() -> TdResult<Self> {
        let rank = env_usize(RANK_ENV)?;
        let size = env_usize(SIZE_ENV)?;
        if size == 0 || rank >= size {
            return Err(config_error!("worker rank {rank} is outside a group of {size}"));
        }
        Ok(Self::new(rank, size, io::stdin().lock(), io::stdout()))
    }
}

fn env_usize(name: &str) -> TdResult<usize> {
    let raw = std::env::var(name).map_err(|_| config_error!("{name} is not set"))?;
    raw.trim()
        .parse()
        .map_err(|e| config_error!("{name}={raw:?} is not a count: {e}"))
}

impl<R: BufRead, W: Write> Endpoint for StdioEndpoint<R, W> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn receive(&mut self) -> TdResult<WorkerPayload> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(DispatchError::Collective {
                rank: self.rank,
                message: "manager closed the channel before broadcasting".into(),
            }
            .into());
        }
        decode_line(&line)
    }

    fn report(&mut self, report: &WorkerReport) -> TdResult<()> {
        let line = encode_line(report)?;
        self.output.write_all(line.as_bytes())?;
        self.output.flush()?;
        Ok(())
    }
}

/// Receive one payload, evaluate this worker's stride of it and report
/// back.
///
/// An evaluation failure is reported to the manager as
/// [`ReportOutcome::Failed`] and also returned, so the worker exits
/// unsuccessfully.
pub fn run_worker(endpoint: &mut dyn Endpoint, resolver: &dyn DriverResolver) -> TdResult<()> {
    let payload = endpoint.receive()?;
    let rank = endpoint.rank();
    let size = endpoint.size();
    let span = info_span!("worker", rank, dispatch_id = %payload.dispatch_id);
    let _enter = span.enter();

    let outcome = evaluate_stride(&payload, rank, size, resolver);
    match outcome {
        Ok(outputs) => {
            debug!(results = outputs.len(), "stride complete");
            endpoint.report(&WorkerReport {
                rank,
                outcome: ReportOutcome::Completed { outputs },
            })
        }
        Err(e) => {
            warn!(error = %e, "stride failed");
            endpoint.report(&WorkerReport {
                rank,
                outcome: ReportOutcome::Failed {
                    message: e.to_string(),
                },
            })?;
            Err(e)
        }
    }
}

fn evaluate_stride(
    payload: &WorkerPayload,
    rank: usize,
    size: usize,
    resolver: &dyn DriverResolver,
) -> TdResult<Vec<Vec<Value>>> {
    let ids = stride_ids(&payload.ids, rank, size);
    let objective = resolver.resolve(&payload.problem)?;
    let strategy = Strategy::select(&payload.options, Role::Worker);
    debug!(?strategy, ids = ids.len(), "evaluating stride");

    match strategy {
        Strategy::SharedMemory { threads } => SharedMemoryDispatcher::new(threads).evaluate_subset(
            &payload.problem,
            &payload.task_fields,
            &payload.batch,
            &ids,
            objective.as_ref(),
        ),
        Strategy::Sequential | Strategy::Distributed { .. } => sequential::evaluate_subset(
            &payload.problem,
            &payload.task_fields,
            &payload.batch,
            &ids,
            objective.as_ref(),
        ),
    }
}

/// Entry point of the `td-worker` executable.
pub fn worker_main() -> TdResult<()> {
    let mut endpoint = StdioEndpoint::from_env()?;
    let threads = std::env::var(THREADS_ENV).ok();
    info!(
        rank = endpoint.rank(),
        size = endpoint.size(),
        threads = threads.as_deref().unwrap_or("unset"),
        "worker started"
    );
    run_worker(&mut endpoint, &CommandResolver)
}
