//! Worker group spawning and the collective broadcast/gather primitives.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use td_types::{DispatchError, TdResult};
use tracing::{debug, info, warn};

use crate::protocol::{
    decode_line, encode_line, WorkerPayload, WorkerReport, OMP_THREADS_ENV, RANK_ENV, SIZE_ENV,
    THREADS_ENV,
};

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub executable: PathBuf,
    pub workers: usize,
    pub threads_per_worker: usize,
}

/// Launches worker groups.
pub trait Spawner: Send + Sync {
    /// Launch the whole group or nothing: on failure no worker is left
    /// running.
    fn spawn(&self, request: &SpawnRequest) -> TdResult<Box<dyn WorkerGroup>>;
}

/// A live group of workers owned by one dispatch.
///
/// Implementations also release their workers on drop, so a group is never
/// leaked on an early return; [`WorkerGroup::disconnect`] is the orderly path.
pub trait WorkerGroup: Send {
    fn size(&self) -> usize;

    /// Deliver `payload` to every worker.
    fn broadcast(&mut self, payload: &WorkerPayload) -> TdResult<()>;

    /// Block until every worker has reported; reports are in rank order.
    fn gather(&mut self) -> TdResult<Vec<WorkerReport>>;

    /// Release the group and wait for its workers to finish.
    fn disconnect(self: Box<Self>) -> TdResult<()>;
}

/// Default location of the worker executable: `td-worker` next to the
/// current executable, else whatever `td-worker` resolves to on `PATH`.
pub fn default_worker_executable() -> PathBuf {
    let name = format!("td-worker{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Spawns workers as OS processes talking line-delimited JSON over their
/// stdin/stdout. Worker stderr is inherited.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(&self, request: &SpawnRequest) -> TdResult<Box<dyn WorkerGroup>> {
        let mut group = ProcessGroup {
            executable: request.executable.clone(),
            workers: Vec::with_capacity(request.workers),
        };
        for rank in 0..request.workers {
            // an error drops `group`, which kills the workers spawned so far
            let worker = spawn_worker(&request.executable, rank, request)?;
            group.workers.push(worker);
        }
        info!(
            executable = ?request.executable,
            workers = request.workers,
            threads_per_worker = request.threads_per_worker,
            "spawned worker group"
        );
        Ok(Box::new(group))
    }
}

fn spawn_worker(executable: &Path, rank: usize, request: &SpawnRequest) -> TdResult<WorkerProcess> {
    let threads = request.threads_per_worker.to_string();
    let mut child = Command::new(executable)
        .env(RANK_ENV, rank.to_string())
        .env(SIZE_ENV, request.workers.to_string())
        .env(THREADS_ENV, &threads)
        .env(OMP_THREADS_ENV, &threads)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| DispatchError::Spawn {
            executable: executable.to_path_buf(),
            source,
        })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take().map(BufReader::new);
    Ok(WorkerProcess {
        rank,
        child,
        stdin,
        stdout,
    })
}

#[derive(Debug)]
struct WorkerProcess {
    rank: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    fn collective_error(&self, message: impl Into<String>) -> DispatchError {
        collective(self.rank, message)
    }

    fn read_report(&mut self) -> TdResult<WorkerReport> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| collective(self.rank, "worker stdout is not connected"))?;
        let mut line = String::new();
        let read = stdout
            .read_line(&mut line)
            .map_err(|e| collective(self.rank, format!("failed to read report: {e}")))?;
        if read == 0 {
            let status = self
                .child
                .try_wait()
                .ok()
                .flatten()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "still running".to_string());
            return Err(self
                .collective_error(format!("worker closed its output without reporting ({status})"))
                .into());
        }
        let report: WorkerReport = decode_line(&line)
            .map_err(|e| self.collective_error(format!("malformed report: {e}")))?;
        if report.rank != self.rank {
            return Err(self
                .collective_error(format!("report claims rank {}", report.rank))
                .into());
        }
        Ok(report)
    }
}

fn collective(rank: usize, message: impl Into<String>) -> DispatchError {
    DispatchError::Collective {
        rank,
        message: message.into(),
    }
}

/// A group of worker processes.
#[derive(Debug)]
pub struct ProcessGroup {
    executable: PathBuf,
    workers: Vec<WorkerProcess>,
}

impl WorkerGroup for ProcessGroup {
    fn size(&self) -> usize {
        self.workers.len()
    }

    fn broadcast(&mut self, payload: &WorkerPayload) -> TdResult<()> {
        let line = encode_line(payload)?;
        for worker in &mut self.workers {
            let rank = worker.rank;
            // closing stdin afterwards tells the worker nothing else follows
            let mut stdin = worker
                .stdin
                .take()
                .ok_or_else(|| collective(rank, "payload already delivered"))?;
            stdin
                .write_all(line.as_bytes())
                .and_then(|_| stdin.flush())
                .map_err(|e| collective(rank, format!("broadcast failed: {e}")))?;
        }
        debug!(workers = self.workers.len(), bytes = line.len(), "payload broadcast");
        Ok(())
    }

    fn gather(&mut self) -> TdResult<Vec<WorkerReport>> {
        self.workers.iter_mut().map(WorkerProcess::read_report).collect()
    }

    fn disconnect(mut self: Box<Self>) -> TdResult<()> {
        let mut first_error = None;
        for mut worker in std::mem::take(&mut self.workers) {
            // unread output must not block a worker that is still writing
            worker.stdin.take();
            worker.stdout.take();
            match worker.child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    warn!(rank = worker.rank, %status, "worker exited unsuccessfully");
                    first_error.get_or_insert_with(|| {
                        worker.collective_error(format!("worker exited with {status}"))
                    });
                }
                Err(e) => {
                    first_error.get_or_insert_with(|| {
                        worker.collective_error(format!("failed to wait for worker: {e}"))
                    });
                }
            }
        }
        debug!(executable = ?self.executable, "worker group disconnected");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.stdin.take();
            worker.stdout.take();
            if let Ok(None) = worker.child.try_wait() {
                warn!(rank = worker.rank, "killing worker left running");
                let _ = worker.child.kill();
            }
            let _ = worker.child.wait();
        }
    }
}
