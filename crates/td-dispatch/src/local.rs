//! In-process worker groups: the worker entry point on threads, connected
//! to the manager by channels.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use td_types::{DispatchError, TdResult};
use tracing::{debug, warn};

use crate::objective::DriverResolver;
use crate::protocol::{WorkerPayload, WorkerReport};
use crate::spawn::{SpawnRequest, Spawner, WorkerGroup};
use crate::worker::{run_worker, Endpoint};

/// Runs each worker of a group on its own thread.
///
/// Same broadcast/gather contract as [`crate::spawn::ProcessSpawner`]; the
/// request's executable is ignored and workers resolve their objective
/// through `resolver` instead.
#[derive(Clone)]
pub struct ThreadSpawner {
    resolver: Arc<dyn DriverResolver>,
}

impl ThreadSpawner {
    pub fn new(resolver: impl DriverResolver + 'static) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

impl std::fmt::Debug for ThreadSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSpawner").finish_non_exhaustive()
    }
}

impl Spawner for ThreadSpawner {
    fn spawn(&self, request: &SpawnRequest) -> TdResult<Box<dyn WorkerGroup>> {
        let mut group = ChannelGroup {
            workers: Vec::with_capacity(request.workers),
        };
        for rank in 0..request.workers {
            let (payload_tx, payload_rx) = bounded(1);
            let (report_tx, report_rx) = bounded(1);
            let mut endpoint = ChannelEndpoint {
                rank,
                size: request.workers,
                payloads: payload_rx,
                reports: report_tx,
            };
            let resolver = Arc::clone(&self.resolver);
            let handle = thread::Builder::new()
                .name(format!("td-worker-{rank}"))
                .spawn(move || run_worker(&mut endpoint, resolver.as_ref()))
                .map_err(|source| DispatchError::Spawn {
                    executable: request.executable.clone(),
                    source,
                })?;
            group.workers.push(ChannelWorker {
                rank,
                payloads: Some(payload_tx),
                reports: report_rx,
                handle: Some(handle),
            });
        }
        debug!(workers = request.workers, "spawned in-process worker group");
        Ok(Box::new(group))
    }
}

struct ChannelEndpoint {
    rank: usize,
    size: usize,
    payloads: Receiver<WorkerPayload>,
    reports: Sender<WorkerReport>,
}

impl Endpoint for ChannelEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn receive(&mut self) -> TdResult<WorkerPayload> {
        self.payloads.recv().map_err(|_| {
            DispatchError::Collective {
                rank: self.rank,
                message: "manager closed the channel before broadcasting".into(),
            }
            .into()
        })
    }

    fn report(&mut self, report: &WorkerReport) -> TdResult<()> {
        self.reports.send(report.clone()).map_err(|_| {
            DispatchError::Collective {
                rank: self.rank,
                message: "manager stopped listening for reports".into(),
            }
            .into()
        })
    }
}

struct ChannelWorker {
    rank: usize,
    payloads: Option<Sender<WorkerPayload>>,
    reports: Receiver<WorkerReport>,
    handle: Option<JoinHandle<TdResult<()>>>,
}

struct ChannelGroup {
    workers: Vec<ChannelWorker>,
}

fn collective(rank: usize, message: impl Into<String>) -> DispatchError {
    DispatchError::Collective {
        rank,
        message: message.into(),
    }
}

impl WorkerGroup for ChannelGroup {
    fn size(&self) -> usize {
        self.workers.len()
    }

    fn broadcast(&mut self, payload: &WorkerPayload) -> TdResult<()> {
        for worker in &mut self.workers {
            let sender = worker
                .payloads
                .take()
                .ok_or_else(|| collective(worker.rank, "payload already delivered"))?;
            sender
                .send(payload.clone())
                .map_err(|_| collective(worker.rank, "worker exited before the broadcast"))?;
        }
        Ok(())
    }

    fn gather(&mut self) -> TdResult<Vec<WorkerReport>> {
        self.workers
            .iter()
            .map(|worker| -> TdResult<WorkerReport> {
                let report = worker
                    .reports
                    .recv()
                    .map_err(|_| collective(worker.rank, "worker hung up without reporting"))?;
                if report.rank != worker.rank {
                    return Err(collective(worker.rank, format!("report claims rank {}", report.rank)).into());
                }
                Ok(report)
            })
            .collect()
    }

    fn disconnect(mut self: Box<Self>) -> TdResult<()> {
        let mut first_error = None;
        for mut worker in std::mem::take(&mut self.workers) {
            worker.payloads.take();
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            let error = match handle.join() {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => collective(worker.rank, format!("worker ended with an error: {e}")),
                Err(_) => collective(worker.rank, "worker panicked"),
            };
            warn!(rank = worker.rank, error = %error, "worker did not finish cleanly");
            first_error.get_or_insert(error);
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for ChannelGroup {
    fn drop(&mut self) {
        // closing the payload channels releases workers still waiting for one
        for worker in &mut self.workers {
            worker.payloads.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
