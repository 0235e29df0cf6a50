// Evaluation dispatch for tuning batches
// Sequential, thread-pool and worker-process strategies behind one engine

pub mod distributed;
pub mod engine;
pub mod local;
pub mod objective;
pub mod protocol;
pub mod sequential;
pub mod shared;
pub mod spawn;
pub mod strategy;
pub mod worker;

// Re-export the engine and the seams callers plug into
pub use distributed::{reconstruct_order, stride_ids, DistributedDispatcher};
pub use engine::DispatchEngine;
pub use local::ThreadSpawner;
pub use objective::{objective_fn, CommandObjective, CommandResolver, DriverResolver, Objective};
pub use shared::SharedMemoryDispatcher;
pub use spawn::{default_worker_executable, ProcessSpawner, SpawnRequest, Spawner, WorkerGroup};
pub use strategy::{Role, Strategy};
pub use worker::{run_worker, worker_main, Endpoint, StdioEndpoint};
