//! Choice of evaluation strategy from the execution options.

use td_types::ExecutionOptions;

/// Which side of a distributed dispatch is choosing a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Manager,
    /// A spawned worker. Workers never spawn further workers.
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Spawn a worker group and stripe the batch across it.
    Distributed { processes: usize },
    /// Evaluate on a bounded thread pool.
    SharedMemory { threads: usize },
    Sequential,
}

impl Strategy {
    /// Distributed-memory parallelism takes precedence over shared-memory
    /// parallelism; both only apply when objective evaluation parallelism is
    /// enabled.
    pub fn select(options: &ExecutionOptions, role: Role) -> Self {
        if !options.objective_evaluation_parallelism {
            return Strategy::Sequential;
        }
        if role == Role::Manager && options.distributed_memory_parallelism {
            return Strategy::Distributed {
                processes: options.objective_multisample_processes,
            };
        }
        if options.shared_memory_parallelism {
            return Strategy::SharedMemory {
                threads: options.objective_multisample_threads,
            };
        }
        Strategy::Sequential
    }
}
