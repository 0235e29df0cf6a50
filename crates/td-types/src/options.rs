//! Execution options and machine description.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::TdResult;
use crate::{config_error, validation_error};

/// Options selecting and parameterizing the dispatch strategy for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Allow spawning a worker-process group.
    pub distributed_memory_parallelism: bool,

    /// Allow an in-process thread pool.
    pub shared_memory_parallelism: bool,

    /// Evaluate the configurations of a batch concurrently.
    pub objective_evaluation_parallelism: bool,

    /// Upper bound on spawned worker processes.
    pub objective_multisample_processes: usize,

    /// Upper bound on pool threads.
    pub objective_multisample_threads: usize,

    /// Computation threads each spawned worker is told to use.
    pub threads_per_worker: usize,

    /// Executable run by spawned workers. Only meaningful to the process
    /// that spawns the group, so it is never broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_executable: Option<PathBuf>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            distributed_memory_parallelism: false,
            shared_memory_parallelism: false,
            objective_evaluation_parallelism: false,
            objective_multisample_processes: 1,
            objective_multisample_threads: 1,
            threads_per_worker: 1,
            worker_executable: None,
        }
    }
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parallel evaluation over a spawned group of `processes` workers.
    pub fn distributed(processes: usize) -> Self {
        Self::default().with_distributed_memory(true).with_processes(processes)
    }

    /// Parallel evaluation over a pool of `threads` threads.
    pub fn shared(threads: usize) -> Self {
        Self::default().with_shared_memory(true).with_threads(threads)
    }

    pub fn with_distributed_memory(mut self, enabled: bool) -> Self {
        self.distributed_memory_parallelism = enabled;
        if enabled {
            self.objective_evaluation_parallelism = true;
        }
        self
    }

    pub fn with_shared_memory(mut self, enabled: bool) -> Self {
        self.shared_memory_parallelism = enabled;
        if enabled {
            self.objective_evaluation_parallelism = true;
        }
        self
    }

    pub fn with_objective_parallelism(mut self, enabled: bool) -> Self {
        self.objective_evaluation_parallelism = enabled;
        self
    }

    pub fn with_processes(mut self, n: usize) -> Self {
        self.objective_multisample_processes = n;
        self
    }

    pub fn with_threads(mut self, n: usize) -> Self {
        self.objective_multisample_threads = n;
        self
    }

    pub fn with_threads_per_worker(mut self, n: usize) -> Self {
        self.threads_per_worker = n;
        self
    }

    pub fn with_worker_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_executable = Some(path.into());
        self
    }

    /// Copy suitable for broadcasting to workers: spawn-side fields removed.
    pub fn for_worker(&self) -> Self {
        Self {
            worker_executable: None,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> TdResult<()> {
        if self.objective_multisample_processes == 0 {
            return Err(config_error!("objective_multisample_processes must be at least 1"));
        }
        if self.objective_multisample_threads == 0 {
            return Err(config_error!("objective_multisample_threads must be at least 1"));
        }
        if self.threads_per_worker == 0 {
            return Err(config_error!("threads_per_worker must be at least 1"));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> TdResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: impl AsRef<Path>) -> TdResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// The machine the engine runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub nodes: usize,
    pub cores: usize,
    pub hosts: Option<Vec<String>>,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            nodes: 1,
            cores: 1,
            hosts: None,
        }
    }
}

impl Machine {
    pub fn new(nodes: usize, cores: usize, hosts: Option<Vec<String>>) -> TdResult<Self> {
        if let Some(hosts) = &hosts {
            if hosts.len() != nodes {
                return Err(validation_error!(
                    "{} hosts listed for {} nodes",
                    hosts.len(),
                    nodes
                ));
            }
        }
        Ok(Self {
            nodes,
            cores,
            hosts,
        })
    }

    pub fn total_cores(&self) -> usize {
        self.nodes * self.cores
    }
}
