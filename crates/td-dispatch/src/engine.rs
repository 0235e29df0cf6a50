//! The evaluation orchestrator: one entry point over every strategy.

use std::sync::Arc;

use td_constraints::ConstraintSet;
use td_types::{
    config_error, DispatchError, EvaluationBatch, ExecutionOptions, Machine, Point, Problem,
    ResultMatrix, TdResult, Task,
};
use tracing::{debug, info, warn};

use crate::distributed::DistributedDispatcher;
use crate::objective::Objective;
use crate::sequential;
use crate::shared::SharedMemoryDispatcher;
use crate::spawn::{ProcessSpawner, Spawner};
use crate::strategy::{Role, Strategy};

/// Evaluates batches of configurations and enforces the feasibility gate.
///
/// Each call is independent: worker groups and thread pools live only as
/// long as the call that created them.
#[derive(Clone)]
pub struct DispatchEngine {
    machine: Machine,
    spawner: Arc<dyn Spawner>,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("machine", &self.machine)
            .finish_non_exhaustive()
    }
}

impl Default for DispatchEngine {
    fn default() -> Self {
        Self::new(Machine::default())
    }
}

impl DispatchEngine {
    /// Engine that launches distributed workers as OS processes.
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            spawner: Arc::new(ProcessSpawner),
        }
    }

    pub fn with_spawner(mut self, spawner: impl Spawner + 'static) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Whether `point` satisfies every constraint. See
    /// [`td_constraints::feasible`] for the `inputs_only` rules.
    pub fn feasible(
        &self,
        constraints: &ConstraintSet,
        point: &Point,
        inputs_only: bool,
    ) -> TdResult<bool> {
        Ok(td_constraints::feasible(constraints, point, inputs_only)?)
    }

    /// Evaluate every configuration of `batch` for `task`.
    ///
    /// Row `i` of the result belongs to configuration `i` whichever strategy
    /// runs. In distributed mode the workers run the problem's driver and
    /// `objective` is not called.
    pub fn evaluate(
        &self,
        problem: &Problem,
        task: &Task,
        batch: &EvaluationBatch,
        objective: &dyn Objective,
        options: &ExecutionOptions,
    ) -> TdResult<ResultMatrix> {
        problem.validate()?;
        options.validate()?;
        let strategy = Strategy::select(options, Role::Manager);
        if matches!(strategy, Strategy::Distributed { .. }) && problem.driver.is_none() {
            return Err(config_error!(
                "distributed evaluation needs a driver locator so workers can run the objective"
            ));
        }

        let task_fields = problem.task_fields(task)?;
        debug!(?strategy, configurations = batch.len(), "dispatching batch");
        let outputs = match strategy {
            Strategy::Distributed { processes } => {
                let cores = self.machine.total_cores();
                let demand = processes.min(batch.len()) * options.threads_per_worker;
                if demand > cores {
                    warn!(demand, cores, "worker group oversubscribes the machine");
                }
                DistributedDispatcher::new(self.spawner.as_ref())
                    .evaluate(problem, &task_fields, batch, options)?
            }
            Strategy::SharedMemory { threads } => SharedMemoryDispatcher::new(threads)
                .evaluate_subset(problem, &task_fields, batch, &batch.ids(), objective)?,
            Strategy::Sequential => {
                sequential::evaluate_subset(problem, &task_fields, batch, &batch.ids(), objective)?
            }
        };

        if outputs.len() != batch.len() {
            return Err(DispatchError::ResultShape {
                message: format!(
                    "{} results for a batch of {}",
                    outputs.len(),
                    batch.len()
                ),
            }
            .into());
        }
        ResultMatrix::from_outputs(&outputs, problem.output_dim)
    }

    /// Evaluate several tasks' batches in turn; the first failure ends the
    /// call.
    pub fn evaluate_tasks(
        &self,
        problem: &Problem,
        work: &[(Task, EvaluationBatch)],
        objective: &dyn Objective,
        options: &ExecutionOptions,
    ) -> TdResult<Vec<ResultMatrix>> {
        info!(tasks = work.len(), "evaluating task batches");
        work.iter()
            .map(|(task, batch)| self.evaluate(problem, task, batch, objective, options))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::ThreadSpawner;
    use crate::objective::{objective_fn, DriverResolver};
    use proptest::prelude::*;
    use td_types::{DriverLocator, Space, TdError, Value};

    fn problem() -> Problem {
        Problem::new(
            Space::new().add_integer("size", 10, 20),
            Space::new()
                .add_integer("block", 1, 64)
                .add_categorical("layout", ["row", "col"]),
            2,
        )
        .with_constant("nodes", 1)
        .with_driver(DriverLocator::new("in-process"))
    }

    fn cost(p: &Point) -> Result<Vec<Value>, td_types::ObjectiveError> {
        let block = p["block"].as_f64().ok_or("block")?;
        let size = p["size"].as_f64().ok_or("size")?;
        let penalty = if p["layout"].as_str() == Some("col") { 1.5 } else { 1.0 };
        Ok(vec![Value::Float(size / block * penalty), Value::Int(p["nodes"].as_f64().unwrap_or(0.0) as i64)])
    }

    fn resolver() -> impl DriverResolver {
        |_: &Problem| -> TdResult<Arc<dyn Objective>> { Ok(Arc::new(objective_fn(cost))) }
    }

    fn engine() -> DispatchEngine {
        DispatchEngine::default().with_spawner(ThreadSpawner::new(resolver()))
    }

    fn batch(configs: &[(f64, f64)]) -> EvaluationBatch {
        configs.iter().map(|&(b, l)| vec![b, l]).collect()
    }

    fn all_strategies() -> Vec<ExecutionOptions> {
        vec![
            ExecutionOptions::default(),
            ExecutionOptions::shared(3),
            ExecutionOptions::distributed(2),
            ExecutionOptions::distributed(4).with_shared_memory(true).with_threads(2),
        ]
    }

    #[test]
    fn strategies_agree() {
        let b = batch(&[(0.0, 0.1), (0.5, 0.9), (1.0, 0.2), (0.25, 0.6), (0.75, 0.4)]);
        let task = Task::new(vec![0.5]);
        let objective = objective_fn(cost);
        let engine = engine();
        let baseline = engine
            .evaluate(&problem(), &task, &b, &objective, &ExecutionOptions::default())
            .unwrap();
        assert_eq!(baseline.rows(), 5);
        assert_eq!(baseline.cols(), 2);
        for options in all_strategies() {
            let out = engine.evaluate(&problem(), &task, &b, &objective, &options).unwrap();
            assert_eq!(out, baseline, "{options:?}");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]
        #[test]
        fn strategies_agree_on_random_batches(
            configs in prop::collection::vec((0.0f64..=1.0, 0.0f64..=1.0), 0..12),
            workers in 1usize..6,
        ) {
            let b = batch(&configs);
            let task = Task::new(vec![0.0]);
            let objective = objective_fn(cost);
            let engine = engine();
            let sequential = engine
                .evaluate(&problem(), &task, &b, &objective, &ExecutionOptions::default())
                .unwrap();
            let distributed = engine
                .evaluate(&problem(), &task, &b, &objective, &ExecutionOptions::distributed(workers))
                .unwrap();
            let shared = engine
                .evaluate(&problem(), &task, &b, &objective, &ExecutionOptions::shared(workers))
                .unwrap();
            prop_assert_eq!(&distributed, &sequential);
            prop_assert_eq!(&shared, &sequential);
        }
    }

    #[test]
    fn distributed_without_driver_is_a_config_error() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let objective = objective_fn(|_| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![Value::Int(0), Value::Int(0)])
        });
        let mut p = problem();
        p.driver = None;
        let err = engine()
            .evaluate(&p, &Task::new(vec![0.0]), &batch(&[(0.0, 0.0)]), &objective, &ExecutionOptions::distributed(2))
            .unwrap_err();
        assert!(matches!(err, TdError::Config(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn wrong_output_width_is_a_shape_error() {
        let objective = objective_fn(|_| Ok(vec![Value::Int(1)]));
        let err = engine()
            .evaluate(&problem(), &Task::new(vec![0.0]), &batch(&[(0.0, 0.0)]), &objective, &ExecutionOptions::default())
            .unwrap_err();
        assert!(matches!(err, TdError::Dispatch(DispatchError::ResultShape { .. })));
    }

    #[test]
    fn non_numeric_output_is_a_shape_error() {
        let objective = objective_fn(|_| Ok(vec![Value::from("fast"), Value::Int(1)]));
        let err = engine()
            .evaluate(&problem(), &Task::new(vec![0.0]), &batch(&[(0.0, 0.0)]), &objective, &ExecutionOptions::shared(2))
            .unwrap_err();
        assert!(matches!(err, TdError::Dispatch(DispatchError::ResultShape { .. })));
    }

    #[test]
    fn invalid_options_are_rejected_before_work() {
        let objective = objective_fn(|_| panic!("must not run"));
        let options = ExecutionOptions::shared(2).with_threads(0);
        let err = engine()
            .evaluate(&problem(), &Task::new(vec![0.0]), &batch(&[(0.0, 0.0)]), &objective, &options)
            .unwrap_err();
        assert!(matches!(err, TdError::Config(_)));
    }

    #[test]
    fn evaluate_tasks_keeps_task_order() {
        let objective = objective_fn(cost);
        let work = vec![
            (Task::new(vec![0.0]), batch(&[(0.0, 0.0)])),
            (Task::new(vec![1.0]), batch(&[(0.0, 0.0), (1.0, 1.0)])),
        ];
        let out = engine()
            .evaluate_tasks(&problem(), &work, &objective, &ExecutionOptions::shared(2))
            .unwrap();
        assert_eq!(out.len(), 2);
        // size 10 then 20, block 1, layout row
        assert_eq!(out[0].get(0, 0), Some(10.0));
        assert_eq!(out[1].get(0, 0), Some(20.0));
        assert_eq!(out[1].rows(), 2);
    }

    #[test]
    fn feasibility_gate() {
        let constraints = ConstraintSet::new().with_expression("fits", "block * 2 <= size");
        let engine = engine();
        let mut point = td_types::point! { "size" => 10 };
        assert!(engine.feasible(&constraints, &point, true).unwrap());
        point.insert("block".into(), Value::Int(6));
        assert!(!engine.feasible(&constraints, &point, false).unwrap());
        assert!(engine.feasible(&constraints, &Point::new(), false).is_err());
    }
}
