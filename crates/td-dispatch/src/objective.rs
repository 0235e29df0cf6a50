//! Objective functions: in-process closures and external driver programs.

use serde::Deserialize;
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;

use td_types::{config_error, DriverLocator, ObjectiveError, Point, Problem, TdResult, Value};
use tracing::debug;

/// The user-supplied function being tuned.
///
/// Called once per configuration with the merged evaluation point; returns
/// one value per objective. A panic is caught and treated like a returned
/// error for that configuration.
pub trait Objective: Send + Sync {
    fn evaluate(&self, point: &Point) -> Result<Vec<Value>, ObjectiveError>;
}

impl<F> Objective for F
where
    F: Fn(&Point) -> Result<Vec<Value>, ObjectiveError> + Send + Sync,
{
    fn evaluate(&self, point: &Point) -> Result<Vec<Value>, ObjectiveError> {
        self(point)
    }
}

/// Pins a closure to the [`Objective`] signature so its argument and error
/// types need no annotations.
pub fn objective_fn<F>(f: F) -> F
where
    F: Fn(&Point) -> Result<Vec<Value>, ObjectiveError> + Send + Sync,
{
    f
}

/// Runs an external driver program once per configuration.
///
/// The point is written to the driver's stdin as one JSON line. The last
/// non-empty line of its stdout must be a JSON number or an array of
/// numbers; earlier lines are treated as the driver's own logging.
#[derive(Debug, Clone)]
pub struct CommandObjective {
    locator: DriverLocator,
}

impl CommandObjective {
    pub fn new(locator: DriverLocator) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &DriverLocator {
        &self.locator
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DriverOutput {
    One(Value),
    Many(Vec<Value>),
}

impl Objective for CommandObjective {
    fn evaluate(&self, point: &Point) -> Result<Vec<Value>, ObjectiveError> {
        let mut command = Command::new(&self.locator.program);
        command
            .args(&self.locator.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.locator.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            format!("failed to start driver {:?}: {e}", self.locator.program)
        })?;
        let mut line = serde_json::to_vec(point)?;
        line.push(b'\n');
        if let Some(mut stdin) = child.stdin.take() {
            // a driver may exit without reading its input; its exit status decides
            match stdin.write_all(&line) {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(format!("driver {:?} exited with {}", self.locator.program, output.status).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(program = ?self.locator.program, output = %stdout.trim(), "driver finished");
        parse_driver_output(&stdout)
    }
}

fn parse_driver_output(stdout: &str) -> Result<Vec<Value>, ObjectiveError> {
    let last = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or("driver produced no output")?;
    match serde_json::from_str::<DriverOutput>(last) {
        Ok(DriverOutput::One(v)) => Ok(vec![v]),
        Ok(DriverOutput::Many(vs)) => Ok(vs),
        Err(e) => Err(format!("unparseable driver output '{last}': {e}").into()),
    }
}

/// Resolves the objective a worker should run for a problem.
pub trait DriverResolver: Send + Sync {
    fn resolve(&self, problem: &Problem) -> TdResult<Arc<dyn Objective>>;
}

impl<F> DriverResolver for F
where
    F: Fn(&Problem) -> TdResult<Arc<dyn Objective>> + Send + Sync,
{
    fn resolve(&self, problem: &Problem) -> TdResult<Arc<dyn Objective>> {
        self(problem)
    }
}

/// Resolves a problem's [`DriverLocator`] to a [`CommandObjective`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandResolver;

impl DriverResolver for CommandResolver {
    fn resolve(&self, problem: &Problem) -> TdResult<Arc<dyn Objective>> {
        let locator = problem
            .driver
            .clone()
            .ok_or_else(|| config_error!("problem has no driver locator for worker-side evaluation"))?;
        Ok(Arc::new(CommandObjective::new(locator)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use td_types::{point, Space};

    #[test]
    fn closures_are_objectives() {
        let objective = objective_fn(|p| {
            let x = p.get("x").and_then(Value::as_f64).ok_or("x missing")?;
            Ok(vec![Value::Float(x * 2.0)])
        });
        let out = objective.evaluate(&point! { "x" => 1.5 }).unwrap();
        assert_eq!(out, vec![Value::Float(3.0)]);
        assert!(objective.evaluate(&Point::new()).is_err());
    }

    #[test]
    fn driver_output_forms() {
        assert_eq!(parse_driver_output("42\n").unwrap(), vec![Value::Int(42)]);
        assert_eq!(
            parse_driver_output("loading mesh...\n[1.5, 2]\n\n").unwrap(),
            vec![Value::Float(1.5), Value::Int(2)]
        );
        assert!(parse_driver_output("").is_err());
        assert!(parse_driver_output("time: 3s").is_err());
    }

    #[test]
    fn command_resolver_requires_a_driver() {
        let problem = Problem::new(Space::new(), Space::new(), 1);
        assert!(CommandResolver.resolve(&problem).is_err());

        let problem = problem.with_driver(DriverLocator::new("/bin/true"));
        assert!(CommandResolver.resolve(&problem).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn command_objective_runs_driver() {
        let locator = DriverLocator::new("/bin/sh").with_args(["-c", "cat >/dev/null; echo '[7, 0.5]'"]);
        let out = CommandObjective::new(locator).evaluate(&point! { "x" => 1 }).unwrap();
        assert_eq!(out, vec![Value::Int(7), Value::Float(0.5)]);
    }

    #[cfg(unix)]
    #[test]
    fn driver_ignoring_its_input_still_succeeds() {
        let locator = DriverLocator::new("/bin/sh").with_args(["-c", "echo 42"]);
        let objective = CommandObjective::new(locator);
        let large = point! { "mesh" => "x".repeat(200_000) };
        for _ in 0..20 {
            assert_eq!(objective.evaluate(&large).unwrap(), vec![Value::Int(42)]);
        }
        assert_eq!(objective.evaluate(&point! { "x" => 1 }).unwrap(), vec![Value::Int(42)]);
    }

    #[cfg(unix)]
    #[test]
    fn command_objective_reports_failed_driver() {
        let locator = DriverLocator::new("/bin/sh").with_args(["-c", "cat >/dev/null; exit 3"]);
        let err = CommandObjective::new(locator).evaluate(&Point::new()).unwrap_err();
        assert!(err.to_string().contains("exited"));
    }
}
