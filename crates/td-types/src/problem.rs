//! Tuning problem description, tasks and evaluation batches.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::TdResult;
use crate::space::Space;
use crate::validation_error;
use crate::value::{Point, Value};

/// Locates an external objective driver.
///
/// The driver is run once per configuration. It reads one JSON-encoded
/// [`Point`] from stdin and prints either a JSON number or a JSON array of
/// numbers to stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverLocator {
    /// Executable to run.
    pub program: PathBuf,
    /// Extra arguments passed before any input.
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory containing the driver; used as its working directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl DriverLocator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Static description of what is being tuned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Task (input) dimensions.
    pub input_space: Space,
    /// Tuning parameter dimensions.
    pub parameter_space: Space,
    /// Number of objective values per configuration.
    pub output_dim: usize,
    /// Fixed fields merged into every evaluation point (e.g. node counts).
    #[serde(default)]
    pub constants: Point,
    /// External driver, required for distributed objective evaluation.
    #[serde(default)]
    pub driver: Option<DriverLocator>,
}

impl Problem {
    pub fn new(input_space: Space, parameter_space: Space, output_dim: usize) -> Self {
        Self {
            input_space,
            parameter_space,
            output_dim,
            constants: Point::new(),
            driver: None,
        }
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    pub fn with_driver(mut self, driver: DriverLocator) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn validate(&self) -> TdResult<()> {
        if self.output_dim == 0 {
            return Err(validation_error!("output dimensionality must be at least 1"));
        }
        Ok(())
    }

    /// Denormalized task coordinate keyed by input dimension name.
    pub fn task_fields(&self, task: &Task) -> TdResult<Point> {
        self.input_space.to_point(&task.coordinates)
    }

    /// The full point handed to the objective for one configuration:
    /// parameters, then constants, then task fields (later entries win).
    pub fn evaluation_point(&self, task_fields: &Point, config: &Configuration) -> TdResult<Point> {
        let mut point = self.parameter_space.to_point(&config.normalized)?;
        point.extend(self.constants.iter().map(|(k, v)| (k.clone(), v.clone())));
        point.extend(task_fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(point)
    }
}

/// One input-space coordinate under tuning, in normalized units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub coordinates: Vec<f64>,
}

impl Task {
    pub fn new(coordinates: Vec<f64>) -> Self {
        Self { coordinates }
    }
}

/// One parameter-space point, in normalized units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub normalized: Vec<f64>,
}

impl Configuration {
    pub fn new(normalized: Vec<f64>) -> Self {
        Self { normalized }
    }

    /// Original-unit values of this configuration.
    pub fn original(&self, space: &Space) -> TdResult<Vec<Value>> {
        space.inverse_transform(&self.normalized)
    }
}

/// Ordered configurations for one task. The index of each entry is its
/// evaluation identity: result row `i` always belongs to entry `i`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationBatch {
    pub configurations: Vec<Configuration>,
}

impl EvaluationBatch {
    pub fn new(configurations: Vec<Configuration>) -> Self {
        Self { configurations }
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Configuration> {
        self.configurations.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Configuration> {
        self.configurations.iter()
    }

    /// The full id range `[0, N)`.
    pub fn ids(&self) -> Vec<usize> {
        (0..self.configurations.len()).collect()
    }
}

impl FromIterator<Vec<f64>> for EvaluationBatch {
    fn from_iter<I: IntoIterator<Item = Vec<f64>>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Configuration::new).collect())
    }
}
