//! Named constraints and the feasibility gate.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use td_types::{ConstraintError, ObjectiveError, Point};
use tracing::{debug, trace};

use crate::expr::{EvalError, Expression, ParseError};

/// Predicate over a subset of a configuration's fields.
pub type PredicateFn = dyn Fn(&Point) -> Result<bool, ObjectiveError> + Send + Sync;

/// How a constraint decides feasibility.
#[derive(Clone)]
pub enum ConstraintKind {
    /// An expression over field names. Parse failures are kept and reported
    /// when the constraint is first evaluated.
    Expression(Result<Expression, ParseError>),
    /// A predicate receiving only the fields named in `params`; every
    /// declared parameter is required.
    Predicate {
        params: Vec<String>,
        func: Arc<PredicateFn>,
    },
}

impl std::fmt::Debug for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expression(Ok(expr)) => f.debug_tuple("Expression").field(&expr.source()).finish(),
            Self::Expression(Err(err)) => f.debug_tuple("Expression").field(err).finish(),
            Self::Predicate { params, .. } => {
                f.debug_struct("Predicate").field("params", params).finish()
            }
        }
    }
}

/// A named feasibility predicate.
#[derive(Debug, Clone)]
pub struct Constraint {
    name: String,
    kind: ConstraintKind,
}

/// Why a single constraint could not produce a boolean.
enum Outcome {
    Decided(bool),
    /// A parameter binding is missing; undecidable from task fields alone.
    Underspecified(String),
    Failed(String),
}

impl Constraint {
    pub fn expression(name: impl Into<String>, source: &str) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Expression(Expression::parse(source)),
        }
    }

    pub fn predicate<F, S>(name: impl Into<String>, params: impl IntoIterator<Item = S>, func: F) -> Self
    where
        F: Fn(&Point) -> Result<bool, ObjectiveError> + Send + Sync + 'static,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ConstraintKind::Predicate {
                params: params.into_iter().map(Into::into).collect(),
                func: Arc::new(func),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    fn check(&self, point: &Point) -> Outcome {
        match &self.kind {
            ConstraintKind::Expression(Err(err)) => Outcome::Failed(err.to_string()),
            ConstraintKind::Expression(Ok(expr)) => match expr.is_satisfied(point) {
                Ok(b) => Outcome::Decided(b),
                Err(EvalError::UndefinedName(name)) => {
                    Outcome::Underspecified(format!("name '{name}' is not defined"))
                }
                Err(other) => Outcome::Failed(other.to_string()),
            },
            ConstraintKind::Predicate { params, func } => {
                let mut args = Point::new();
                let mut missing = Vec::new();
                for param in params {
                    match point.get(param) {
                        Some(v) => {
                            args.insert(param.clone(), v.clone());
                        }
                        None => missing.push(param.as_str()),
                    }
                }
                if !missing.is_empty() {
                    return Outcome::Underspecified(format!(
                        "missing required argument(s): {}",
                        missing.join(", ")
                    ));
                }
                match panic::catch_unwind(AssertUnwindSafe(|| (func.as_ref())(&args))) {
                    Ok(Ok(b)) => Outcome::Decided(b),
                    Ok(Err(err)) => Outcome::Failed(err.to_string()),
                    Err(payload) => Outcome::Failed(panic_message(payload.as_ref())),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Constraints evaluated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint. A constraint with the same name is replaced in
    /// place, keeping its original position.
    pub fn insert(&mut self, constraint: Constraint) {
        match self.constraints.iter_mut().find(|c| c.name == constraint.name) {
            Some(existing) => *existing = constraint,
            None => self.constraints.push(constraint),
        }
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.insert(constraint);
        self
    }

    pub fn with_expression(self, name: impl Into<String>, source: &str) -> Self {
        self.with(Constraint::expression(name, source))
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    /// See [`feasible`].
    pub fn feasible(&self, point: &Point, inputs_only: bool) -> Result<bool, ConstraintError> {
        feasible(self, point, inputs_only)
    }
}

impl FromIterator<Constraint> for ConstraintSet {
    fn from_iter<I: IntoIterator<Item = Constraint>>(iter: I) -> Self {
        let mut set = Self::new();
        for c in iter {
            set.insert(c);
        }
        set
    }
}

/// Whether `point` satisfies every constraint, stopping at the first that
/// does not.
///
/// With `inputs_only`, a constraint that fails only because a field is not
/// bound yet (an undefined name in an expression, or a missing declared
/// argument of a predicate) is treated as satisfied. Every other failure is
/// a [`ConstraintError::Definition`] naming the constraint.
pub fn feasible(
    constraints: &ConstraintSet,
    point: &Point,
    inputs_only: bool,
) -> Result<bool, ConstraintError> {
    for constraint in constraints.iter() {
        match constraint.check(point) {
            Outcome::Decided(true) => {}
            Outcome::Decided(false) => {
                trace!(constraint = %constraint.name, "constraint violated");
                return Ok(false);
            }
            Outcome::Underspecified(reason) if inputs_only => {
                debug!(constraint = %constraint.name, %reason, "constraint undecidable from inputs, passing");
            }
            Outcome::Underspecified(message) | Outcome::Failed(message) => {
                return Err(ConstraintError::Definition {
                    constraint: constraint.name.clone(),
                    message,
                });
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use td_types::{point, Value};

    #[test]
    fn undefined_parameter_passes_in_inputs_only_mode() {
        let set = ConstraintSet::new().with_expression("cst1", "x < y");

        assert!(set.feasible(&point! { "x" => 1 }, true).unwrap());
        assert!(!set.feasible(&point! { "x" => 1, "y" => 0 }, false).unwrap());
        assert!(set.feasible(&point! { "x" => 1, "y" => 2 }, false).unwrap());
    }

    #[test]
    fn undefined_name_is_fatal_outside_inputs_only_mode() {
        let set = ConstraintSet::new().with_expression("cst1", "x < y");
        let err = set.feasible(&point! { "x" => 1 }, false).unwrap_err();
        let ConstraintError::Definition { constraint, message } = err;
        assert_eq!(constraint, "cst1");
        assert!(message.contains("'y'"));
    }

    #[test]
    fn malformed_expression_names_the_constraint() {
        let set = ConstraintSet::new()
            .with_expression("ok", "x > 0")
            .with_expression("broken", "x >");
        for inputs_only in [false, true] {
            let err = set.feasible(&point! { "x" => 1 }, inputs_only).unwrap_err();
            assert!(err.to_string().contains("'broken'"));
        }
    }

    #[test]
    fn runtime_error_is_fatal_even_in_inputs_only_mode() {
        let set = ConstraintSet::new().with_expression("div", "x / (x - 1) > 0");
        assert!(set.feasible(&point! { "x" => 1 }, true).is_err());
    }

    #[test]
    fn evaluation_stops_at_first_violation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let set = ConstraintSet::new()
            .with_expression("first", "x > 10")
            .with(Constraint::predicate("second", ["x"], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }));

        assert!(!set.feasible(&point! { "x" => 1 }, false).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(set.feasible(&point! { "x" => 11 }, false).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn predicate_sees_only_declared_fields() {
        let set = ConstraintSet::new().with(Constraint::predicate("grid", ["Px", "Py"], |p| {
            assert_eq!(p.len(), 2);
            let px = p["Px"].as_f64().unwrap_or(0.0);
            let py = p["Py"].as_f64().unwrap_or(0.0);
            Ok(px * py <= 16.0)
        }));

        let point = point! { "Px" => 4, "Py" => 4, "nx" => 100, "solver" => "gmres" };
        assert!(set.feasible(&point, false).unwrap());
    }

    #[test]
    fn predicate_missing_argument_handling() {
        let set = ConstraintSet::new().with(Constraint::predicate("c", ["nx", "Px"], |p| {
            Ok(p["nx"] != Value::Int(0) && p["Px"] != Value::Int(0))
        }));
        let inputs = point! { "nx" => 100 };

        assert!(set.feasible(&inputs, true).unwrap());
        let err = set.feasible(&inputs, false).unwrap_err();
        assert!(err.to_string().contains("Px"));
    }

    #[test]
    fn predicate_errors_and_panics_surface() {
        let failing = ConstraintSet::new().with(Constraint::predicate("fails", ["x"], |_| {
            Err("lookup table missing".into())
        }));
        let err = failing.feasible(&point! { "x" => 1 }, true).unwrap_err();
        assert!(err.to_string().contains("lookup table missing"));

        let panicking = ConstraintSet::new().with(Constraint::predicate(
            "panics",
            ["x"],
            |_| -> Result<bool, ObjectiveError> { panic!("index out of bounds") },
        ));
        let err = panicking.feasible(&point! { "x" => 1 }, true).unwrap_err();
        assert!(err.to_string().contains("'panics'"));
        assert!(err.to_string().contains("index out of bounds"));
    }

    #[test]
    fn reinserting_a_name_keeps_its_position() {
        let set = ConstraintSet::new()
            .with_expression("a", "x > 0")
            .with_expression("b", "x > 1")
            .with_expression("a", "x > 2");
        let names: Vec<&str> = set.iter().map(Constraint::name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!set.feasible(&point! { "x" => 2 }, false).unwrap());
    }

    #[test]
    fn empty_set_is_always_feasible() {
        assert!(ConstraintSet::new().feasible(&Point::new(), false).unwrap());
    }

    proptest! {
        #[test]
        fn feasible_equals_conjunction_of_individual_results(
            x in -50i64..50,
            y in -50i64..50,
            bounds in proptest::collection::vec(-50i64..50, 0..6),
        ) {
            let constraints: Vec<Constraint> = bounds
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    let src = if i % 2 == 0 { format!("x + {b} < y") } else { format!("x * y >= {b}") };
                    Constraint::expression(format!("c{i}"), &src)
                })
                .collect();
            let point = point! { "x" => x, "y" => y };

            let expected = constraints.iter().all(|c| {
                ConstraintSet::new().with(c.clone()).feasible(&point, false).unwrap()
            });
            let set: ConstraintSet = constraints.into_iter().collect();
            prop_assert_eq!(set.feasible(&point, false).unwrap(), expected);
        }
    }
}
