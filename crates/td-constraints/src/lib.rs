//! # td-constraints
//!
//! Decides whether a configuration is feasible before any objective
//! evaluation runs. Constraints are either expressions over field names,
//! written in a small embedded language (see [`expr`]), or predicates
//! over a declared subset of the configuration's fields.

mod constraint;
pub mod expr;

pub use constraint::{feasible, Constraint, ConstraintKind, ConstraintSet, PredicateFn};
pub use expr::{EvalError, Expression, ParseError, Scalar};
