//! Embedded expression language for constraints.
//!
//! The grammar covers boolean logic (`and`, `or`, `not`, and their `&&`,
//! `||`, `!` spellings), chained comparisons, arithmetic (`+ - * / // % **`),
//! field references, numeric/string/boolean literals and a handful of
//! builtins (`abs`, `min`, `max`, `int`, `float`, `round`). Only the fields
//! of the point under evaluation are visible.

mod eval;
mod lexer;
mod parser;

pub use eval::{EvalError, Scalar};
pub use parser::ParseError;

use td_types::Point;

use parser::Expr;

/// A parsed constraint expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = lexer::tokenize(source)?;
        let ast = parser::Parser::new(tokens).parse()?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `point`; field names are the only bindings.
    pub fn evaluate(&self, point: &Point) -> Result<Scalar, EvalError> {
        eval::evaluate(&self.ast, point)
    }

    /// Evaluate and take the truthiness of the result.
    pub fn is_satisfied(&self, point: &Point) -> Result<bool, EvalError> {
        self.evaluate(point).map(|v| v.truthy())
    }

    /// Field names referenced anywhere in the expression.
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.ast.collect_names(&mut names);
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl std::str::FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
