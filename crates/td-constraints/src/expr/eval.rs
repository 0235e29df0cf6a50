use std::cmp::Ordering;
use thiserror::Error;

use td_types::{Point, Value};

use super::parser::{BinOp, CmpOp, Expr, Literal, UnaryOp};

/// Runtime failure while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A referenced field (or function) is not bound.
    #[error("name '{0}' is not defined")]
    UndefinedName(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),
}

/// Value produced by an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Str(s) => !s.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
        }
    }

    /// Numeric view; booleans count as 0/1.
    fn number(&self) -> Option<Num> {
        match self {
            Self::Bool(b) => Some(Num::Int(*b as i64)),
            Self::Int(v) => Some(Num::Int(*v)),
            Self::Float(v) => Some(Num::Float(*v)),
            Self::Str(_) => None,
        }
    }
}

impl From<&Value> for Scalar {
    fn from(v: &Value) -> Self {
        match v {
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(*f),
            Value::Str(s) => Self::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

impl From<Num> for Scalar {
    fn from(n: Num) -> Self {
        match n {
            Num::Int(i) => Scalar::Int(i),
            Num::Float(f) => Scalar::Float(f),
        }
    }
}

pub(crate) fn evaluate(expr: &Expr, point: &Point) -> Result<Scalar, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Bool(b) => Scalar::Bool(*b),
            Literal::Int(i) => Scalar::Int(*i),
            Literal::Float(f) => Scalar::Float(*f),
            Literal::Str(s) => Scalar::Str(s.clone()),
        }),
        Expr::Name(name) => point
            .get(name)
            .map(Scalar::from)
            .ok_or_else(|| EvalError::UndefinedName(name.clone())),
        Expr::Unary(op, operand) => unary(*op, evaluate(operand, point)?),
        Expr::Binary(op, lhs, rhs) => {
            let l = evaluate(lhs, point)?;
            let r = evaluate(rhs, point)?;
            binary(*op, &l, &r)
        }
        Expr::And(lhs, rhs) => {
            let l = evaluate(lhs, point)?;
            if !l.truthy() {
                return Ok(l);
            }
            evaluate(rhs, point)
        }
        Expr::Or(lhs, rhs) => {
            let l = evaluate(lhs, point)?;
            if l.truthy() {
                return Ok(l);
            }
            evaluate(rhs, point)
        }
        Expr::Compare(first, rest) => {
            let mut left = evaluate(first, point)?;
            for (op, operand) in rest {
                let right = evaluate(operand, point)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Scalar::Bool(false));
                }
                left = right;
            }
            Ok(Scalar::Bool(true))
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| evaluate(a, point))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, values)
        }
    }
}

fn unary(op: UnaryOp, v: Scalar) -> Result<Scalar, EvalError> {
    if op == UnaryOp::Not {
        return Ok(Scalar::Bool(!v.truthy()));
    }
    let n = v.number().ok_or_else(|| {
        EvalError::Type(format!("bad operand type for unary sign: '{}'", v.type_name()))
    })?;
    Ok(match (op, n) {
        (UnaryOp::Neg, Num::Int(i)) => Scalar::Int(
            i.checked_neg()
                .ok_or_else(|| EvalError::Arithmetic("integer overflow".into()))?,
        ),
        (UnaryOp::Neg, Num::Float(f)) => Scalar::Float(-f),
        (_, n) => n.into(),
    })
}

fn binary(op: BinOp, l: &Scalar, r: &Scalar) -> Result<Scalar, EvalError> {
    if let (BinOp::Add, Scalar::Str(a), Scalar::Str(b)) = (op, l, r) {
        return Ok(Scalar::Str(format!("{a}{b}")));
    }
    let (Some(a), Some(b)) = (l.number(), r.number()) else {
        return Err(EvalError::Type(format!(
            "unsupported operand types for {op:?}: '{}' and '{}'",
            l.type_name(),
            r.type_name()
        )));
    };
    let overflow = || EvalError::Arithmetic("integer overflow".into());

    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match op {
            BinOp::Add => x.checked_add(y).map(Scalar::Int).ok_or_else(overflow),
            BinOp::Sub => x.checked_sub(y).map(Scalar::Int).ok_or_else(overflow),
            BinOp::Mul => x.checked_mul(y).map(Scalar::Int).ok_or_else(overflow),
            BinOp::Div => {
                if y == 0 {
                    return Err(division_by_zero());
                }
                Ok(Scalar::Float(x as f64 / y as f64))
            }
            BinOp::FloorDiv => {
                if y == 0 {
                    return Err(division_by_zero());
                }
                let q = x.checked_div(y).ok_or_else(overflow)?;
                // round toward negative infinity
                let q = if (x % y != 0) && ((x < 0) != (y < 0)) { q - 1 } else { q };
                Ok(Scalar::Int(q))
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err(division_by_zero());
                }
                let m = x.checked_rem(y).ok_or_else(overflow)?;
                // result takes the sign of the divisor
                let m = if m != 0 && ((m < 0) != (y < 0)) { m + y } else { m };
                Ok(Scalar::Int(m))
            }
            BinOp::Pow => {
                if y >= 0 {
                    let exp = u32::try_from(y).map_err(|_| overflow())?;
                    x.checked_pow(exp).map(Scalar::Int).ok_or_else(overflow)
                } else {
                    float_op(op, x as f64, y as f64)
                }
            }
        },
        (a, b) => float_op(op, a.as_f64(), b.as_f64()),
    }
}

fn float_op(op: BinOp, x: f64, y: f64) -> Result<Scalar, EvalError> {
    let v = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if y == 0.0 => return Err(division_by_zero()),
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => x - y * (x / y).floor(),
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(EvalError::Arithmetic(
                    "0.0 cannot be raised to a negative power".into(),
                ));
            }
            x.powf(y)
        }
    };
    Ok(Scalar::Float(v))
}

fn division_by_zero() -> EvalError {
    EvalError::Arithmetic("division by zero".into())
}

fn compare(op: CmpOp, l: &Scalar, r: &Scalar) -> Result<bool, EvalError> {
    let ordering = match (l, r) {
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        _ => match (l.number(), r.number()) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            // mixed string/number: only equality is defined
            _ => {
                return match op {
                    CmpOp::Eq => Ok(false),
                    CmpOp::Ne => Ok(true),
                    _ => Err(EvalError::Type(format!(
                        "'{op:?}' not supported between '{}' and '{}'",
                        l.type_name(),
                        r.type_name()
                    ))),
                };
            }
        },
    };

    // NaN compares unequal to everything
    let Some(ord) = ordering else {
        return Ok(op == CmpOp::Ne);
    };
    Ok(match op {
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
    })
}

fn call(name: &str, args: Vec<Scalar>) -> Result<Scalar, EvalError> {
    let arity = |n: usize| -> Result<(), EvalError> {
        if args.len() == n {
            Ok(())
        } else {
            Err(EvalError::Type(format!(
                "{name}() takes {n} argument(s), {} given",
                args.len()
            )))
        }
    };
    let numeric = |v: &Scalar| -> Result<Num, EvalError> {
        v.number().ok_or_else(|| {
            EvalError::Type(format!("{name}() expects a number, got '{}'", v.type_name()))
        })
    };

    match name {
        "abs" => {
            arity(1)?;
            Ok(match numeric(&args[0])? {
                Num::Int(i) => Scalar::Int(
                    i.checked_abs()
                        .ok_or_else(|| EvalError::Arithmetic("integer overflow".into()))?,
                ),
                Num::Float(f) => Scalar::Float(f.abs()),
            })
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(EvalError::Type(format!("{name}() expects at least 1 argument")));
            }
            let want = if name == "min" { CmpOp::Lt } else { CmpOp::Gt };
            let mut best = args[0].clone();
            for candidate in &args[1..] {
                if compare(want, candidate, &best)? {
                    best = candidate.clone();
                }
            }
            Ok(best)
        }
        "int" => {
            arity(1)?;
            match &args[0] {
                Scalar::Str(s) => s.trim().parse::<i64>().map(Scalar::Int).map_err(|_| {
                    EvalError::Type(format!("invalid literal for int(): '{s}'"))
                }),
                other => match numeric(other)? {
                    Num::Int(i) => Ok(Scalar::Int(i)),
                    Num::Float(f) if f.is_finite() => Ok(Scalar::Int(f.trunc() as i64)),
                    Num::Float(f) => Err(EvalError::Arithmetic(format!(
                        "cannot convert {f} to integer"
                    ))),
                },
            }
        }
        "float" => {
            arity(1)?;
            match &args[0] {
                Scalar::Str(s) => s.trim().parse::<f64>().map(Scalar::Float).map_err(|_| {
                    EvalError::Type(format!("could not convert string to float: '{s}'"))
                }),
                other => Ok(Scalar::Float(numeric(other)?.as_f64())),
            }
        }
        "round" => {
            arity(1)?;
            match numeric(&args[0])? {
                Num::Int(i) => Ok(Scalar::Int(i)),
                Num::Float(f) if f.is_finite() => Ok(Scalar::Int(f.round_ties_even() as i64)),
                Num::Float(f) => Err(EvalError::Arithmetic(format!(
                    "cannot round {f} to integer"
                ))),
            }
        }
        _ => Err(EvalError::UndefinedName(name.to_string())),
    }
}
