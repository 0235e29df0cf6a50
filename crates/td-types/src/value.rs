//! Field values shared by configurations, tasks and objective outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A concrete field value in original (denormalized) units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Numeric view of the value; strings have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Named field values handed to objectives and constraints.
///
/// Ordered by field name so that serialized points are stable across runs.
pub type Point = BTreeMap<String, Value>;

/// Build a [`Point`] from `name => value` pairs.
#[macro_export]
macro_rules! point {
    () => { $crate::Point::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut point = $crate::Point::new();
        $( point.insert($name.to_string(), $crate::Value::from($value)); )+
        point
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_deserialization_prefers_int() {
        let values: Vec<Value> = serde_json::from_str(r#"[3, 3.5, "x", 4.0]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Int(3),
                Value::Float(3.5),
                Value::Str("x".into()),
                Value::Float(4.0)
            ]
        );
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert_eq!(Value::from(2.5f32).as_f64(), Some(2.5));
        assert_eq!(Value::from("abc").as_f64(), None);
    }

    #[test]
    fn point_macro_orders_fields() {
        let p = point! { "y" => 2, "x" => 1.5 };
        let keys: Vec<&str> = p.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["x", "y"]);
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"{"x":1.5,"y":2}"#);
    }
}
