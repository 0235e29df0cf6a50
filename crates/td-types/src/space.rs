//! Space definitions and the normalized <-> original coordinate transform.

use serde::{Deserialize, Serialize};

use crate::errors::TdResult;
use crate::validation_error;
use crate::value::{Point, Value};

/// A single named dimension of an input or parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Field name the objective and constraints refer to (e.g. "Px").
    pub name: String,
    /// The kind of range.
    pub kind: DimensionKind,
}

/// Describes the original-unit range of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DimensionKind {
    /// Continuous range [low, high].
    Real { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    Integer { low: i64, high: i64 },
    /// Categorical choices, addressed by name.
    Categorical { categories: Vec<String> },
}

/// An ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Space {
    pub dimensions: Vec<Dimension>,
}

impl Space {
    pub fn new() -> Self {
        Self {
            dimensions: Vec::new(),
        }
    }

    pub fn add_real(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Real { low, high },
        });
        self
    }

    pub fn add_integer(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Integer { low, high },
        });
        self
    }

    pub fn add_categorical<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        categories: impl IntoIterator<Item = S>,
    ) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Categorical {
                categories: categories.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.name.as_str())
    }

    /// Map a normalized vector in `[0, 1]^d` to original units.
    pub fn inverse_transform(&self, normalized: &[f64]) -> TdResult<Vec<Value>> {
        self.check_len(normalized.len())?;
        self.dimensions
            .iter()
            .zip(normalized)
            .map(|(dim, &u)| dim.denormalize(u))
            .collect()
    }

    /// Map original-unit values to the normalized space.
    pub fn transform(&self, values: &[Value]) -> TdResult<Vec<f64>> {
        self.check_len(values.len())?;
        self.dimensions
            .iter()
            .zip(values)
            .map(|(dim, v)| dim.normalize(v))
            .collect()
    }

    /// Denormalize and key the result by dimension name.
    pub fn to_point(&self, normalized: &[f64]) -> TdResult<Point> {
        let values = self.inverse_transform(normalized)?;
        Ok(self
            .dimensions
            .iter()
            .map(|d| d.name.clone())
            .zip(values)
            .collect())
    }

    fn check_len(&self, len: usize) -> TdResult<()> {
        if len != self.dimensions.len() {
            return Err(validation_error!(
                "expected {} coordinates, got {}",
                self.dimensions.len(),
                len
            ));
        }
        Ok(())
    }
}

impl Dimension {
    fn denormalize(&self, u: f64) -> TdResult<Value> {
        if !u.is_finite() {
            return Err(validation_error!(
                "non-finite coordinate {u} for dimension '{}'",
                self.name
            ));
        }
        let u = u.clamp(0.0, 1.0);
        let value = match &self.kind {
            DimensionKind::Real { low, high } => Value::Float(low + u * (high - low)),
            DimensionKind::Integer { low, high } => {
                let span = (high - low) as f64;
                let v = (*low as f64 + u * span).round() as i64;
                Value::Int(v.clamp(*low, *high))
            }
            DimensionKind::Categorical { categories } => {
                if categories.is_empty() {
                    return Err(validation_error!(
                        "categorical dimension '{}' has no categories",
                        self.name
                    ));
                }
                let k = categories.len();
                let idx = ((u * k as f64).floor() as usize).min(k - 1);
                Value::Str(categories[idx].clone())
            }
        };
        Ok(value)
    }

    fn normalize(&self, value: &Value) -> TdResult<f64> {
        match (&self.kind, value) {
            (DimensionKind::Categorical { categories }, Value::Str(s)) => {
                let idx = categories.iter().position(|c| c == s).ok_or_else(|| {
                    validation_error!("'{s}' is not a category of dimension '{}'", self.name)
                })?;
                Ok((idx as f64 + 0.5) / categories.len() as f64)
            }
            (DimensionKind::Real { low, high }, v) => {
                let x = self.numeric(v)?;
                Ok(unit(x, *low, *high))
            }
            (DimensionKind::Integer { low, high }, v) => {
                let x = self.numeric(v)?;
                Ok(unit(x, *low as f64, *high as f64))
            }
            (DimensionKind::Categorical { .. }, other) => Err(validation_error!(
                "dimension '{}' expects a category name, got {}",
                self.name,
                other.type_name()
            )),
        }
    }

    fn numeric(&self, v: &Value) -> TdResult<f64> {
        v.as_f64().ok_or_else(|| {
            validation_error!(
                "dimension '{}' expects a number, got {}",
                self.name,
                v.type_name()
            )
        })
    }
}

fn unit(x: f64, low: f64, high: f64) -> f64 {
    if high == low {
        0.0
    } else {
        (x - low) / (high - low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> Space {
        Space::new()
            .add_integer("Px", 1, 8)
            .add_real("tol", 0.0, 2.0)
            .add_categorical("relax_type", ["0", "6", "18"])
    }

    #[test]
    fn inverse_transform_maps_each_kind() {
        let space = sample_space();
        let values = space.inverse_transform(&[1.0, 0.25, 0.5]).unwrap();
        assert_eq!(
            values,
            vec![Value::Int(8), Value::Float(0.5), Value::Str("6".into())]
        );

        let low = space.inverse_transform(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(low[0], Value::Int(1));
        assert_eq!(low[2], Value::Str("0".into()));

        // u = 1.0 lands in the last category, not past it
        let high = space.inverse_transform(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(high[2], Value::Str("18".into()));
    }

    #[test]
    fn transform_recovers_original_values() {
        let space = sample_space();
        let original = vec![Value::Int(5), Value::Float(1.5), Value::Str("18".into())];
        let normalized = space.transform(&original).unwrap();
        assert_eq!(space.inverse_transform(&normalized).unwrap(), original);
    }

    #[test]
    fn to_point_keys_by_name() {
        let space = sample_space();
        let point = space.to_point(&[0.0, 1.0, 0.0]).unwrap();
        assert_eq!(point.get("Px"), Some(&Value::Int(1)));
        assert_eq!(point.get("tol"), Some(&Value::Float(2.0)));
        assert_eq!(point.get("relax_type"), Some(&Value::Str("0".into())));
    }

    #[test]
    fn coordinate_count_mismatch_is_rejected() {
        let space = sample_space();
        assert!(space.inverse_transform(&[0.5]).is_err());
        assert!(space.transform(&[]).is_err());
    }

    #[test]
    fn unknown_category_is_rejected() {
        let space = Space::new().add_categorical("c", ["a", "b"]);
        assert!(space.transform(&[Value::Str("z".into())]).is_err());
        assert!(space.transform(&[Value::Int(1)]).is_err());
    }

    #[test]
    fn non_finite_coordinate_is_rejected() {
        let space = Space::new().add_real("x", 0.0, 1.0);
        assert!(space.inverse_transform(&[f64::NAN]).is_err());
    }
}
