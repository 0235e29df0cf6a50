//! Objective results for one batch.

use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, TdResult};
use crate::value::Value;

/// Objective outputs for a batch: one row per configuration, in batch
/// order, one column per objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl ResultMatrix {
    /// Coerce raw per-configuration outputs into a `rows x cols` matrix.
    ///
    /// Every output must carry exactly `cols` numeric values.
    pub fn from_outputs(outputs: &[Vec<Value>], cols: usize) -> TdResult<Self> {
        let mut data = Vec::with_capacity(outputs.len() * cols);
        for (id, output) in outputs.iter().enumerate() {
            if output.len() != cols {
                return Err(DispatchError::ResultShape {
                    message: format!(
                        "configuration {id} returned {} values, expected {cols}",
                        output.len()
                    ),
                }
                .into());
            }
            for value in output {
                let x = value.as_f64().ok_or_else(|| DispatchError::ResultShape {
                    message: format!("configuration {id} returned non-numeric value {value}"),
                })?;
                data.push(x);
            }
        }
        Ok(Self {
            rows: outputs.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> Option<&[f64]> {
        if i >= self.rows {
            return None;
        }
        Some(&self.data[i * self.cols..(i + 1) * self.cols])
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if j >= self.cols {
            return None;
        }
        self.row(i).map(|r| r[j])
    }

    pub fn rows_iter(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).map(move |i| &self.data[i * self.cols..(i + 1) * self.cols])
    }

    /// Row-major backing storage.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows_iter().map(<[f64]>::to_vec).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TdError;

    #[test]
    fn mixed_numeric_types_become_f64() {
        let outputs = vec![
            vec![Value::Int(1), Value::Float(0.5)],
            vec![Value::Float(2.25), Value::Int(-3)],
        ];
        let m = ResultMatrix::from_outputs(&outputs, 2).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 2);
        assert_eq!(m.row(0), Some(&[1.0, 0.5][..]));
        assert_eq!(m.get(1, 1), Some(-3.0));
        assert_eq!(m.get(2, 0), None);
        assert_eq!(m.to_rows(), vec![vec![1.0, 0.5], vec![2.25, -3.0]]);
    }

    #[test]
    fn wrong_column_count_is_rejected() {
        let outputs = vec![vec![Value::Int(1)], vec![Value::Int(1), Value::Int(2)]];
        let err = ResultMatrix::from_outputs(&outputs, 1).unwrap_err();
        assert!(matches!(
            err,
            TdError::Dispatch(DispatchError::ResultShape { .. })
        ));
        assert!(err.to_string().contains("configuration 1"));
    }

    #[test]
    fn strings_are_not_coerced() {
        let outputs = vec![vec![Value::Str("fast".into())]];
        assert!(ResultMatrix::from_outputs(&outputs, 1).is_err());
    }

    #[test]
    fn empty_batch_gives_empty_matrix() {
        let m = ResultMatrix::from_outputs(&[], 3).unwrap();
        assert_eq!(m.rows(), 0);
        assert_eq!(m.rows_iter().count(), 0);
    }
}
