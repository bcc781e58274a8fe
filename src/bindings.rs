//! Parameter values.
//!
//! [`Bindings`] is a dense `f64` arena addressed by [`Variable`] handles. It is owned by the
//! computation that is currently running (a training step, a test) and mutated in place by
//! whoever updates parameters. Clone it to give each concurrent pass its own copy.

use crate::linalg::{Matrix, Vector};
use crate::model::{ParameterMatrix, ParameterModel, ParameterVector, Variable};
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Bindings {
    values: Vec<f64>,
}

impl Bindings {
    pub(crate) fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    /// Wrap existing values (e.g. restored from disk) for `model`.
    pub fn from_values(model: &ParameterModel, values: Vec<f64>) -> Result<Self> {
        if values.len() != model.size() {
            return Err(Error::InvalidData(format!(
                "bindings have {} values but the model allocates {} parameters",
                values.len(),
                model.size()
            )));
        }
        Ok(Self { values })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, variable: Variable) -> Result<f64> {
        self.values
            .get(variable.index())
            .copied()
            .ok_or(Error::IndexOutOfRange {
                index: variable.index(),
                size: self.values.len(),
            })
    }

    #[inline]
    pub fn put(&mut self, variable: Variable, value: f64) -> Result<()> {
        let size = self.values.len();
        let slot = self
            .values
            .get_mut(variable.index())
            .ok_or(Error::IndexOutOfRange {
                index: variable.index(),
                size,
            })?;
        *slot = value;
        Ok(())
    }

    pub fn vector(&self, handle: &ParameterVector) -> Result<Vector> {
        handle.variables().map(|v| self.get(v)).collect()
    }

    pub fn matrix(&self, handle: &ParameterMatrix) -> Result<Matrix> {
        let data = handle
            .variables()
            .map(|v| self.get(v))
            .collect::<Result<Vec<_>>>()?;
        Ok(Matrix::from_vec(handle.rows(), handle.cols(), data))
    }

    pub fn put_vector(&mut self, handle: &ParameterVector, values: &Vector) -> Result<()> {
        if values.len() != handle.len() {
            return Err(Error::InvalidShape(format!(
                "vector of len {} does not fit parameter vector of len {}",
                values.len(),
                handle.len()
            )));
        }
        for (offset, &value) in values.iter().enumerate() {
            self.put(handle.variable(offset), value)?;
        }
        Ok(())
    }

    pub fn put_matrix(&mut self, handle: &ParameterMatrix, values: &Matrix) -> Result<()> {
        if values.shape() != (handle.rows(), handle.cols()) {
            return Err(Error::InvalidShape(format!(
                "{:?} matrix does not fit {} x {} parameter matrix",
                values.shape(),
                handle.rows(),
                handle.cols()
            )));
        }
        for row in 0..handle.rows() {
            for col in 0..handle.cols() {
                self.put(handle.variable(row, col), values[(row, col)])?;
            }
        }
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Raw mutable access for optimizers that update every parameter at once.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }
}
