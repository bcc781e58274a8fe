//! Parameter index space.
//!
//! A [`ParameterModel`] hands out non-overlapping, contiguous runs of global parameter
//! indices. Each allocation returns an immutable handle that knows its own shape and how to
//! map a global index back to a position inside it. Allocation order defines index order and
//! nothing else.
//!
//! The model is an explicit object threaded through network construction. Once construction
//! is done it is only read (to size [`Bindings`]), so it can be shared freely.

use std::fmt;

use crate::bindings::Bindings;
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single trainable scalar, identified by its global index.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(usize);

impl Variable {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter #{}", self.0)
    }
}

/// A contiguous run of parameters read as a vector.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterVector {
    start: usize,
    len: usize,
}

impl ParameterVector {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The variable at `offset`. Panics if `offset >= len`.
    #[inline]
    pub fn variable(&self, offset: usize) -> Variable {
        assert!(
            offset < self.len,
            "offset {offset} out of range for parameter vector of len {}",
            self.len
        );
        Variable(self.start + offset)
    }

    #[inline]
    pub fn contains(&self, variable: Variable) -> bool {
        (self.start..self.start + self.len).contains(&variable.0)
    }

    /// Map a global variable back to its offset inside this vector.
    #[inline]
    pub fn offset_of(&self, variable: Variable) -> Option<usize> {
        self.contains(variable).then(|| variable.0 - self.start)
    }

    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        (self.start..self.start + self.len).map(Variable)
    }
}

/// A contiguous run of parameters read as a row-major `rows x cols` matrix.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterMatrix {
    start: usize,
    rows: usize,
    cols: usize,
}

impl ParameterMatrix {
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The variable at `(row, col)`. Panics if out of range.
    #[inline]
    pub fn variable(&self, row: usize, col: usize) -> Variable {
        assert!(
            row < self.rows && col < self.cols,
            "({row}, {col}) out of range for {} x {} parameter matrix",
            self.rows,
            self.cols
        );
        Variable(self.start + row * self.cols + col)
    }

    #[inline]
    pub fn contains(&self, variable: Variable) -> bool {
        (self.start..self.start + self.len()).contains(&variable.0)
    }

    /// Map a global variable back to its `(row, col)` position inside this matrix.
    #[inline]
    pub fn position_of(&self, variable: Variable) -> Option<(usize, usize)> {
        self.contains(variable).then(|| {
            let offset = variable.0 - self.start;
            (offset / self.cols, offset % self.cols)
        })
    }

    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        (self.start..self.start + self.len()).map(Variable)
    }
}

/// Allocator for the flat parameter index space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterModel {
    size: usize,
}

impl ParameterModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of allocated parameters; the dimensionality of the training problem.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn allocate_scalar(&mut self) -> Variable {
        let v = Variable(self.size);
        self.size += 1;
        v
    }

    pub fn allocate_vector(&mut self, len: usize) -> Result<ParameterVector> {
        if len == 0 {
            return Err(Error::InvalidConfig(
                "parameter vector len must be > 0".to_owned(),
            ));
        }
        let start = self.reserve(len)?;
        Ok(ParameterVector { start, len })
    }

    pub fn allocate_matrix(&mut self, rows: usize, cols: usize) -> Result<ParameterMatrix> {
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidConfig(format!(
                "parameter matrix dims must be > 0, got {rows} x {cols}"
            )));
        }
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::InvalidConfig("parameter matrix shape overflow".to_owned()))?;
        let start = self.reserve(len)?;
        Ok(ParameterMatrix { start, rows, cols })
    }

    /// Zero-initialized bindings sized exactly to this model.
    pub fn create_bindings(&self) -> Bindings {
        Bindings::zeros(self.size)
    }

    fn reserve(&mut self, len: usize) -> Result<usize> {
        let start = self.size;
        self.size = start
            .checked_add(len)
            .ok_or_else(|| Error::InvalidConfig("parameter index space overflow".to_owned()))?;
        Ok(start)
    }
}
