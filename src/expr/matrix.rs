use std::sync::Arc;

use super::{ScalarExpr, VectorExpr, stack_columns};
use crate::bindings::Bindings;
use crate::geometry::PoolGeometry;
use crate::linalg::Matrix;
use crate::model::{ParameterMatrix, Variable};
use crate::{Error, Result};

/// A matrix-valued expression of fixed shape.
#[derive(Debug, Clone)]
pub struct MatrixExpr {
    rows: usize,
    cols: usize,
    node: Arc<MatrixNode>,
}

#[derive(Debug)]
pub enum MatrixNode {
    Zero,
    Identity,
    Constant(Matrix),
    Parameter(ParameterMatrix),
    Sum(MatrixExpr, MatrixExpr),
    Product(MatrixExpr, MatrixExpr),
    Scale(ScalarExpr, MatrixExpr),
    Transpose(MatrixExpr),
    /// `D(v)`: square, `v` on the diagonal.
    Diagonal(VectorExpr),
    /// 0/1 matrix with a single 1 per row, at the column of that output's tile maximum.
    MaxSelection(VectorExpr, PoolGeometry),
}

impl MatrixExpr {
    fn from_node(rows: usize, cols: usize, node: MatrixNode) -> Self {
        Self {
            rows,
            cols,
            node: Arc::new(node),
        }
    }

    #[inline]
    pub fn node(&self) -> &MatrixNode {
        &self.node
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn zero(rows: usize, cols: usize) -> Self {
        Self::from_node(rows, cols, MatrixNode::Zero)
    }

    pub fn identity(n: usize) -> Self {
        Self::from_node(n, n, MatrixNode::Identity)
    }

    pub fn constant(value: Matrix) -> Self {
        let (rows, cols) = value.shape();
        Self::from_node(rows, cols, MatrixNode::Constant(value))
    }

    pub fn parameter(handle: ParameterMatrix) -> Self {
        Self::from_node(handle.rows(), handle.cols(), MatrixNode::Parameter(handle))
    }

    pub fn sum(a: MatrixExpr, b: MatrixExpr) -> Result<Self> {
        if a.shape() != b.shape() {
            return Err(Error::InvalidShape(format!(
                "sum of {:?} and {:?} matrices",
                a.shape(),
                b.shape()
            )));
        }
        if a.is_zero() {
            return Ok(b);
        }
        if b.is_zero() {
            return Ok(a);
        }
        Ok(Self::from_node(a.rows, a.cols, MatrixNode::Sum(a, b)))
    }

    pub fn product(a: MatrixExpr, b: MatrixExpr) -> Result<Self> {
        if a.cols != b.rows {
            return Err(Error::InvalidShape(format!(
                "cannot multiply {:?} by {:?}",
                a.shape(),
                b.shape()
            )));
        }
        if a.is_zero() || b.is_zero() {
            return Ok(Self::zero(a.rows, b.cols));
        }
        if matches!(a.node(), MatrixNode::Identity) {
            return Ok(b);
        }
        if matches!(b.node(), MatrixNode::Identity) {
            return Ok(a);
        }
        Ok(Self::from_node(a.rows, b.cols, MatrixNode::Product(a, b)))
    }

    pub fn scale(factor: ScalarExpr, m: MatrixExpr) -> Self {
        if factor.is_zero() || m.is_zero() {
            return Self::zero(m.rows, m.cols);
        }
        Self::from_node(m.rows, m.cols, MatrixNode::Scale(factor, m))
    }

    pub fn transpose(m: MatrixExpr) -> Self {
        match m.node() {
            MatrixNode::Zero => Self::zero(m.cols, m.rows),
            MatrixNode::Identity | MatrixNode::Diagonal(_) => m,
            MatrixNode::Transpose(inner) => inner.clone(),
            _ => Self::from_node(m.cols, m.rows, MatrixNode::Transpose(m)),
        }
    }

    pub fn diagonal(v: VectorExpr) -> Self {
        let n = v.len();
        if v.is_zero() {
            return Self::zero(n, n);
        }
        Self::from_node(n, n, MatrixNode::Diagonal(v))
    }

    /// Selection matrix of `max_pool(x, geometry)`, evaluated at the current value of `x`.
    pub fn max_selection(x: VectorExpr, geometry: PoolGeometry) -> Result<Self> {
        if x.len() != geometry.input_len() {
            return Err(Error::InvalidShape(format!(
                "max-pool over {} elements given a vector of len {}",
                geometry.input_len(),
                x.len()
            )));
        }
        Ok(Self::from_node(
            geometry.output_len(),
            geometry.input_len(),
            MatrixNode::MaxSelection(x, geometry),
        ))
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        matches!(*self.node, MatrixNode::Zero)
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<Matrix> {
        Ok(match self.node() {
            MatrixNode::Zero => Matrix::zeros(self.rows, self.cols),
            MatrixNode::Identity => Matrix::identity(self.rows),
            MatrixNode::Constant(m) => m.clone(),
            MatrixNode::Parameter(p) => bindings.matrix(p)?,
            MatrixNode::Sum(a, b) => a.evaluate(bindings)?.add(&b.evaluate(bindings)?),
            MatrixNode::Product(a, b) => match a.node() {
                MatrixNode::Diagonal(d) => b.evaluate(bindings)?.scale_rows(&d.evaluate(bindings)?),
                _ => a.evaluate(bindings)?.matmul(&b.evaluate(bindings)?),
            },
            MatrixNode::Scale(s, m) => m.evaluate(bindings)?.scale(s.evaluate(bindings)?),
            MatrixNode::Transpose(m) => m.evaluate(bindings)?.transpose(),
            MatrixNode::Diagonal(v) => v.evaluate(bindings)?.diagonal(),
            MatrixNode::MaxSelection(x, geometry) => {
                let values = x.evaluate(bindings)?;
                selection_matrix(&geometry.argmax(values.as_slice()), geometry.input_len())
            }
        })
    }

    pub fn partial_derivative(&self, variable: Variable) -> Result<MatrixExpr> {
        match self.node() {
            // The selection matrix is piecewise constant in `x`.
            MatrixNode::Zero
            | MatrixNode::Identity
            | MatrixNode::Constant(_)
            | MatrixNode::MaxSelection(..) => Ok(Self::zero(self.rows, self.cols)),
            MatrixNode::Parameter(p) => Ok(match p.position_of(variable) {
                Some((r, c)) => Self::constant(Matrix::basis(self.rows, self.cols, r, c)),
                None => Self::zero(self.rows, self.cols),
            }),
            MatrixNode::Sum(a, b) => Self::sum(
                a.partial_derivative(variable)?,
                b.partial_derivative(variable)?,
            ),
            MatrixNode::Product(a, b) => Self::sum(
                Self::product(a.partial_derivative(variable)?, b.clone())?,
                Self::product(a.clone(), b.partial_derivative(variable)?)?,
            ),
            MatrixNode::Scale(s, m) => Self::sum(
                Self::scale(s.partial_derivative(variable)?, m.clone()),
                Self::scale(s.clone(), m.partial_derivative(variable)?),
            ),
            MatrixNode::Transpose(m) => Ok(Self::transpose(m.partial_derivative(variable)?)),
            MatrixNode::Diagonal(v) => Ok(Self::diagonal(v.partial_derivative(variable)?)),
        }
    }

    /// The `(rows * cols) x variables.len()` Jacobian; each column is a partial derivative
    /// flattened row-major.
    pub fn derivative(&self, variables: &[Variable], bindings: &Bindings) -> Result<Matrix> {
        stack_columns(self.rows * self.cols, variables, |v| {
            Ok(self.partial_derivative(v)?.evaluate(bindings)?.to_vector())
        })
    }
}

/// One row per output with a 1 in the column of its source element.
pub(crate) fn selection_matrix(sources: &[usize], input_len: usize) -> Matrix {
    let mut m = Matrix::zeros(sources.len(), input_len);
    for (row, &col) in sources.iter().enumerate() {
        m[(row, col)] = 1.0;
    }
    m
}
