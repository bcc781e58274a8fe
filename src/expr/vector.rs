use std::sync::Arc;

use super::{MatrixExpr, MatrixNode, ScalarExpr, stack_columns};
use crate::activation::ScalarFunction;
use crate::bindings::Bindings;
use crate::geometry::PoolGeometry;
use crate::linalg::{Matrix, Vector};
use crate::model::{ParameterVector, Variable};
use crate::{Error, Result};

/// A vector-valued expression of fixed length.
#[derive(Debug, Clone)]
pub struct VectorExpr {
    len: usize,
    node: Arc<VectorNode>,
}

#[derive(Debug)]
pub enum VectorNode {
    Zero,
    Constant(Vector),
    Parameter(ParameterVector),
    Sum(VectorExpr, VectorExpr),
    Scale(ScalarExpr, VectorExpr),
    MatVec(MatrixExpr, VectorExpr),
    Apply(ScalarFunction, VectorExpr),
    Concat(Vec<VectorExpr>),
    /// `len` elements of `source` starting at `offset`; positions past the end read as 0.
    ///
    /// Covers slicing, truncation and zero-padding.
    Window {
        source: VectorExpr,
        offset: usize,
    },
    MaxPool(VectorExpr, PoolGeometry),
}

impl VectorExpr {
    fn from_node(len: usize, node: VectorNode) -> Self {
        Self {
            len,
            node: Arc::new(node),
        }
    }

    #[inline]
    pub fn node(&self) -> &VectorNode {
        &self.node
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn zero(len: usize) -> Self {
        Self::from_node(len, VectorNode::Zero)
    }

    pub fn constant(value: impl Into<Vector>) -> Self {
        let value = value.into();
        Self::from_node(value.len(), VectorNode::Constant(value))
    }

    pub fn parameter(handle: ParameterVector) -> Self {
        Self::from_node(handle.len(), VectorNode::Parameter(handle))
    }

    pub fn sum(a: VectorExpr, b: VectorExpr) -> Result<Self> {
        if a.len != b.len {
            return Err(Error::InvalidShape(format!(
                "sum of vectors with len {} and {}",
                a.len, b.len
            )));
        }
        if a.is_zero() {
            return Ok(b);
        }
        if b.is_zero() {
            return Ok(a);
        }
        Ok(Self::from_node(a.len, VectorNode::Sum(a, b)))
    }

    pub fn difference(a: VectorExpr, b: VectorExpr) -> Result<Self> {
        Self::sum(a, b.neg())
    }

    pub fn neg(self) -> Self {
        Self::scale(ScalarExpr::constant(-1.0), self)
    }

    pub fn scale(factor: ScalarExpr, x: VectorExpr) -> Self {
        if factor.is_zero() || x.is_zero() {
            return Self::zero(x.len);
        }
        Self::from_node(x.len, VectorNode::Scale(factor, x))
    }

    pub fn mat_vec(m: MatrixExpr, x: VectorExpr) -> Result<Self> {
        if m.cols() != x.len {
            return Err(Error::InvalidShape(format!(
                "cannot multiply a {} x {} matrix by a vector of len {}",
                m.rows(),
                m.cols(),
                x.len
            )));
        }
        if m.is_zero() || x.is_zero() {
            return Ok(Self::zero(m.rows()));
        }
        if matches!(m.node(), MatrixNode::Identity) {
            return Ok(x);
        }
        Ok(Self::from_node(m.rows(), VectorNode::MatVec(m, x)))
    }

    /// Element-wise application. The elementwise product `x ∘ y` is `mat_vec(diagonal(x), y)`.
    pub fn apply(f: impl Into<ScalarFunction>, x: VectorExpr) -> Self {
        let f = f.into();
        if f.is_zero() {
            return Self::zero(x.len);
        }
        if f.is_identity() {
            return x;
        }
        Self::from_node(x.len, VectorNode::Apply(f, x))
    }

    pub fn concat(parts: Vec<VectorExpr>) -> Result<Self> {
        if parts.is_empty() {
            return Err(Error::InvalidShape("concat of no vectors".to_owned()));
        }
        let len = parts.iter().map(VectorExpr::len).sum();
        if parts.iter().all(VectorExpr::is_zero) {
            return Ok(Self::zero(len));
        }
        Ok(Self::from_node(len, VectorNode::Concat(parts)))
    }

    /// `len` elements of `source` starting at `offset`, zero-filled past its end.
    pub fn window(source: VectorExpr, offset: usize, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidShape("window of len 0".to_owned()));
        }
        if source.is_zero() || offset >= source.len {
            return Ok(Self::zero(len));
        }
        if offset == 0 && len == source.len {
            return Ok(source);
        }
        Ok(Self::from_node(len, VectorNode::Window { source, offset }))
    }

    /// Truncate or zero-pad to `len`.
    pub fn resize(source: VectorExpr, len: usize) -> Result<Self> {
        Self::window(source, 0, len)
    }

    pub fn max_pool(x: VectorExpr, geometry: PoolGeometry) -> Result<Self> {
        if x.len != geometry.input_len() {
            return Err(Error::InvalidShape(format!(
                "max-pool over {} elements given a vector of len {}",
                geometry.input_len(),
                x.len
            )));
        }
        if x.is_zero() {
            return Ok(Self::zero(geometry.output_len()));
        }
        Ok(Self::from_node(
            geometry.output_len(),
            VectorNode::MaxPool(x, geometry),
        ))
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        matches!(*self.node, VectorNode::Zero)
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<Vector> {
        Ok(match self.node() {
            VectorNode::Zero => Vector::zeros(self.len),
            VectorNode::Constant(v) => v.clone(),
            VectorNode::Parameter(p) => bindings.vector(p)?,
            VectorNode::Sum(a, b) => a.evaluate(bindings)?.add(&b.evaluate(bindings)?),
            VectorNode::Scale(s, x) => x.evaluate(bindings)?.scale(s.evaluate(bindings)?),
            VectorNode::MatVec(m, x) => match m.node() {
                // D(d) · x without materializing the diagonal.
                MatrixNode::Diagonal(d) => d.evaluate(bindings)?.hadamard(&x.evaluate(bindings)?),
                _ => m.evaluate(bindings)?.mat_vec(&x.evaluate(bindings)?),
            },
            VectorNode::Apply(f, x) => x.evaluate(bindings)?.map(|v| f.eval(v)),
            VectorNode::Concat(parts) => {
                let mut out = Vec::with_capacity(self.len);
                for part in parts {
                    out.extend_from_slice(part.evaluate(bindings)?.as_slice());
                }
                Vector::from(out)
            }
            VectorNode::Window { source, offset } => {
                let src = source.evaluate(bindings)?;
                (0..self.len)
                    .map(|i| src.as_slice().get(offset + i).copied().unwrap_or(0.0))
                    .collect()
            }
            VectorNode::MaxPool(x, geometry) => {
                let values = x.evaluate(bindings)?;
                geometry
                    .argmax(values.as_slice())
                    .into_iter()
                    .map(|i| values[i])
                    .collect()
            }
        })
    }

    pub fn partial_derivative(&self, variable: Variable) -> Result<VectorExpr> {
        match self.node() {
            VectorNode::Zero | VectorNode::Constant(_) => Ok(Self::zero(self.len)),
            VectorNode::Parameter(p) => Ok(match p.offset_of(variable) {
                Some(offset) => Self::constant(Vector::basis(self.len, offset)),
                None => Self::zero(self.len),
            }),
            VectorNode::Sum(a, b) => Self::sum(
                a.partial_derivative(variable)?,
                b.partial_derivative(variable)?,
            ),
            VectorNode::Scale(s, x) => Self::sum(
                Self::scale(s.partial_derivative(variable)?, x.clone()),
                Self::scale(s.clone(), x.partial_derivative(variable)?),
            ),
            VectorNode::MatVec(m, x) => Self::sum(
                Self::mat_vec(m.partial_derivative(variable)?, x.clone())?,
                Self::mat_vec(m.clone(), x.partial_derivative(variable)?)?,
            ),
            VectorNode::Apply(f, x) => {
                let dx = x.partial_derivative(variable)?;
                if dx.is_zero() {
                    return Ok(Self::zero(self.len));
                }
                let slope = Self::apply(f.derivative()?, x.clone());
                Self::mat_vec(MatrixExpr::diagonal(slope), dx)
            }
            VectorNode::Concat(parts) => Self::concat(
                parts
                    .iter()
                    .map(|p| p.partial_derivative(variable))
                    .collect::<Result<Vec<_>>>()?,
            ),
            VectorNode::Window { source, offset } => {
                Self::window(source.partial_derivative(variable)?, *offset, self.len)
            }
            VectorNode::MaxPool(x, geometry) => {
                let dx = x.partial_derivative(variable)?;
                if dx.is_zero() {
                    return Ok(Self::zero(self.len));
                }
                Self::mat_vec(MatrixExpr::max_selection(x.clone(), *geometry)?, dx)
            }
        }
    }

    /// The `len x variables.len()` Jacobian, one partial derivative per column.
    pub fn derivative(&self, variables: &[Variable], bindings: &Bindings) -> Result<Matrix> {
        stack_columns(self.len, variables, |v| {
            self.partial_derivative(v)?.evaluate(bindings)
        })
    }
}
