use std::sync::Arc;

use super::{VectorExpr, stack_columns};
use crate::activation::ScalarFunction;
use crate::bindings::Bindings;
use crate::linalg::{Matrix, Vector};
use crate::model::Variable;
use crate::{Error, Result};

/// A scalar-valued expression.
#[derive(Debug, Clone)]
pub struct ScalarExpr {
    node: Arc<ScalarNode>,
}

#[derive(Debug)]
pub enum ScalarNode {
    Zero,
    Constant(f64),
    Parameter(Variable),
    Sum(ScalarExpr, ScalarExpr),
    Product(ScalarExpr, ScalarExpr),
    Dot(VectorExpr, VectorExpr),
    Apply(ScalarFunction, ScalarExpr),
    Component(VectorExpr, usize),
}

impl ScalarExpr {
    fn from_node(node: ScalarNode) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    #[inline]
    pub fn node(&self) -> &ScalarNode {
        &self.node
    }

    pub fn zero() -> Self {
        Self::from_node(ScalarNode::Zero)
    }

    pub fn constant(value: f64) -> Self {
        Self::from_node(ScalarNode::Constant(value))
    }

    pub fn parameter(variable: Variable) -> Self {
        Self::from_node(ScalarNode::Parameter(variable))
    }

    pub fn sum(a: ScalarExpr, b: ScalarExpr) -> Self {
        if a.is_zero() {
            return b;
        }
        if b.is_zero() {
            return a;
        }
        Self::from_node(ScalarNode::Sum(a, b))
    }

    pub fn difference(a: ScalarExpr, b: ScalarExpr) -> Self {
        Self::sum(a, b.neg())
    }

    pub fn neg(self) -> Self {
        Self::product(Self::constant(-1.0), self)
    }

    pub fn product(a: ScalarExpr, b: ScalarExpr) -> Self {
        if a.is_zero() || b.is_zero() {
            return Self::zero();
        }
        if a.is_one() {
            return b;
        }
        if b.is_one() {
            return a;
        }
        Self::from_node(ScalarNode::Product(a, b))
    }

    pub fn dot(l: VectorExpr, r: VectorExpr) -> Result<Self> {
        if l.len() != r.len() {
            return Err(Error::InvalidShape(format!(
                "dot product of vectors with len {} and {}",
                l.len(),
                r.len()
            )));
        }
        if l.is_zero() || r.is_zero() {
            return Ok(Self::zero());
        }
        Ok(Self::from_node(ScalarNode::Dot(l, r)))
    }

    pub fn apply(f: impl Into<ScalarFunction>, x: ScalarExpr) -> Self {
        let f = f.into();
        if f.is_zero() {
            return Self::zero();
        }
        if f.is_identity() {
            return x;
        }
        Self::from_node(ScalarNode::Apply(f, x))
    }

    pub fn component(v: VectorExpr, index: usize) -> Result<Self> {
        if index >= v.len() {
            return Err(Error::InvalidShape(format!(
                "component {index} of a vector with len {}",
                v.len()
            )));
        }
        if v.is_zero() {
            return Ok(Self::zero());
        }
        Ok(Self::from_node(ScalarNode::Component(v, index)))
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        matches!(*self.node, ScalarNode::Zero)
    }

    #[inline]
    fn is_one(&self) -> bool {
        matches!(*self.node, ScalarNode::Constant(c) if c == 1.0)
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<f64> {
        Ok(match self.node() {
            ScalarNode::Zero => 0.0,
            ScalarNode::Constant(c) => *c,
            ScalarNode::Parameter(v) => bindings.get(*v)?,
            ScalarNode::Sum(a, b) => a.evaluate(bindings)? + b.evaluate(bindings)?,
            ScalarNode::Product(a, b) => a.evaluate(bindings)? * b.evaluate(bindings)?,
            ScalarNode::Dot(l, r) => l.evaluate(bindings)?.dot(&r.evaluate(bindings)?),
            ScalarNode::Apply(f, x) => f.eval(x.evaluate(bindings)?),
            ScalarNode::Component(v, i) => v.evaluate(bindings)?[*i],
        })
    }

    pub fn partial_derivative(&self, variable: Variable) -> Result<ScalarExpr> {
        Ok(match self.node() {
            ScalarNode::Zero | ScalarNode::Constant(_) => Self::zero(),
            ScalarNode::Parameter(v) => {
                if *v == variable {
                    Self::constant(1.0)
                } else {
                    Self::zero()
                }
            }
            ScalarNode::Sum(a, b) => Self::sum(
                a.partial_derivative(variable)?,
                b.partial_derivative(variable)?,
            ),
            ScalarNode::Product(a, b) => Self::sum(
                Self::product(a.partial_derivative(variable)?, b.clone()),
                Self::product(a.clone(), b.partial_derivative(variable)?),
            ),
            ScalarNode::Dot(l, r) => Self::sum(
                Self::dot(l.partial_derivative(variable)?, r.clone())?,
                Self::dot(l.clone(), r.partial_derivative(variable)?)?,
            ),
            ScalarNode::Apply(f, x) => {
                let dx = x.partial_derivative(variable)?;
                if dx.is_zero() {
                    return Ok(Self::zero());
                }
                Self::product(Self::apply(f.derivative()?, x.clone()), dx)
            }
            ScalarNode::Component(v, i) => Self::component(v.partial_derivative(variable)?, *i)?,
        })
    }

    /// The `1 x variables.len()` gradient row, one partial derivative per column.
    pub fn derivative(&self, variables: &[Variable], bindings: &Bindings) -> Result<Matrix> {
        stack_columns(1, variables, |v| {
            let value = self.partial_derivative(v)?.evaluate(bindings)?;
            Ok(Vector::from(vec![value]))
        })
    }
}
