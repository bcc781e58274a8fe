//! Network layers.
//!
//! Every layer knows only its own local derivatives: the Jacobian of its output with respect
//! to its input, and the column for one of its own parameters. Chaining them is the job of
//! [`crate::network::FeedForwardNetwork`].
//!
//! # Caching protocol
//!
//! `evaluate` returns the output together with a cache. The derivative methods must be called
//! with the same input and that cache, after `evaluate`, within the same pass. Cache fields
//! that only derivatives need start out absent and are filled on first use, which is why the
//! derivative methods take the cache by `&mut`.

mod convolution;
mod fully_connected;
mod max_pool;

pub use convolution::{Convolution, ConvolutionCache, Filter};
pub use fully_connected::{FullyConnected, FullyConnectedCache};
pub use max_pool::{MaxPool, MaxPoolCache};

use crate::bindings::Bindings;
use crate::expr::VectorExpr;
use crate::linalg::{Matrix, Vector};
use crate::model::Variable;
use crate::{Error, Result};

/// The single-step reverse-mode contract every layer implements.
pub trait LayerOps {
    type Cache;

    fn input_len(&self) -> usize;

    fn output_len(&self) -> usize;

    /// Owned variables, in allocation order.
    fn variables(&self) -> Vec<Variable>;

    fn contains_variable(&self, variable: Variable) -> bool;

    fn evaluate(&self, input: &Vector, bindings: &Bindings) -> Result<(Vector, Self::Cache)>;

    /// `output_len x input_len` Jacobian at the cached evaluation point.
    fn derivative_wrt_input(
        &self,
        input: &Vector,
        cache: &mut Self::Cache,
        bindings: &Bindings,
    ) -> Result<Matrix>;

    /// Derivative of the output with respect to one owned variable.
    fn derivative_wrt_parameter(
        &self,
        input: &Vector,
        variable: Variable,
        cache: &mut Self::Cache,
        bindings: &Bindings,
    ) -> Result<Vector>;

    /// The cached forward result.
    fn evaluation<'a>(&self, cache: &'a Self::Cache) -> &'a Vector;

    /// This layer's computation applied to `input`, as an expression.
    fn expression(&self, input: VectorExpr) -> Result<VectorExpr>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    FullyConnected(FullyConnected),
    Convolution(Convolution),
    MaxPool(MaxPool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerCache {
    FullyConnected(FullyConnectedCache),
    Convolution(ConvolutionCache),
    MaxPool(MaxPoolCache),
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::FullyConnected(_) => "fully-connected",
            Layer::Convolution(_) => "convolution",
            Layer::MaxPool(_) => "max-pool",
        }
    }
}

impl From<FullyConnected> for Layer {
    fn from(value: FullyConnected) -> Self {
        Layer::FullyConnected(value)
    }
}

impl From<Convolution> for Layer {
    fn from(value: Convolution) -> Self {
        Layer::Convolution(value)
    }
}

impl From<MaxPool> for Layer {
    fn from(value: MaxPool) -> Self {
        Layer::MaxPool(value)
    }
}

/// Evaluates `$body` with `$l` bound to the concrete layer and `$c` to its cache.
macro_rules! dispatch {
    ($self:ident, $cache:ident, |$l:ident, $c:ident| $body:expr) => {
        match ($self, $cache) {
            (Layer::FullyConnected($l), LayerCache::FullyConnected($c)) => $body,
            (Layer::Convolution($l), LayerCache::Convolution($c)) => $body,
            (Layer::MaxPool($l), LayerCache::MaxPool($c)) => $body,
            (layer, _) => Err(Error::CacheMismatch {
                expected: layer.kind(),
            }),
        }
    };
}

impl LayerOps for Layer {
    type Cache = LayerCache;

    fn input_len(&self) -> usize {
        match self {
            Layer::FullyConnected(l) => l.input_len(),
            Layer::Convolution(l) => l.input_len(),
            Layer::MaxPool(l) => l.input_len(),
        }
    }

    fn output_len(&self) -> usize {
        match self {
            Layer::FullyConnected(l) => l.output_len(),
            Layer::Convolution(l) => l.output_len(),
            Layer::MaxPool(l) => l.output_len(),
        }
    }

    fn variables(&self) -> Vec<Variable> {
        match self {
            Layer::FullyConnected(l) => l.variables(),
            Layer::Convolution(l) => l.variables(),
            Layer::MaxPool(l) => l.variables(),
        }
    }

    fn contains_variable(&self, variable: Variable) -> bool {
        match self {
            Layer::FullyConnected(l) => l.contains_variable(variable),
            Layer::Convolution(l) => l.contains_variable(variable),
            Layer::MaxPool(l) => l.contains_variable(variable),
        }
    }

    fn evaluate(&self, input: &Vector, bindings: &Bindings) -> Result<(Vector, LayerCache)> {
        Ok(match self {
            Layer::FullyConnected(l) => {
                let (out, cache) = l.evaluate(input, bindings)?;
                (out, LayerCache::FullyConnected(cache))
            }
            Layer::Convolution(l) => {
                let (out, cache) = l.evaluate(input, bindings)?;
                (out, LayerCache::Convolution(cache))
            }
            Layer::MaxPool(l) => {
                let (out, cache) = l.evaluate(input, bindings)?;
                (out, LayerCache::MaxPool(cache))
            }
        })
    }

    fn derivative_wrt_input(
        &self,
        input: &Vector,
        cache: &mut LayerCache,
        bindings: &Bindings,
    ) -> Result<Matrix> {
        dispatch!(self, cache, |l, c| l.derivative_wrt_input(input, c, bindings))
    }

    fn derivative_wrt_parameter(
        &self,
        input: &Vector,
        variable: Variable,
        cache: &mut LayerCache,
        bindings: &Bindings,
    ) -> Result<Vector> {
        dispatch!(self, cache, |l, c| l
            .derivative_wrt_parameter(input, variable, c, bindings))
    }

    fn evaluation<'a>(&self, cache: &'a LayerCache) -> &'a Vector {
        match cache {
            LayerCache::FullyConnected(c) => &c.output,
            LayerCache::Convolution(c) => &c.output,
            LayerCache::MaxPool(c) => &c.output,
        }
    }

    fn expression(&self, input: VectorExpr) -> Result<VectorExpr> {
        match self {
            Layer::FullyConnected(l) => l.expression(input),
            Layer::Convolution(l) => l.expression(input),
            Layer::MaxPool(l) => l.expression(input),
        }
    }
}

/// Shape check shared by every layer's `evaluate`.
fn check_input(kind: &str, expected: usize, input: &Vector) -> Result<()> {
    if input.len() != expected {
        return Err(Error::InvalidShape(format!(
            "{kind} layer expects input len {expected}, got {}",
            input.len()
        )));
    }
    Ok(())
}

/// Error for a variable handed to a layer that does not own it.
fn not_owned(variable: Variable) -> Error {
    Error::VariableNotFound {
        variable,
        layers: 1,
    }
}
