//! Activation functions.
//!
//! A layer computes a weighted sum `z` and applies an activation element-wise:
//! `y = activation(z)`. Derivatives are taken with respect to `z`, which layers keep in their
//! cache.
//!
//! Expressions need more than the first derivative: differentiating `apply(f, x)` produces
//! `apply(f', x)`, and differentiating that again produces `apply(f'', x)`. A
//! [`ScalarFunction`] is an activation at a fixed derivative order. Orders up to 2 are defined
//! for every activation. Past that, piecewise-linear activations are structurally zero and the
//! smooth ones are unsupported.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
/// Element-wise activation function.
pub enum Activation {
    Identity,
    Sigmoid,
    Tanh,
    ReLU,
    LeakyReLU { alpha: f64 },
}

impl Activation {
    /// Validate activation parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Activation::LeakyReLU { alpha } => {
                if !(alpha.is_finite() && alpha >= 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "leaky ReLU alpha must be finite and >= 0, got {alpha}"
                    )));
                }
            }
            Activation::Identity | Activation::Sigmoid | Activation::Tanh | Activation::ReLU => {}
        }

        Ok(())
    }

    #[inline]
    pub fn value(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::ReLU => x.max(0.0),
            Activation::LeakyReLU { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
        }
    }

    /// First derivative with respect to the pre-activation input.
    #[inline]
    pub fn slope(self, x: f64) -> f64 {
        match self {
            Activation::Identity => 1.0,
            Activation::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Activation::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Activation::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyReLU { alpha } => {
                if x > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
        }
    }

    #[inline]
    fn curvature(self, x: f64) -> f64 {
        match self {
            Activation::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s) * (1.0 - 2.0 * s)
            }
            Activation::Tanh => {
                let t = x.tanh();
                -2.0 * t * (1.0 - t * t)
            }
            Activation::Identity | Activation::ReLU | Activation::LeakyReLU { .. } => 0.0,
        }
    }

    #[inline]
    fn is_piecewise_linear(self) -> bool {
        matches!(
            self,
            Activation::Identity | Activation::ReLU | Activation::LeakyReLU { .. }
        )
    }
}

/// An activation at a given derivative order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarFunction {
    activation: Activation,
    order: u8,
}

impl ScalarFunction {
    pub fn new(activation: Activation) -> Self {
        Self {
            activation,
            order: 0,
        }
    }

    #[inline]
    pub fn activation(self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn order(self) -> u8 {
        self.order
    }

    /// The next derivative of this function.
    pub fn derivative(self) -> Result<Self> {
        if self.order >= 2 && !self.activation.is_piecewise_linear() {
            return Err(Error::Unsupported(format!(
                "derivative of order {} of {:?}",
                self.order + 1,
                self.activation
            )));
        }
        Ok(Self {
            activation: self.activation,
            order: self.order.saturating_add(1),
        })
    }

    /// Structurally zero: identically 0 wherever it is defined.
    #[inline]
    pub fn is_zero(self) -> bool {
        match self.activation {
            Activation::Identity | Activation::ReLU | Activation::LeakyReLU { .. } => {
                self.order >= 2
            }
            Activation::Sigmoid | Activation::Tanh => false,
        }
    }

    /// Structurally the identity map.
    #[inline]
    pub fn is_identity(self) -> bool {
        self.activation == Activation::Identity && self.order == 0
    }

    #[inline]
    pub fn eval(self, x: f64) -> f64 {
        match self.order {
            0 => self.activation.value(x),
            1 => self.activation.slope(x),
            2 => self.activation.curvature(x),
            // Only piecewise-linear activations get past order 2.
            _ => 0.0,
        }
    }
}

impl From<Activation> for ScalarFunction {
    fn from(value: Activation) -> Self {
        Self::new(value)
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}
