//! Symbolic differentiation and layered backpropagation.
//!
//! `rust-backprop` computes Jacobians of feed-forward networks with respect to their trainable
//! parameters. It has two ways of getting there:
//!
//! - Expressions ([`expr`]): scalar, vector and matrix DAGs over parameters, differentiated
//!   symbolically one variable at a time. Simple and general, and the correctness baseline.
//! - Backpropagation ([`network`]): each layer supplies only its local Jacobians and the
//!   network chains them, reusing each downstream sensitivity for every parameter of a layer.
//!
//! # Parameters
//!
//! A [`ParameterModel`] allocates disjoint runs of global parameter indices and hands back
//! typed handles ([`Variable`], [`ParameterVector`], [`ParameterMatrix`]). Values live in a
//! separate [`Bindings`] arena, so one network can be evaluated under many assignments, even
//! from several threads at once.
//!
//! # Panics vs `Result`
//!
//! - Low-level value arithmetic on [`Vector`] and [`Matrix`] panics via `assert!` on shape
//!   misuse. Shapes there are programmer error.
//! - Everything that builds, evaluates or differentiates an expression, layer or network is
//!   shape-checked and returns [`Result`]. Incompatible shapes are rejected at construction,
//!   before anything is evaluated.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f64`.
//! - Matrices (values and parameter matrices) are row-major.
//! - Multi-channel images are flattened channel-major, then row-major within a channel.
//! - A Jacobian has one row per output component and one column per requested variable, in
//!   the order requested.
//!
//! # Logging
//!
//! The crate logs through the `log` facade: `debug` when a network is built and after each
//! Jacobian, `trace` per layer in both passes. Install any logger to see them.
//!
//! # Quick start
//!
//! ```rust
//! use rust_backprop::{Activation, NetworkBuilder, Vector, gradcheck};
//!
//! # fn main() -> rust_backprop::Result<()> {
//! let (network, model) = NetworkBuilder::new(3)?
//!     .add_fully_connected(4, Activation::Tanh, true)?
//!     .add_fully_connected(2, Activation::Sigmoid, true)?
//!     .build()?;
//!
//! let mut bindings = model.create_bindings();
//! for (i, v) in bindings.as_mut_slice().iter_mut().enumerate() {
//!     *v = 0.1 * (i as f64 % 5.0) - 0.2;
//! }
//!
//! let x = Vector::from([0.5, -1.0, 2.0]);
//! let variables = network.variables();
//! let jacobian = network.jacobian(&x, &variables, &bindings)?;
//! assert_eq!(jacobian.shape(), (2, model.size()));
//!
//! gradcheck::check(&network, &x, &variables, &bindings)?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod bindings;
pub mod builder;
pub mod error;
pub mod expr;
pub mod geometry;
pub mod gradcheck;
pub mod layer;
pub mod linalg;
pub mod loss;
pub mod model;
pub mod network;

#[cfg(feature = "serde")]
pub mod snapshot;

pub use activation::{Activation, ScalarFunction};
pub use bindings::Bindings;
pub use builder::NetworkBuilder;
pub use error::{Error, Result};
pub use expr::{MatrixExpr, ScalarExpr, VectorExpr};
pub use geometry::{FilterGeometry, ImageShape, PoolGeometry};
pub use layer::{Convolution, Filter, FullyConnected, Layer, LayerCache, LayerOps, MaxPool};
pub use linalg::{Matrix, Vector};
pub use model::{ParameterMatrix, ParameterModel, ParameterVector, Variable};
pub use network::{BackpropStats, BoundNetwork, FeedForwardNetwork, ForwardPass};

#[cfg(feature = "serde")]
pub use snapshot::{LayerDescription, NetworkSnapshot};
