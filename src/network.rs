//! Layered backpropagation.
//!
//! [`FeedForwardNetwork::jacobian`] computes the Jacobian of the network output with respect to
//! any set of parameters in three steps:
//!
//! 1. Forward pass: evaluate every layer bottom to top, keeping each layer's input and cache.
//! 2. Backward pass: `delta[L-1] = J_in(L-1)` and `delta[l] = delta[l+1] · J_in(l)`, so that
//!    `delta[l]` is the Jacobian of the network output with respect to the input of layer `l`.
//! 3. Columns: for a variable owned by layer `l`, the column is `delta[l+1] · local`, where
//!    `local` is the layer's own parameter derivative (or just `local` when `l` is the top
//!    layer).
//!
//! Each delta is computed once and shared by every parameter of its layer, so the work is
//! linear in depth plus parameter count. [`BackpropStats`] counts the operations so callers
//! can check that.
//!
//! # Concurrency
//!
//! A network is immutable after construction and can be shared across threads. Everything
//! mutable in a pass (bindings, caches) is owned by that pass.

use std::collections::HashMap;

use log::{debug, trace};

use crate::bindings::Bindings;
use crate::expr::VectorExpr;
use crate::layer::{Layer, LayerCache, LayerOps};
use crate::linalg::{Matrix, Vector};
use crate::loss;
use crate::model::Variable;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardNetwork {
    layers: Vec<Layer>,
}

/// Everything the forward pass produced: per-layer inputs and caches, and the output.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    inputs: Vec<Vector>,
    caches: Vec<LayerCache>,
    output: Vector,
}

impl ForwardPass {
    /// The input that layer `l` was evaluated on.
    #[inline]
    pub fn input(&self, l: usize) -> &Vector {
        &self.inputs[l]
    }

    #[inline]
    pub fn cache(&self, l: usize) -> &LayerCache {
        &self.caches[l]
    }

    #[inline]
    pub fn output(&self) -> &Vector {
        &self.output
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

/// Operation counts of one Jacobian assembly.
///
/// Each counter is bumped next to the call it counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackpropStats {
    /// Calls to [`LayerOps::evaluate`] in the forward pass (one cache each).
    pub layer_evaluations: usize,
    /// Calls to [`LayerOps::derivative_wrt_input`], one per computed `delta[l]`.
    pub input_jacobians: usize,
    /// `delta[l + 1] · local` matrix products folding a layer into the running delta.
    pub jacobian_products: usize,
    /// Calls to [`LayerOps::derivative_wrt_parameter`], one per requested column.
    pub parameter_derivatives: usize,
    /// `delta[owner + 1] · local` products; columns owned by the last layer skip this.
    pub sensitivity_products: usize,
}

impl FeedForwardNetwork {
    /// Layers are given bottom to top. Adjacent lengths must chain, and no variable may be
    /// owned by two layers.
    pub fn new(layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::InvalidConfig(
                "network needs at least one layer".to_owned(),
            ));
        }
        for (l, pair) in layers.windows(2).enumerate() {
            if pair[0].output_len() != pair[1].input_len() {
                return Err(Error::InvalidShape(format!(
                    "layer {l} outputs {} values but layer {} expects {}",
                    pair[0].output_len(),
                    l + 1,
                    pair[1].input_len()
                )));
            }
        }

        let mut owners: HashMap<Variable, usize> = HashMap::new();
        for (l, layer) in layers.iter().enumerate() {
            for v in layer.variables() {
                if let Some(first) = owners.insert(v, l) {
                    return Err(Error::InvalidConfig(format!(
                        "{v} is shared by layers {first} and {l}"
                    )));
                }
            }
        }

        debug!(
            "built network: {} layers, {} parameters, {} -> {}",
            layers.len(),
            owners.len(),
            layers[0].input_len(),
            layers[layers.len() - 1].output_len()
        );
        Ok(Self { layers })
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn input_len(&self) -> usize {
        self.layers[0].input_len()
    }

    #[inline]
    pub fn output_len(&self) -> usize {
        self.layers[self.layers.len() - 1].output_len()
    }

    /// Every owned variable, bottom layer first.
    pub fn variables(&self) -> Vec<Variable> {
        self.layers.iter().flat_map(|l| l.variables()).collect()
    }

    /// Index of the first layer that owns `variable`.
    pub fn owner_of(&self, variable: Variable) -> Result<usize> {
        self.layers
            .iter()
            .position(|l| l.contains_variable(variable))
            .ok_or(Error::VariableNotFound {
                variable,
                layers: self.layers.len(),
            })
    }

    pub fn forward(&self, input: &Vector, bindings: &Bindings) -> Result<ForwardPass> {
        if input.len() != self.input_len() {
            return Err(Error::InvalidShape(format!(
                "input len {} does not match network input_len {}",
                input.len(),
                self.input_len()
            )));
        }

        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut current = input.clone();
        for (l, layer) in self.layers.iter().enumerate() {
            let (out, cache) = layer.evaluate(&current, bindings)?;
            trace!("forward: layer {l} ({}) -> {} values", layer.kind(), out.len());
            inputs.push(std::mem::replace(&mut current, out));
            caches.push(cache);
        }

        Ok(ForwardPass {
            inputs,
            caches,
            output: current,
        })
    }

    pub fn evaluate(&self, input: &Vector, bindings: &Bindings) -> Result<Vector> {
        Ok(self.forward(input, bindings)?.output)
    }

    /// `output_len x variables.len()` Jacobian, columns in the order given.
    pub fn jacobian(
        &self,
        input: &Vector,
        variables: &[Variable],
        bindings: &Bindings,
    ) -> Result<Matrix> {
        Ok(self.jacobian_with_stats(input, variables, bindings)?.0)
    }

    pub fn jacobian_with_stats(
        &self,
        input: &Vector,
        variables: &[Variable],
        bindings: &Bindings,
    ) -> Result<(Matrix, BackpropStats)> {
        let owners = variables
            .iter()
            .map(|&v| self.owner_of(v))
            .collect::<Result<Vec<_>>>()?;

        let mut stats = BackpropStats::default();
        let mut pass = self.forward(input, bindings)?;
        stats.layer_evaluations = pass.len();

        let jacobian = self.assemble(&mut pass, variables, &owners, bindings, &mut stats)?;
        debug!("jacobian {:?}: {stats:?}", jacobian.shape());
        Ok((jacobian, stats))
    }

    /// `delta[0]`: the Jacobian of the output with respect to the network input.
    pub fn input_jacobian(&self, input: &Vector, bindings: &Bindings) -> Result<Matrix> {
        let mut pass = self.forward(input, bindings)?;
        let mut stats = BackpropStats::default();
        let mut deltas = self.deltas(&mut pass, 0, bindings, &mut stats)?;
        deltas[0].take().ok_or_else(|| {
            Error::InvalidConfig("backward pass did not reach the input layer".to_owned())
        })
    }

    /// Gradient of `0.5 * ||output - target||^2`, which is `J^T (output - target)`.
    pub fn squared_error_gradient(
        &self,
        input: &Vector,
        target: &Vector,
        variables: &[Variable],
        bindings: &Bindings,
    ) -> Result<Vector> {
        if target.len() != self.output_len() {
            return Err(Error::InvalidShape(format!(
                "target len {} does not match network output_len {}",
                target.len(),
                self.output_len()
            )));
        }
        let owners = variables
            .iter()
            .map(|&v| self.owner_of(v))
            .collect::<Result<Vec<_>>>()?;

        let mut stats = BackpropStats::default();
        let mut pass = self.forward(input, bindings)?;
        let jacobian = self.assemble(&mut pass, variables, &owners, bindings, &mut stats)?;
        let (loss, residual) = loss::squared_error_backward(pass.output(), target);
        trace!("squared error {loss}");
        Ok(jacobian.transpose().mat_vec(&residual))
    }

    /// The whole network applied to `input`, as one expression.
    pub fn expression(&self, input: VectorExpr) -> Result<VectorExpr> {
        self.layers
            .iter()
            .try_fold(input, |x, layer| layer.expression(x))
    }

    /// Fix `bindings` to get a plain input-to-output function.
    pub fn bind<'a>(&'a self, bindings: &'a Bindings) -> BoundNetwork<'a> {
        BoundNetwork {
            network: self,
            bindings,
        }
    }

    /// Like [`FeedForwardNetwork::bind`], but owning both halves.
    pub fn into_fn(self, bindings: Bindings) -> impl Fn(&Vector) -> Result<Vector> + Send + Sync {
        move |input| self.evaluate(input, &bindings)
    }

    fn assemble(
        &self,
        pass: &mut ForwardPass,
        variables: &[Variable],
        owners: &[usize],
        bindings: &Bindings,
        stats: &mut BackpropStats,
    ) -> Result<Matrix> {
        let last = self.layers.len() - 1;
        let mut jacobian = Matrix::zeros(self.output_len(), variables.len());
        let Some(&lowest) = owners.iter().min() else {
            return Ok(jacobian);
        };

        // delta[l] is only needed for l above the lowest owning layer.
        let deltas = self.deltas(pass, lowest + 1, bindings, stats)?;

        for (j, (&variable, &owner)) in variables.iter().zip(owners).enumerate() {
            let local = self.layers[owner].derivative_wrt_parameter(
                &pass.inputs[owner],
                variable,
                &mut pass.caches[owner],
                bindings,
            )?;
            stats.parameter_derivatives += 1;

            if owner == last {
                jacobian.set_column(j, &local);
            } else {
                let delta = deltas[owner + 1].as_ref().ok_or_else(|| {
                    Error::InvalidConfig(format!("missing delta for layer {}", owner + 1))
                })?;
                jacobian.set_column(j, &delta.mat_vec(&local));
                stats.sensitivity_products += 1;
            }
        }
        Ok(jacobian)
    }

    /// `delta[l]` for every `l >= down_to`; lower entries stay `None`.
    fn deltas(
        &self,
        pass: &mut ForwardPass,
        down_to: usize,
        bindings: &Bindings,
        stats: &mut BackpropStats,
    ) -> Result<Vec<Option<Matrix>>> {
        let n = self.layers.len();
        let mut deltas: Vec<Option<Matrix>> = vec![None; n];
        if down_to >= n {
            return Ok(deltas);
        }

        let mut running: Option<Matrix> = None;
        for l in (down_to..n).rev() {
            let local = self.layers[l].derivative_wrt_input(
                &pass.inputs[l],
                &mut pass.caches[l],
                bindings,
            )?;
            stats.input_jacobians += 1;

            let delta = match running.take() {
                None => local,
                Some(above) => {
                    stats.jacobian_products += 1;
                    above.matmul(&local)
                }
            };
            trace!("backward: delta[{l}] is {:?}", delta.shape());
            deltas[l] = Some(delta.clone());
            running = Some(delta);
        }
        Ok(deltas)
    }
}

/// A network with its parameters fixed.
#[derive(Debug, Clone, Copy)]
pub struct BoundNetwork<'a> {
    network: &'a FeedForwardNetwork,
    bindings: &'a Bindings,
}

impl BoundNetwork<'_> {
    pub fn apply(&self, input: &Vector) -> Result<Vector> {
        self.network.evaluate(input, self.bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::layer::FullyConnected;
    use crate::model::ParameterModel;

    fn two_layer() -> (FeedForwardNetwork, Bindings) {
        let mut model = ParameterModel::new();
        let l0 = FullyConnected::allocate(&mut model, 3, 4, Activation::Tanh, true).unwrap();
        let l1 = FullyConnected::allocate(&mut model, 4, 2, Activation::Sigmoid, false).unwrap();
        let network = FeedForwardNetwork::new(vec![l0.into(), l1.into()]).unwrap();
        let mut bindings = model.create_bindings();
        for (i, v) in bindings.as_mut_slice().iter_mut().enumerate() {
            *v = ((i * 3 % 7) as f64 - 3.0) * 0.17;
        }
        (network, bindings)
    }

    #[test]
    fn chain_mismatch_is_a_shape_error() {
        let mut model = ParameterModel::new();
        let l0 = FullyConnected::allocate(&mut model, 3, 4, Activation::Tanh, true).unwrap();
        let l1 = FullyConnected::allocate(&mut model, 5, 2, Activation::Tanh, true).unwrap();
        assert!(matches!(
            FeedForwardNetwork::new(vec![l0.into(), l1.into()]),
            Err(Error::InvalidShape(_))
        ));
        assert!(FeedForwardNetwork::new(vec![]).is_err());
    }

    #[test]
    fn shared_variables_are_rejected() {
        let mut model = ParameterModel::new();
        let l0 = FullyConnected::allocate(&mut model, 2, 2, Activation::Tanh, false).unwrap();
        assert!(matches!(
            FeedForwardNetwork::new(vec![l0.clone().into(), l0.into()]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_variable_names_variable_and_layer_count() {
        let (network, bindings) = two_layer();
        let mut other = ParameterModel::new();
        other.allocate_vector(100).unwrap();
        let stray = other.allocate_scalar();

        let err = network
            .jacobian(&Vector::zeros(3), &[stray], &bindings)
            .unwrap_err();
        assert_eq!(
            err,
            Error::VariableNotFound {
                variable: stray,
                layers: 2
            }
        );
        assert!(err.to_string().contains("parameter #100"));
        assert!(err.to_string().contains("2 layers"));
    }

    #[test]
    fn columns_follow_the_caller_order() {
        let (network, bindings) = two_layer();
        let x = Vector::from([0.2, -0.4, 0.9]);
        let vars = network.variables();
        let reversed: Vec<_> = vars.iter().rev().copied().collect();

        let forward = network.jacobian(&x, &vars, &bindings).unwrap();
        let backward = network.jacobian(&x, &reversed, &bindings).unwrap();
        for j in 0..vars.len() {
            assert_eq!(forward.column(j), backward.column(vars.len() - 1 - j));
        }
    }

    #[test]
    fn agrees_with_the_expression_jacobian() {
        let (network, bindings) = two_layer();
        let x = Vector::from([0.2, -0.4, 0.9]);
        let vars = network.variables();

        let fast = network.jacobian(&x, &vars, &bindings).unwrap();
        let naive = network
            .expression(VectorExpr::constant(x))
            .unwrap()
            .derivative(&vars, &bindings)
            .unwrap();
        assert_eq!(fast.shape(), naive.shape());
        for (a, b) in fast.as_slice().iter().zip(naive.as_slice()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn top_layer_only_needs_no_backward_pass() {
        let (network, bindings) = two_layer();
        let top = network.layers()[1].variables();
        let (_, stats) = network
            .jacobian_with_stats(&Vector::from([1.0, 0.0, -1.0]), &top, &bindings)
            .unwrap();
        assert_eq!(stats.input_jacobians, 0);
        assert_eq!(stats.sensitivity_products, 0);
        assert_eq!(stats.parameter_derivatives, top.len());
    }

    #[test]
    fn stats_count_one_call_per_column_and_per_delta() {
        let (network, bindings) = two_layer();
        let bottom = network.layers()[0].variables();
        let top = network.layers()[1].variables();
        let vars = [top[0], bottom[3], top[1], bottom[0]];

        let (jac, stats) = network
            .jacobian_with_stats(&Vector::from([0.3, -0.2, 0.6]), &vars, &bindings)
            .unwrap();
        assert_eq!(jac.shape(), (2, 4));
        assert_eq!(
            stats,
            BackpropStats {
                layer_evaluations: 2,
                input_jacobians: 1,
                jacobian_products: 0,
                parameter_derivatives: 4,
                sensitivity_products: 2,
            }
        );
    }

    #[test]
    fn squared_error_gradient_is_jacobian_transpose_times_residual() {
        let (network, bindings) = two_layer();
        let x = Vector::from([0.5, 0.1, -0.3]);
        let target = Vector::from([1.0, 0.0]);
        let vars = network.variables();

        let grad = network
            .squared_error_gradient(&x, &target, &vars, &bindings)
            .unwrap();
        let y = network.evaluate(&x, &bindings).unwrap();
        let jac = network.jacobian(&x, &vars, &bindings).unwrap();
        let expected = jac.transpose().mat_vec(&y.sub(&target));
        assert_eq!(grad, expected);
    }

    #[test]
    fn bound_network_and_closure_match_evaluate() {
        let (network, bindings) = two_layer();
        let x = Vector::from([0.5, 0.1, -0.3]);
        let expected = network.evaluate(&x, &bindings).unwrap();

        assert_eq!(network.bind(&bindings).apply(&x).unwrap(), expected);
        let f = network.into_fn(bindings);
        assert_eq!(f(&x).unwrap(), expected);
    }
}
