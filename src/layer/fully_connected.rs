use super::{LayerOps, check_input, not_owned};
use crate::activation::Activation;
use crate::bindings::Bindings;
use crate::expr::{MatrixExpr, VectorExpr};
use crate::linalg::{Matrix, Vector};
use crate::model::{ParameterMatrix, ParameterModel, ParameterVector, Variable};
use crate::{Error, Result};

/// `output = activation(W · input + b)`, with `W` of shape `(output_len, input_len)` and an
/// optional bias `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct FullyConnected {
    weights: ParameterMatrix,
    bias: Option<ParameterVector>,
    activation: Activation,
}

/// Forward values of a [`FullyConnected`] layer.
#[derive(Debug, Clone, PartialEq)]
pub struct FullyConnectedCache {
    pub(crate) weighted_sum: Vector,
    pub(crate) output: Vector,
    /// `activation'(weighted_sum)`, computed on first derivative request.
    slope: Option<Vector>,
}

impl FullyConnectedCache {
    fn slope(&mut self, activation: Activation) -> &Vector {
        let weighted_sum = &self.weighted_sum;
        self.slope
            .get_or_insert_with(|| weighted_sum.map(|z| activation.slope(z)))
    }
}

impl FullyConnected {
    pub fn new(
        weights: ParameterMatrix,
        bias: Option<ParameterVector>,
        activation: Activation,
    ) -> Result<Self> {
        activation.validate()?;
        if let Some(b) = &bias {
            if b.len() != weights.rows() {
                return Err(Error::InvalidShape(format!(
                    "bias len {} does not match {} weight rows",
                    b.len(),
                    weights.rows()
                )));
            }
        }
        Ok(Self {
            weights,
            bias,
            activation,
        })
    }

    /// Allocate weights (then bias, if requested) from `model`.
    pub fn allocate(
        model: &mut ParameterModel,
        input_len: usize,
        output_len: usize,
        activation: Activation,
        bias: bool,
    ) -> Result<Self> {
        let weights = model.allocate_matrix(output_len, input_len)?;
        let bias = if bias {
            Some(model.allocate_vector(output_len)?)
        } else {
            None
        };
        Self::new(weights, bias, activation)
    }

    #[inline]
    pub fn weights(&self) -> &ParameterMatrix {
        &self.weights
    }

    #[inline]
    pub fn bias(&self) -> Option<&ParameterVector> {
        self.bias.as_ref()
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl LayerOps for FullyConnected {
    type Cache = FullyConnectedCache;

    #[inline]
    fn input_len(&self) -> usize {
        self.weights.cols()
    }

    #[inline]
    fn output_len(&self) -> usize {
        self.weights.rows()
    }

    fn variables(&self) -> Vec<Variable> {
        let mut vars: Vec<Variable> = self.weights.variables().collect();
        if let Some(b) = &self.bias {
            vars.extend(b.variables());
        }
        vars
    }

    fn contains_variable(&self, variable: Variable) -> bool {
        self.weights.contains(variable) || self.bias.is_some_and(|b| b.contains(variable))
    }

    fn evaluate(&self, input: &Vector, bindings: &Bindings) -> Result<(Vector, Self::Cache)> {
        check_input("fully-connected", self.input_len(), input)?;

        let w = bindings.matrix(&self.weights)?;
        let mut weighted_sum = w.mat_vec(input);
        if let Some(b) = &self.bias {
            weighted_sum = weighted_sum.add(&bindings.vector(b)?);
        }
        let activation = self.activation;
        let output = weighted_sum.map(|z| activation.value(z));

        Ok((
            output.clone(),
            FullyConnectedCache {
                weighted_sum,
                output,
                slope: None,
            },
        ))
    }

    /// `D(activation'(z)) · W`.
    fn derivative_wrt_input(
        &self,
        _input: &Vector,
        cache: &mut Self::Cache,
        bindings: &Bindings,
    ) -> Result<Matrix> {
        let w = bindings.matrix(&self.weights)?;
        Ok(w.scale_rows(cache.slope(self.activation)))
    }

    /// Weight `(r, c)`: `D(activation'(z)) · e_r · input[c]`. Bias `r`: `D(activation'(z)) · e_r`.
    fn derivative_wrt_parameter(
        &self,
        input: &Vector,
        variable: Variable,
        cache: &mut Self::Cache,
        _bindings: &Bindings,
    ) -> Result<Vector> {
        let (row, factor) = if let Some((r, c)) = self.weights.position_of(variable) {
            (r, input[c])
        } else if let Some(r) = self.bias.and_then(|b| b.offset_of(variable)) {
            (r, 1.0)
        } else {
            return Err(not_owned(variable));
        };

        let slope = cache.slope(self.activation);
        let mut column = Vector::zeros(self.output_len());
        column[row] = slope[row] * factor;
        Ok(column)
    }

    #[inline]
    fn evaluation<'a>(&self, cache: &'a Self::Cache) -> &'a Vector {
        &cache.output
    }

    fn expression(&self, input: VectorExpr) -> Result<VectorExpr> {
        let mut z = VectorExpr::mat_vec(MatrixExpr::parameter(self.weights), input)?;
        if let Some(b) = self.bias {
            z = VectorExpr::sum(z, VectorExpr::parameter(b))?;
        }
        Ok(VectorExpr::apply(self.activation, z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_with_values(
        input_len: usize,
        output_len: usize,
        activation: Activation,
        bias: bool,
    ) -> (FullyConnected, Bindings) {
        let mut model = ParameterModel::new();
        let layer =
            FullyConnected::allocate(&mut model, input_len, output_len, activation, bias).unwrap();
        let mut bindings = model.create_bindings();
        for (i, v) in bindings.as_mut_slice().iter_mut().enumerate() {
            *v = ((i * 7 % 11) as f64 - 5.0) * 0.13;
        }
        (layer, bindings)
    }

    #[test]
    fn identity_activation_with_zero_bias_is_exactly_w_times_x() {
        let (layer, mut bindings) = layer_with_values(3, 4, Activation::Identity, true);
        let bias = *layer.bias().unwrap();
        bindings.put_vector(&bias, &Vector::zeros(4)).unwrap();
        let x = Vector::from([0.3, -1.7, 2.9]);

        let (out, _) = layer.evaluate(&x, &bindings).unwrap();
        let w = bindings.matrix(layer.weights()).unwrap();
        assert_eq!(out, w.mat_vec(&x));
    }

    #[test]
    fn bias_len_must_match_weight_rows() {
        let mut model = ParameterModel::new();
        let w = model.allocate_matrix(3, 2).unwrap();
        let b = model.allocate_vector(2).unwrap();
        assert!(matches!(
            FullyConnected::new(w, Some(b), Activation::ReLU),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn input_len_is_checked() {
        let (layer, bindings) = layer_with_values(3, 2, Activation::Tanh, false);
        assert!(matches!(
            layer.evaluate(&Vector::zeros(4), &bindings),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn local_derivatives_match_the_expression() {
        let (layer, bindings) = layer_with_values(3, 2, Activation::Tanh, true);
        let x = Vector::from([0.5, -0.25, 1.5]);
        let (_, mut cache) = layer.evaluate(&x, &bindings).unwrap();

        let expr = layer.expression(VectorExpr::constant(x.clone())).unwrap();
        for v in layer.variables() {
            let local = layer
                .derivative_wrt_parameter(&x, v, &mut cache, &bindings)
                .unwrap();
            let symbolic = expr.partial_derivative(v).unwrap().evaluate(&bindings).unwrap();
            for i in 0..local.len() {
                assert!((local[i] - symbolic[i]).abs() < 1e-12, "{v} row {i}");
            }
        }
    }

    #[test]
    fn slope_is_filled_lazily() {
        let (layer, bindings) = layer_with_values(2, 2, Activation::Sigmoid, false);
        let x = Vector::from([1.0, 2.0]);
        let (_, mut cache) = layer.evaluate(&x, &bindings).unwrap();
        assert!(cache.slope.is_none());
        layer
            .derivative_wrt_input(&x, &mut cache, &bindings)
            .unwrap();
        assert!(cache.slope.is_some());
    }

    #[test]
    fn foreign_variable_is_reported() {
        let (layer, bindings) = layer_with_values(2, 2, Activation::Tanh, false);
        let mut other = ParameterModel::new();
        other.allocate_vector(10).unwrap();
        let foreign = other.allocate_scalar();
        let x = Vector::from([1.0, 2.0]);
        let (_, mut cache) = layer.evaluate(&x, &bindings).unwrap();

        assert!(!layer.contains_variable(foreign));
        assert!(matches!(
            layer.derivative_wrt_parameter(&x, foreign, &mut cache, &bindings),
            Err(Error::VariableNotFound { .. })
        ));
    }
}
