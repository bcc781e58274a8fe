//! Multi-filter convolution over multi-channel images.
//!
//! Every filter is applied to every input channel independently (no mixing across channels).
//! The output block for channel `c` and filter `f` starts at `(c * filters + f) * out_area`, so
//! the input Jacobian is block-diagonal by channel, and each block is the banded operator of
//! one filter scaled by the activation slope.

use std::collections::HashSet;

use super::{LayerOps, check_input, not_owned};
use crate::activation::Activation;
use crate::bindings::Bindings;
use crate::expr::{MatrixExpr, ScalarExpr, VectorExpr};
use crate::geometry::{FilterGeometry, FilterOperator};
use crate::linalg::{Matrix, Vector};
use crate::model::{ParameterMatrix, ParameterModel, Variable};
use crate::{Error, Result};

/// One filter: an `fh x fw` weight grid and an optional bias shared over all positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    weights: ParameterMatrix,
    bias: Option<Variable>,
}

impl Filter {
    pub fn new(weights: ParameterMatrix, bias: Option<Variable>) -> Self {
        Self { weights, bias }
    }

    #[inline]
    pub fn weights(&self) -> &ParameterMatrix {
        &self.weights
    }

    #[inline]
    pub fn bias(&self) -> Option<Variable> {
        self.bias
    }

    fn contains(&self, variable: Variable) -> bool {
        self.weights.contains(variable) || self.bias == Some(variable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Convolution {
    operator: FilterOperator,
    filters: Vec<Filter>,
    activation: Activation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionCache {
    pub(crate) weighted_sum: Vector,
    pub(crate) output: Vector,
    slope: Option<Vector>,
}

impl ConvolutionCache {
    fn slope(&mut self, activation: Activation) -> &Vector {
        let weighted_sum = &self.weighted_sum;
        self.slope
            .get_or_insert_with(|| weighted_sum.map(|z| activation.slope(z)))
    }
}

impl Convolution {
    /// All filters must match the geometry's filter size and own disjoint parameters.
    pub fn new(
        geometry: FilterGeometry,
        filters: Vec<Filter>,
        activation: Activation,
    ) -> Result<Self> {
        activation.validate()?;
        if filters.is_empty() {
            return Err(Error::InvalidConfig(
                "convolution needs at least one filter".to_owned(),
            ));
        }
        let expected = (geometry.filter_height(), geometry.filter_width());
        for (f, filter) in filters.iter().enumerate() {
            let got = (filter.weights.rows(), filter.weights.cols());
            if got != expected {
                return Err(Error::InvalidShape(format!(
                    "filter {f} is {} x {}, expected {} x {}",
                    got.0, got.1, expected.0, expected.1
                )));
            }
        }
        output_len_of(geometry, filters.len())?;
        let mut seen = HashSet::new();
        for (f, filter) in filters.iter().enumerate() {
            for v in filter.weights.variables().chain(filter.bias) {
                if !seen.insert(v) {
                    return Err(Error::InvalidConfig(format!(
                        "filter {f} reuses {v}, which an earlier filter already owns"
                    )));
                }
            }
        }
        Ok(Self {
            operator: FilterOperator::new(geometry),
            filters,
            activation,
        })
    }

    /// Allocate `filter_count` filters from `model`, each weights-then-bias.
    pub fn allocate(
        model: &mut ParameterModel,
        geometry: FilterGeometry,
        filter_count: usize,
        activation: Activation,
        bias: bool,
    ) -> Result<Self> {
        output_len_of(geometry, filter_count)?;
        let mut filters = Vec::with_capacity(filter_count);
        for _ in 0..filter_count {
            let weights =
                model.allocate_matrix(geometry.filter_height(), geometry.filter_width())?;
            let bias = bias.then(|| model.allocate_scalar());
            filters.push(Filter::new(weights, bias));
        }
        Self::new(geometry, filters, activation)
    }

    #[inline]
    pub fn geometry(&self) -> FilterGeometry {
        self.operator.geometry()
    }

    #[inline]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    fn block_offset(&self, channel: usize, filter: usize) -> usize {
        (channel * self.filters.len() + filter) * self.geometry().output_area()
    }

    fn plane<'a>(&self, input: &'a Vector, channel: usize) -> &'a [f64] {
        let len = self.geometry().image().plane_len();
        &input.as_slice()[channel * len..(channel + 1) * len]
    }

    fn filter_weights(&self, bindings: &Bindings) -> Result<Vec<Matrix>> {
        self.filters
            .iter()
            .map(|f| bindings.matrix(&f.weights))
            .collect()
    }
}

impl LayerOps for Convolution {
    type Cache = ConvolutionCache;

    #[inline]
    fn input_len(&self) -> usize {
        self.geometry().image().len()
    }

    #[inline]
    fn output_len(&self) -> usize {
        self.geometry().image().channels() * self.filters.len() * self.geometry().output_area()
    }

    fn variables(&self) -> Vec<Variable> {
        let mut vars = Vec::new();
        for f in &self.filters {
            vars.extend(f.weights.variables());
            vars.extend(f.bias);
        }
        vars
    }

    fn contains_variable(&self, variable: Variable) -> bool {
        self.filters.iter().any(|f| f.contains(variable))
    }

    fn evaluate(&self, input: &Vector, bindings: &Bindings) -> Result<(Vector, Self::Cache)> {
        check_input("convolution", self.input_len(), input)?;

        let weights = self.filter_weights(bindings)?;
        let mut weighted_sum = Vec::with_capacity(self.output_len());
        for c in 0..self.geometry().image().channels() {
            let plane = self.plane(input, c);
            for (filter, w) in self.filters.iter().zip(&weights) {
                let bias = match filter.bias {
                    Some(b) => bindings.get(b)?,
                    None => 0.0,
                };
                let block = self.operator.apply(w.as_slice(), plane);
                weighted_sum.extend(block.into_iter().map(|z| z + bias));
            }
        }

        let weighted_sum = Vector::from(weighted_sum);
        let activation = self.activation;
        let output = weighted_sum.map(|z| activation.value(z));
        Ok((
            output.clone(),
            ConvolutionCache {
                weighted_sum,
                output,
                slope: None,
            },
        ))
    }

    fn derivative_wrt_input(
        &self,
        _input: &Vector,
        cache: &mut Self::Cache,
        bindings: &Bindings,
    ) -> Result<Matrix> {
        let weights = self.filter_weights(bindings)?;
        let plane_len = self.geometry().image().plane_len();
        let slope = cache.slope(self.activation);

        let mut jac = Matrix::zeros(self.output_len(), self.input_len());
        for c in 0..self.geometry().image().channels() {
            for (f, w) in weights.iter().enumerate() {
                let offset = self.block_offset(c, f);
                for e in self.operator.band() {
                    let row = offset + e.row;
                    jac[(row, c * plane_len + e.col)] = slope[row] * w.as_slice()[e.tap];
                }
            }
        }
        Ok(jac)
    }

    /// Nonzero only in the blocks of the owning filter, one per channel.
    fn derivative_wrt_parameter(
        &self,
        input: &Vector,
        variable: Variable,
        cache: &mut Self::Cache,
        _bindings: &Bindings,
    ) -> Result<Vector> {
        let (f, filter) = self
            .filters
            .iter()
            .enumerate()
            .find(|(_, filter)| filter.contains(variable))
            .ok_or_else(|| not_owned(variable))?;
        let tap = filter
            .weights
            .position_of(variable)
            .map(|(r, s)| r * self.geometry().filter_width() + s);

        let out_area = self.geometry().output_area();
        let mut column = Vector::zeros(self.output_len());
        for c in 0..self.geometry().image().channels() {
            let offset = self.block_offset(c, f);
            let local = match tap {
                Some(tap) => self.operator.apply_tap(tap, self.plane(input, c)),
                None => vec![1.0; out_area],
            };
            column.as_mut_slice()[offset..offset + out_area].copy_from_slice(&local);
        }

        let slope = cache.slope(self.activation);
        Ok(column.hadamard(slope))
    }

    #[inline]
    fn evaluation<'a>(&self, cache: &'a Self::Cache) -> &'a Vector {
        &cache.output
    }

    /// `sum_tap w[tap] * (T_tap · x_c) + b` per block, then the activation.
    fn expression(&self, input: VectorExpr) -> Result<VectorExpr> {
        let geometry = self.geometry();
        let plane_len = geometry.image().plane_len();
        let out_area = geometry.output_area();
        let taps: Vec<MatrixExpr> = (0..geometry.taps())
            .map(|t| MatrixExpr::constant(self.operator.tap_matrix(t)))
            .collect();

        let mut blocks = Vec::with_capacity(geometry.image().channels() * self.filters.len());
        for c in 0..geometry.image().channels() {
            let plane = VectorExpr::window(input.clone(), c * plane_len, plane_len)?;
            for filter in &self.filters {
                let mut z = VectorExpr::zero(out_area);
                for (tap, t) in taps.iter().enumerate() {
                    let w = filter.weights.variable(
                        tap / geometry.filter_width(),
                        tap % geometry.filter_width(),
                    );
                    let shifted = VectorExpr::mat_vec(t.clone(), plane.clone())?;
                    z = VectorExpr::sum(z, VectorExpr::scale(ScalarExpr::parameter(w), shifted))?;
                }
                if let Some(b) = filter.bias {
                    let ones = VectorExpr::constant(Vector::filled(out_area, 1.0));
                    z = VectorExpr::sum(z, VectorExpr::scale(ScalarExpr::parameter(b), ones))?;
                }
                blocks.push(z);
            }
        }
        Ok(VectorExpr::apply(self.activation, VectorExpr::concat(blocks)?))
    }
}

/// `channels * filters * out_area`, or an error when that overflows.
fn output_len_of(geometry: FilterGeometry, filters: usize) -> Result<usize> {
    geometry
        .image()
        .channels()
        .checked_mul(filters)
        .and_then(|n| n.checked_mul(geometry.output_area()))
        .ok_or_else(|| {
            Error::InvalidConfig(format!(
                "{filters} filters over {} channels overflow the output length",
                geometry.image().channels()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ImageShape;

    fn seeded(
        image: ImageShape,
        fh: usize,
        fw: usize,
        filters: usize,
        activation: Activation,
    ) -> (Convolution, Bindings) {
        let mut model = ParameterModel::new();
        let geometry = FilterGeometry::new(image, fh, fw).unwrap();
        let conv = Convolution::allocate(&mut model, geometry, filters, activation, true).unwrap();
        let mut bindings = model.create_bindings();
        for (i, v) in bindings.as_mut_slice().iter_mut().enumerate() {
            *v = ((i * 5 % 9) as f64 - 4.0) * 0.21;
        }
        (conv, bindings)
    }

    #[test]
    fn one_by_one_unit_filter_is_the_identity() {
        let image = ImageShape::new(1, 3, 2).unwrap();
        let (conv, mut bindings) = seeded(image, 1, 1, 1, Activation::Identity);
        let filter = conv.filters()[0];
        bindings.put(filter.weights().variable(0, 0), 1.0).unwrap();
        bindings.put(filter.bias().unwrap(), 0.0).unwrap();

        let x = Vector::from([0.5, -1.25, 3.0, 7.5, -0.125, 2.0]);
        let (out, _) = conv.evaluate(&x, &bindings).unwrap();
        assert_eq!(out, x);
    }

    #[test]
    fn filters_must_share_one_size() {
        let mut model = ParameterModel::new();
        let geometry = FilterGeometry::new(ImageShape::new(1, 4, 4).unwrap(), 2, 2).unwrap();
        let a = Filter::new(model.allocate_matrix(2, 2).unwrap(), None);
        let b = Filter::new(model.allocate_matrix(3, 2).unwrap(), None);
        assert!(matches!(
            Convolution::new(geometry, vec![a, b], Activation::ReLU),
            Err(Error::InvalidShape(_))
        ));
        assert!(Convolution::new(geometry, vec![], Activation::ReLU).is_err());
    }

    #[test]
    fn filters_must_not_share_parameters() {
        let mut model = ParameterModel::new();
        let geometry = FilterGeometry::new(ImageShape::new(1, 3, 3).unwrap(), 2, 2).unwrap();
        let weights = model.allocate_matrix(2, 2).unwrap();
        let bias = model.allocate_scalar();
        let other = model.allocate_matrix(2, 2).unwrap();

        let shared_weights = vec![Filter::new(weights, None), Filter::new(weights, None)];
        assert!(matches!(
            Convolution::new(geometry, shared_weights, Activation::Tanh),
            Err(Error::InvalidConfig(_))
        ));
        let shared_bias = vec![Filter::new(weights, Some(bias)), Filter::new(other, Some(bias))];
        assert!(matches!(
            Convolution::new(geometry, shared_bias, Activation::Tanh),
            Err(Error::InvalidConfig(_))
        ));
        let disjoint = vec![Filter::new(weights, Some(bias)), Filter::new(other, None)];
        assert!(Convolution::new(geometry, disjoint, Activation::Tanh).is_ok());
    }

    #[test]
    fn huge_filter_counts_are_rejected_before_allocating() {
        let mut model = ParameterModel::new();
        let geometry = FilterGeometry::new(ImageShape::new(4, 3, 3).unwrap(), 2, 2).unwrap();
        let filters = usize::MAX / 2;
        let err = Convolution::allocate(&mut model, geometry, filters, Activation::ReLU, true)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(model.size(), 0);
    }

    #[test]
    fn output_blocks_are_ordered_channel_then_filter() {
        let image = ImageShape::new(2, 3, 3).unwrap();
        let (conv, bindings) = seeded(image, 2, 2, 3, Activation::Identity);
        assert_eq!(conv.output_len(), 2 * 3 * 4);

        let x: Vector = (0..18).map(|i| i as f64 * 0.1).collect();
        let (out, _) = conv.evaluate(&x, &bindings).unwrap();

        // Block (c=1, f=2) computed directly from the filter operator.
        let filter = conv.filters()[2];
        let w = bindings.matrix(filter.weights()).unwrap();
        let b = bindings.get(filter.bias().unwrap()).unwrap();
        let op = FilterOperator::new(conv.geometry());
        let direct = op.apply(w.as_slice(), &x.as_slice()[9..18]);
        let offset = (3 + 2) * 4;
        for k in 0..4 {
            assert!((out[offset + k] - (direct[k] + b)).abs() < 1e-12);
        }
    }

    #[test]
    fn input_jacobian_is_block_diagonal_by_channel() {
        let image = ImageShape::new(2, 3, 3).unwrap();
        let (conv, bindings) = seeded(image, 2, 2, 2, Activation::Tanh);
        let x: Vector = (0..18).map(|i| (i as f64 * 0.37).sin()).collect();
        let (_, mut cache) = conv.evaluate(&x, &bindings).unwrap();
        let jac = conv.derivative_wrt_input(&x, &mut cache, &bindings).unwrap();

        // Rows of channel 0 never read channel 1 and vice versa.
        for row in 0..8 {
            for col in 9..18 {
                assert_eq!(jac[(row, col)], 0.0);
            }
        }
        for row in 8..16 {
            for col in 0..9 {
                assert_eq!(jac[(row, col)], 0.0);
            }
        }
    }

    #[test]
    fn local_derivatives_match_the_expression() {
        let image = ImageShape::new(2, 3, 4).unwrap();
        let (conv, bindings) = seeded(image, 2, 3, 2, Activation::Sigmoid);
        let x: Vector = (0..24).map(|i| (i as f64 * 0.71).cos()).collect();
        let (out, mut cache) = conv.evaluate(&x, &bindings).unwrap();

        let expr = conv.expression(VectorExpr::constant(x.clone())).unwrap();
        let value = expr.evaluate(&bindings).unwrap();
        for i in 0..out.len() {
            assert!((out[i] - value[i]).abs() < 1e-12);
        }

        for v in conv.variables() {
            let local = conv
                .derivative_wrt_parameter(&x, v, &mut cache, &bindings)
                .unwrap();
            let symbolic = expr.partial_derivative(v).unwrap().evaluate(&bindings).unwrap();
            for i in 0..local.len() {
                assert!((local[i] - symbolic[i]).abs() < 1e-12, "{v} row {i}");
            }
        }
    }
}
