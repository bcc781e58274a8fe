//! Network builder.
//!
//! `NetworkBuilder` threads one [`ParameterModel`] through layer construction, so every layer's
//! parameters are allocated in order and never overlap. It also tracks the running output
//! length and rejects layers that do not fit it.
//!
//! Parameters are allocated layer by layer: a fully-connected layer takes its weights then its
//! bias, a convolution takes each filter's weights then that filter's bias. Replaying the same
//! builder calls always reproduces the same indices.

use crate::activation::Activation;
use crate::geometry::{FilterGeometry, ImageShape, PoolGeometry};
use crate::layer::{Convolution, FullyConnected, Layer, LayerOps, MaxPool};
use crate::model::ParameterModel;
use crate::network::FeedForwardNetwork;
use crate::{Error, Result};

/// Builder for a [`FeedForwardNetwork`].
///
/// ```rust
/// use rust_backprop::{Activation, NetworkBuilder};
///
/// # fn main() -> rust_backprop::Result<()> {
/// let (network, model) = NetworkBuilder::new(4)?
///     .add_fully_connected(8, Activation::Tanh, true)?
///     .add_fully_connected(2, Activation::Identity, false)?
///     .build()?;
/// assert_eq!(network.output_len(), 2);
/// assert_eq!(model.size(), 4 * 8 + 8 + 8 * 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    model: ParameterModel,
    input_len: usize,
    layers: Vec<Layer>,
}

impl NetworkBuilder {
    /// Start a network that accepts inputs of length `input_len`, with a fresh model.
    pub fn new(input_len: usize) -> Result<Self> {
        Self::with_model(ParameterModel::new(), input_len)
    }

    /// Like [`NetworkBuilder::new`], but keep allocating from an existing model.
    pub fn with_model(model: ParameterModel, input_len: usize) -> Result<Self> {
        if input_len == 0 {
            return Err(Error::InvalidConfig("input_len must be > 0".to_owned()));
        }
        Ok(Self {
            model,
            input_len,
            layers: Vec::new(),
        })
    }

    /// Length of the values the next layer will receive.
    pub fn current_len(&self) -> usize {
        self.layers
            .last()
            .map_or(self.input_len, |l| l.output_len())
    }

    pub fn add_fully_connected(
        mut self,
        output_len: usize,
        activation: Activation,
        bias: bool,
    ) -> Result<Self> {
        if output_len == 0 {
            return Err(Error::InvalidConfig(
                "layer output_len must be > 0".to_owned(),
            ));
        }
        let input_len = self.current_len();
        let layer = FullyConnected::allocate(
            &mut self.model,
            input_len,
            output_len,
            activation,
            bias,
        )?;
        self.layers.push(layer.into());
        Ok(self)
    }

    /// `image` describes how the current values are laid out and must match their length.
    pub fn add_convolution(
        mut self,
        image: ImageShape,
        filter_height: usize,
        filter_width: usize,
        filters: usize,
        activation: Activation,
        bias: bool,
    ) -> Result<Self> {
        self.check_image(image)?;
        let geometry = FilterGeometry::new(image, filter_height, filter_width)?;
        let layer = Convolution::allocate(&mut self.model, geometry, filters, activation, bias)?;
        self.layers.push(layer.into());
        Ok(self)
    }

    pub fn add_max_pool(
        mut self,
        image: ImageShape,
        tile_height: usize,
        tile_width: usize,
    ) -> Result<Self> {
        self.check_image(image)?;
        let geometry = PoolGeometry::new(image, tile_height, tile_width)?;
        self.layers.push(MaxPool::new(geometry).into());
        Ok(self)
    }

    /// The network together with the model its parameters came from.
    pub fn build(self) -> Result<(FeedForwardNetwork, ParameterModel)> {
        let network = FeedForwardNetwork::new(self.layers)?;
        Ok((network, self.model))
    }

    fn check_image(&self, image: ImageShape) -> Result<()> {
        if image.len() != self.current_len() {
            return Err(Error::InvalidShape(format!(
                "{} x {} x {} image does not match {} incoming values",
                image.channels(),
                image.height(),
                image.width(),
                self.current_len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_pool_dense_stack_chains() {
        let image = ImageShape::new(1, 6, 6).unwrap();
        let (network, model) = NetworkBuilder::new(36)
            .unwrap()
            .add_convolution(image, 3, 3, 2, Activation::ReLU, true)
            .unwrap()
            .add_max_pool(ImageShape::new(2, 4, 4).unwrap(), 2, 2)
            .unwrap()
            .add_fully_connected(3, Activation::Identity, true)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(network.num_layers(), 3);
        assert_eq!(network.output_len(), 3);
        // 2 filters of 3x3 + bias, then 8 -> 3 dense with bias
        assert_eq!(model.size(), 2 * 10 + 8 * 3 + 3);
        assert_eq!(network.variables().len(), model.size());
    }

    #[test]
    fn dense_layers_read_the_previous_output_len() {
        let (network, _) = NetworkBuilder::new(5)
            .unwrap()
            .add_fully_connected(7, Activation::Tanh, true)
            .unwrap()
            .add_fully_connected(2, Activation::Sigmoid, false)
            .unwrap()
            .build()
            .unwrap();
        let lens: Vec<_> = network
            .layers()
            .iter()
            .map(|l| (l.input_len(), l.output_len()))
            .collect();
        assert_eq!(lens, vec![(5, 7), (7, 2)]);
    }

    #[test]
    fn mismatched_image_is_rejected() {
        let err = NetworkBuilder::new(10)
            .unwrap()
            .add_max_pool(ImageShape::new(1, 3, 3).unwrap(), 1, 1)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }

    #[test]
    fn empty_network_and_zero_sizes_are_rejected() {
        assert!(NetworkBuilder::new(0).is_err());
        assert!(NetworkBuilder::new(3).unwrap().build().is_err());
        assert!(
            NetworkBuilder::new(3)
                .unwrap()
                .add_fully_connected(0, Activation::Tanh, true)
                .is_err()
        );
    }

    #[test]
    fn continuing_a_model_keeps_indices_disjoint() {
        let mut model = ParameterModel::new();
        let first = model.allocate_scalar();
        let (network, model) = NetworkBuilder::with_model(model, 2)
            .unwrap()
            .add_fully_connected(2, Activation::Tanh, false)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(model.size(), 5);
        assert!(!network.variables().contains(&first));
        assert_eq!(network.variables()[0].index(), 1);
    }
}
