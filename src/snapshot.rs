//! Network persistence (feature: `serde`).
//!
//! A snapshot is the static layer description plus the flat parameter values, in a versioned
//! JSON format. Internal layer structs are never serialized directly; restoring replays the
//! description through [`NetworkBuilder`], which allocates parameters in the same order they
//! were captured in.
//!
//! Everything read back is validated: format version, at least one layer, chain shapes,
//! parameter count, and that all parameters are finite.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::bindings::Bindings;
use crate::builder::NetworkBuilder;
use crate::geometry::ImageShape;
use crate::layer::{Layer, LayerOps};
use crate::model::ParameterModel;
use crate::network::FeedForwardNetwork;
use crate::{Error, Result};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub format_version: u32,
    pub input_len: usize,
    pub layers: Vec<LayerDescription>,
    /// Values of the network's variables, bottom layer first, in allocation order.
    pub parameters: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerDescription {
    FullyConnected {
        output_len: usize,
        activation: SerializedActivation,
        bias: bool,
    },
    Convolution {
        channels: usize,
        height: usize,
        width: usize,
        filter_height: usize,
        filter_width: usize,
        filters: usize,
        activation: SerializedActivation,
        bias: bool,
    },
    MaxPool {
        channels: usize,
        height: usize,
        width: usize,
        tile_height: usize,
        tile_width: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedActivation {
    Identity,
    Sigmoid,
    Tanh,
    Relu,
    LeakyRelu { alpha: f64 },
}

impl From<Activation> for SerializedActivation {
    fn from(value: Activation) -> Self {
        match value {
            Activation::Identity => SerializedActivation::Identity,
            Activation::Sigmoid => SerializedActivation::Sigmoid,
            Activation::Tanh => SerializedActivation::Tanh,
            Activation::ReLU => SerializedActivation::Relu,
            Activation::LeakyReLU { alpha } => SerializedActivation::LeakyRelu { alpha },
        }
    }
}

impl From<SerializedActivation> for Activation {
    fn from(value: SerializedActivation) -> Self {
        match value {
            SerializedActivation::Identity => Activation::Identity,
            SerializedActivation::Sigmoid => Activation::Sigmoid,
            SerializedActivation::Tanh => Activation::Tanh,
            SerializedActivation::Relu => Activation::ReLU,
            SerializedActivation::LeakyRelu { alpha } => Activation::LeakyReLU { alpha },
        }
    }
}

impl LayerDescription {
    pub fn describe(layer: &Layer) -> Result<Self> {
        Ok(match layer {
            Layer::FullyConnected(l) => LayerDescription::FullyConnected {
                output_len: l.output_len(),
                activation: l.activation().into(),
                bias: l.bias().is_some(),
            },
            Layer::Convolution(l) => {
                let bias = l.filters()[0].bias().is_some();
                if l.filters().iter().any(|f| f.bias().is_some() != bias) {
                    return Err(Error::Unsupported(
                        "snapshot of a convolution whose filters mix biased and unbiased"
                            .to_owned(),
                    ));
                }
                let g = l.geometry();
                LayerDescription::Convolution {
                    channels: g.image().channels(),
                    height: g.image().height(),
                    width: g.image().width(),
                    filter_height: g.filter_height(),
                    filter_width: g.filter_width(),
                    filters: l.filters().len(),
                    activation: l.activation().into(),
                    bias,
                }
            }
            Layer::MaxPool(l) => {
                let g = l.geometry();
                LayerDescription::MaxPool {
                    channels: g.image().channels(),
                    height: g.image().height(),
                    width: g.image().width(),
                    tile_height: g.tile_height(),
                    tile_width: g.tile_width(),
                }
            }
        })
    }

    fn append_to(self, builder: NetworkBuilder) -> Result<NetworkBuilder> {
        match self {
            LayerDescription::FullyConnected {
                output_len,
                activation,
                bias,
            } => builder.add_fully_connected(output_len, activation.into(), bias),
            LayerDescription::Convolution {
                channels,
                height,
                width,
                filter_height,
                filter_width,
                filters,
                activation,
                bias,
            } => builder.add_convolution(
                ImageShape::new(channels, height, width)?,
                filter_height,
                filter_width,
                filters,
                activation.into(),
                bias,
            ),
            LayerDescription::MaxPool {
                channels,
                height,
                width,
                tile_height,
                tile_width,
            } => builder.add_max_pool(
                ImageShape::new(channels, height, width)?,
                tile_height,
                tile_width,
            ),
        }
    }
}

impl NetworkSnapshot {
    pub fn capture(network: &FeedForwardNetwork, bindings: &Bindings) -> Result<Self> {
        let layers = network
            .layers()
            .iter()
            .map(LayerDescription::describe)
            .collect::<Result<Vec<_>>>()?;
        let parameters = network
            .variables()
            .into_iter()
            .map(|v| bindings.get(v))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            input_len: network.input_len(),
            layers,
            parameters,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported snapshot format_version {}; expected {}",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        if self.layers.is_empty() {
            return Err(Error::InvalidData(
                "snapshot must have at least one layer".to_owned(),
            ));
        }
        if self.parameters.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "parameters must contain only finite values".to_owned(),
            ));
        }
        Ok(())
    }

    /// Rebuild the network with a fresh model and bindings holding the captured values.
    pub fn restore(&self) -> Result<(FeedForwardNetwork, ParameterModel, Bindings)> {
        self.validate()?;

        let mut builder = NetworkBuilder::new(self.input_len)
            .map_err(|e| Error::InvalidData(format!("invalid input_len: {e}")))?;
        for (i, layer) in self.layers.iter().enumerate() {
            builder = layer
                .append_to(builder)
                .map_err(|e| Error::InvalidData(format!("layer {i} invalid: {e}")))?;
        }
        let (network, model) = builder
            .build()
            .map_err(|e| Error::InvalidData(format!("invalid network: {e}")))?;

        let mut bindings = model.create_bindings();
        let variables = network.variables();
        if variables.len() != self.parameters.len() {
            return Err(Error::InvalidData(format!(
                "snapshot has {} parameters but the layers allocate {}",
                self.parameters.len(),
                variables.len()
            )));
        }
        for (v, &value) in variables.into_iter().zip(&self.parameters) {
            bindings.put(v, value)?;
        }
        Ok((network, model, bindings))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::InvalidData(format!("failed to serialize snapshot: {e}")))
    }

    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidData(format!("failed to serialize snapshot: {e}")))
    }

    /// Parse and validate a snapshot.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse snapshot json: {e}")))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", p.display())))
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::InvalidData(format!("failed to read {}: {e}", p.display())))?;
        Self::from_json_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::Vector;

    fn small_cnn() -> (FeedForwardNetwork, Bindings) {
        let (network, model) = NetworkBuilder::new(16)
            .unwrap()
            .add_convolution(
                ImageShape::new(1, 4, 4).unwrap(),
                3,
                3,
                2,
                Activation::LeakyReLU { alpha: 0.01 },
                true,
            )
            .unwrap()
            .add_max_pool(ImageShape::new(2, 2, 2).unwrap(), 2, 2)
            .unwrap()
            .add_fully_connected(1, Activation::Sigmoid, false)
            .unwrap()
            .build()
            .unwrap();
        let mut bindings = model.create_bindings();
        for (i, v) in bindings.as_mut_slice().iter_mut().enumerate() {
            *v = (i as f64 * 0.61).sin();
        }
        (network, bindings)
    }

    #[test]
    fn json_roundtrip_restores_an_equivalent_network() {
        let (network, bindings) = small_cnn();
        let json = NetworkSnapshot::capture(&network, &bindings)
            .unwrap()
            .to_json_string_pretty()
            .unwrap();

        let (restored, model, restored_bindings) =
            NetworkSnapshot::from_json_str(&json).unwrap().restore().unwrap();
        assert_eq!(model.size(), bindings.len());
        assert_eq!(restored, network);

        let x: Vector = (0..16).map(|i| i as f64 / 16.0).collect();
        assert_eq!(
            restored.evaluate(&x, &restored_bindings).unwrap(),
            network.evaluate(&x, &bindings).unwrap()
        );
    }

    #[test]
    fn rejects_unknown_version() {
        let bad = r#"{"format_version":999,"input_len":1,"layers":[],"parameters":[]}"#;
        let err = NetworkSnapshot::from_json_str(bad).unwrap_err();
        assert!(format!("{err}").contains("format_version"));
    }

    #[test]
    fn rejects_wrong_parameter_count() {
        let (network, bindings) = small_cnn();
        let mut snapshot = NetworkSnapshot::capture(&network, &bindings).unwrap();
        snapshot.parameters.pop();
        assert!(matches!(snapshot.restore(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn oversized_images_are_invalid_data() {
        let json = format!(
            r#"{{"format_version":{SNAPSHOT_FORMAT_VERSION},"input_len":16,"layers":[{{"kind":"max_pool","channels":{big},"height":{big},"width":4,"tile_height":1,"tile_width":1}}],"parameters":[]}}"#,
            big = 1u64 << 33
        );
        let snapshot = NetworkSnapshot::from_json_str(&json).unwrap();
        assert!(matches!(snapshot.restore(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn rejects_broken_chains() {
        let snapshot = NetworkSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            input_len: 4,
            layers: vec![LayerDescription::MaxPool {
                channels: 1,
                height: 3,
                width: 3,
                tile_height: 1,
                tile_width: 1,
            }],
            parameters: vec![],
        };
        let err = snapshot.restore().unwrap_err();
        assert!(format!("{err}").contains("layer 0"));
    }
}
