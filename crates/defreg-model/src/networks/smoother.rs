//! Runtime-selected network producing the multi-Gaussian weight field.

use std::fmt;
use std::str::FromStr;
use burn::module::Ignored;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use defreg_core::{Dimension, RegistrationError, Result};
use super::simple::{SimpleConsistent, SimpleConsistentConfig};
use super::softmax::weighted_softmax;
use super::unet::{EncoderDecoderSmall, Unet, UnetNoSkip};

/// Backbone choice for the smoother network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmootherNetworkKind {
    SimpleConsistent,
    Unet,
    UnetNoSkip,
    EncoderDecoderSmall,
}

impl SmootherNetworkKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::SimpleConsistent => "simple_consistent",
            Self::Unet => "unet",
            Self::UnetNoSkip => "unet_no_skip",
            Self::EncoderDecoderSmall => "encoder_decoder_small",
        }
    }
}

impl FromStr for SmootherNetworkKind {
    type Err = RegistrationError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "simple_consistent" => Ok(Self::SimpleConsistent),
            "unet" => Ok(Self::Unet),
            "unet_no_skip" => Ok(Self::UnetNoSkip),
            "encoder_decoder_small" => Ok(Self::EncoderDecoderSmall),
            other => Err(RegistrationError::unknown_identifier("smoother network", other)),
        }
    }
}

impl fmt::Display for SmootherNetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings shared by all backbones; the `simple` block also carries the
/// layer geometry of the simple consistent network.
#[derive(Debug, Clone)]
pub struct SmootherNetworkConfig {
    pub kind: SmootherNetworkKind,
    pub simple: SimpleConsistentConfig,
}

impl SmootherNetworkConfig {
    pub fn new(kind: SmootherNetworkKind, in_channels: usize, nr_of_gaussians: usize) -> Self {
        Self {
            kind,
            simple: SimpleConsistentConfig::new(in_channels, nr_of_gaussians),
        }
    }

    pub fn with_simple(mut self, simple: SimpleConsistentConfig) -> Self {
        self.simple = simple;
        self
    }

    pub fn init<B: Backend>(&self, dim: Dimension, device: &B::Device) -> Result<SmootherNetwork<B>> {
        let in_channels = self.simple.in_channels;
        let out_channels = self.simple.nr_of_gaussians;
        let bn = self.simple.use_batch_normalization;

        let mut network = SmootherNetwork {
            simple: None,
            unet: None,
            unet_no_skip: None,
            encoder_decoder_small: None,
            kind: Ignored(self.kind),
            global_weights: Ignored(None),
        };
        match self.kind {
            SmootherNetworkKind::SimpleConsistent => {
                network.simple = Some(self.simple.init(dim, device)?);
            }
            SmootherNetworkKind::Unet => {
                network.unet = Some(Unet::new(dim, in_channels, out_channels, bn, device));
            }
            SmootherNetworkKind::UnetNoSkip => {
                network.unet_no_skip = Some(UnetNoSkip::new(dim, in_channels, out_channels, bn, device));
            }
            SmootherNetworkKind::EncoderDecoderSmall => {
                network.encoder_decoder_small =
                    Some(EncoderDecoderSmall::new(dim, in_channels, out_channels, device));
            }
        }

        if self.kind != SmootherNetworkKind::SimpleConsistent && self.simple.estimate_around_global_weights {
            let weights = if self.simple.global_weights.is_empty() {
                vec![1.0 / out_channels as f64; out_channels]
            } else if self.simple.global_weights.len() == out_channels {
                self.simple.global_weights.clone()
            } else {
                return Err(RegistrationError::invalid_configuration(format!(
                    "{} global weights given for {} Gaussians",
                    self.simple.global_weights.len(),
                    out_channels
                )));
            };
            network.global_weights = Ignored(Some(weights));
        }

        Ok(network)
    }
}

/// Weight-estimating network; exactly one backbone is present.
#[derive(Module, Debug)]
pub struct SmootherNetwork<B: Backend> {
    simple: Option<SimpleConsistent<B>>,
    unet: Option<Unet<B>>,
    unet_no_skip: Option<UnetNoSkip<B>>,
    encoder_decoder_small: Option<EncoderDecoderSmall<B>>,
    kind: Ignored<SmootherNetworkKind>,
    global_weights: Ignored<Option<Vec<f64>>>,
}

impl<B: Backend> SmootherNetwork<B> {
    pub fn kind(&self) -> SmootherNetworkKind {
        self.kind.0
    }

    /// Divisor each spatial extent of the input must honour.
    pub fn required_divisor(&self) -> usize {
        match (&self.unet, &self.unet_no_skip, &self.encoder_decoder_small) {
            (Some(net), _, _) => net.required_divisor(),
            (_, Some(net), _) => net.required_divisor(),
            (_, _, Some(net)) => net.required_divisor(),
            _ => 1,
        }
    }

    /// Map an image `[B, C, A0, A1, A2]` to kernel weights
    /// `[B, K, A0, A1, A2]` (non-negative, summing to one over `K`).
    pub fn forward(&self, x: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        if let Some(net) = &self.simple {
            return net.forward(x);
        }
        let logits = if let Some(net) = &self.unet {
            net.forward(x)
        } else if let Some(net) = &self.unet_no_skip {
            net.forward(x)
        } else if let Some(net) = &self.encoder_decoder_small {
            net.forward(x)
        } else {
            return Err(RegistrationError::invalid_configuration(
                "smoother network has no backbone",
            ));
        };
        weighted_softmax(logits, self.global_weights.0.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_kind_names() {
        for kind in [
            SmootherNetworkKind::SimpleConsistent,
            SmootherNetworkKind::Unet,
            SmootherNetworkKind::UnetNoSkip,
            SmootherNetworkKind::EncoderDecoderSmall,
        ] {
            assert_eq!(kind.name().parse::<SmootherNetworkKind>().unwrap(), kind);
        }
        assert!(matches!(
            "resnet".parse::<SmootherNetworkKind>(),
            Err(RegistrationError::UnknownIdentifier { .. })
        ));
    }

    #[test]
    fn test_unet_weights_are_normalized() {
        let device = Default::default();
        let net = SmootherNetworkConfig::new(SmootherNetworkKind::EncoderDecoderSmall, 1, 3)
            .init::<Backend>(Dimension::Two, &device)
            .unwrap();
        assert_eq!(net.required_divisor(), 4);
        let x = Tensor::<Backend, 5>::ones([1, 1, 1, 8, 8], &device);
        let w = net.forward(x).unwrap();
        assert_eq!(w.dims(), [1, 3, 1, 8, 8]);
        let err: f32 = w.sum_dim(1).sub_scalar(1.0).abs().max().into_scalar();
        assert!(err < 1e-5);
    }
}
