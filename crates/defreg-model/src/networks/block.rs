//! Convolution + batch normalization + activation building block.

use burn::module::Ignored;
use burn::nn::conv::{Conv3d, Conv3dConfig, ConvTranspose3d, ConvTranspose3dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig3d};
use burn::prelude::*;
use burn::tensor::activation;
use defreg_core::Dimension;

/// Nonlinearity applied after the (optional) normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    Relu,
    LeakyRelu,
    None,
}

impl Activation {
    pub fn apply<B: Backend>(self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        match self {
            Self::Relu => activation::relu(x),
            Self::LeakyRelu => activation::leaky_relu(x, 0.01),
            Self::None => x,
        }
    }
}

/// Geometry of a [`ConvBnRel`] block, expanded per dimension at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvBnRelConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    /// Pad by `(kernel_size - 1) / 2` on each side.
    pub same_padding: bool,
    pub batch_norm: bool,
    /// Transposed convolution instead of a regular one.
    pub transposed: bool,
    pub activation: Activation,
}

impl ConvBnRelConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            same_padding: true,
            batch_norm: false,
            transposed: false,
            activation: Activation::Relu,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_same_padding(mut self, same_padding: bool) -> Self {
        self.same_padding = same_padding;
        self
    }

    pub fn with_batch_norm(mut self, batch_norm: bool) -> Self {
        self.batch_norm = batch_norm;
        self
    }

    pub fn transposed(mut self) -> Self {
        self.transposed = true;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn init<B: Backend>(&self, dim: Dimension, device: &B::Device) -> ConvBnRel<B> {
        let padding = if self.same_padding {
            (self.kernel_size - 1) / 2
        } else {
            0
        };
        let kernel = dim.kernel(self.kernel_size);
        let stride = dim.stride(self.stride);
        let [p0, p1, p2] = dim.padding(padding);

        let (conv, conv_transposed) = if self.transposed {
            let layer = ConvTranspose3dConfig::new([self.in_channels, self.out_channels], kernel)
                .with_stride(stride)
                .with_padding([p0, p1, p2])
                .init(device);
            (None, Some(layer))
        } else {
            let layer = Conv3dConfig::new([self.in_channels, self.out_channels], kernel)
                .with_stride(stride)
                .with_padding(PaddingConfig3d::Explicit(p0, p1, p2))
                .init(device);
            (Some(layer), None)
        };

        let bn = self.batch_norm.then(|| {
            BatchNormConfig::new(self.out_channels)
                .with_epsilon(1e-4)
                .init(device)
        });

        ConvBnRel {
            conv,
            conv_transposed,
            bn,
            activation: Ignored(self.activation),
        }
    }
}

/// `conv -> [batch norm] -> activation`.
#[derive(Module, Debug)]
pub struct ConvBnRel<B: Backend> {
    conv: Option<Conv3d<B>>,
    conv_transposed: Option<ConvTranspose3d<B>>,
    bn: Option<BatchNorm<B, 3>>,
    activation: Ignored<Activation>,
}

impl<B: Backend> ConvBnRel<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = match (&self.conv, &self.conv_transposed) {
            (Some(conv), _) => conv.forward(x),
            (None, Some(conv)) => conv.forward(x),
            (None, None) => x,
        };
        let x = match &self.bn {
            Some(bn) => bn.forward(x),
            None => x,
        };
        self.activation.0.apply(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_strided_block_halves_used_axes() {
        let device = Default::default();
        let block = ConvBnRelConfig::new(1, 4, 3)
            .with_stride(2)
            .with_batch_norm(true)
            .init::<Backend>(Dimension::Two, &device);
        let x = Tensor::<Backend, 5>::ones([1, 1, 1, 16, 8], &device);
        assert_eq!(block.forward(x).dims(), [1, 4, 1, 8, 4]);
    }

    #[test]
    fn test_transposed_block_doubles_used_axes() {
        let device = Default::default();
        let block = ConvBnRelConfig::new(2, 3, 2)
            .with_stride(2)
            .with_same_padding(false)
            .transposed()
            .with_activation(Activation::None)
            .init::<Backend>(Dimension::One, &device);
        let x = Tensor::<Backend, 5>::ones([1, 2, 1, 1, 5], &device);
        assert_eq!(block.forward(x).dims(), [1, 3, 1, 1, 10]);
    }
}
