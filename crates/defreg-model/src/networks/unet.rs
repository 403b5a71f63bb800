//! Encoder-decoder backbones producing per-voxel logits.
//!
//! Each spatial extent of the input must be divisible by
//! [`required_divisor`](Unet::required_divisor) (4 for the small
//! encoder-decoder, 16 for the U-nets) so the upsampling path lands on the
//! input grid again. This is not checked.

use burn::prelude::*;
use defreg_core::Dimension;
use super::block::{Activation, ConvBnRel, ConvBnRelConfig};

fn same(in_channels: usize, out_channels: usize, stride: usize, bn: bool, activation: Activation) -> ConvBnRelConfig {
    ConvBnRelConfig::new(in_channels, out_channels, 3)
        .with_stride(stride)
        .with_batch_norm(bn)
        .with_activation(activation)
}

fn up(in_channels: usize, out_channels: usize, bn: bool, activation: Activation) -> ConvBnRelConfig {
    ConvBnRelConfig::new(in_channels, out_channels, 2)
        .with_stride(2)
        .with_same_padding(false)
        .with_batch_norm(bn)
        .with_activation(activation)
        .transposed()
}

/// Two strided down steps and two transposed up steps (downsampling by 4).
#[derive(Module, Debug)]
pub struct EncoderDecoderSmall<B: Backend> {
    down_1: ConvBnRel<B>,
    down_2: ConvBnRel<B>,
    up_2: ConvBnRel<B>,
    up_1: ConvBnRel<B>,
}

impl<B: Backend> EncoderDecoderSmall<B> {
    pub fn new(dim: Dimension, in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let down = |i, o| ConvBnRelConfig::new(i, o, 4).with_stride(2);
        Self {
            down_1: down(in_channels, 8).init(dim, device),
            down_2: down(8, 16).init(dim, device),
            up_2: down(16, 8).transposed().init(dim, device),
            up_1: down(8, out_channels)
                .transposed()
                .with_activation(Activation::None)
                .init(dim, device),
        }
    }

    pub fn required_divisor(&self) -> usize {
        4
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let d1 = self.down_1.forward(x);
        let d2 = self.down_2.forward(d1);
        let u2 = self.up_2.forward(d2);
        self.up_1.forward(u2)
    }
}

/// Four-level U-net with skip connections (downsampling by 16).
#[derive(Module, Debug)]
pub struct Unet<B: Backend> {
    down_1: ConvBnRel<B>,
    down_2_1: ConvBnRel<B>,
    down_2_2: ConvBnRel<B>,
    down_4_1: ConvBnRel<B>,
    down_4_2: ConvBnRel<B>,
    down_8_1: ConvBnRel<B>,
    down_8_2: ConvBnRel<B>,
    down_16: ConvBnRel<B>,
    up_8_1: ConvBnRel<B>,
    up_8_2: ConvBnRel<B>,
    up_4_1: ConvBnRel<B>,
    up_4_2: ConvBnRel<B>,
    up_2_1: ConvBnRel<B>,
    up_2_2: ConvBnRel<B>,
    up_1_1: ConvBnRel<B>,
    up_1_2: ConvBnRel<B>,
}

impl<B: Backend> Unet<B> {
    pub fn new(
        dim: Dimension,
        in_channels: usize,
        out_channels: usize,
        batch_norm: bool,
        device: &B::Device,
    ) -> Self {
        let relu = Activation::Relu;
        let leaky = Activation::LeakyRelu;
        let none = Activation::None;
        let bn = batch_norm;

        Self {
            down_1: same(in_channels, 16, 1, bn, relu).init(dim, device),
            down_2_1: same(16, 32, 2, bn, relu).init(dim, device),
            down_2_2: same(32, 32, 1, bn, relu).init(dim, device),
            down_4_1: same(32, 32, 2, bn, relu).init(dim, device),
            down_4_2: same(32, 32, 1, bn, relu).init(dim, device),
            down_8_1: same(32, 64, 2, bn, relu).init(dim, device),
            down_8_2: same(64, 64, 1, bn, relu).init(dim, device),
            down_16: same(64, 64, 2, bn, relu).init(dim, device),
            up_8_1: up(64, 64, bn, leaky).init(dim, device),
            up_8_2: same(128, 64, 1, bn, leaky).init(dim, device),
            up_4_1: up(64, 64, bn, leaky).init(dim, device),
            up_4_2: same(96, 32, 1, bn, leaky).init(dim, device),
            up_2_1: up(32, 32, bn, leaky).init(dim, device),
            up_2_2: same(64, 8, 1, bn, leaky).init(dim, device),
            up_1_1: up(8, 8, bn, none).init(dim, device),
            up_1_2: same(24, out_channels, 1, bn, none).init(dim, device),
        }
    }

    pub fn required_divisor(&self) -> usize {
        16
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let d1 = self.down_1.forward(x);
        let d2 = self.down_2_2.forward(self.down_2_1.forward(d1.clone()));
        let d4 = self.down_4_2.forward(self.down_4_1.forward(d2.clone()));
        let d8 = self.down_8_2.forward(self.down_8_1.forward(d4.clone()));
        let d16 = self.down_16.forward(d8.clone());

        let x = self.up_8_1.forward(d16);
        let x = self.up_8_2.forward(Tensor::cat(vec![d8, x], 1));
        let x = self.up_4_1.forward(x);
        let x = self.up_4_2.forward(Tensor::cat(vec![d4, x], 1));
        let x = self.up_2_1.forward(x);
        let x = self.up_2_2.forward(Tensor::cat(vec![d2, x], 1));
        let x = self.up_1_1.forward(x);
        self.up_1_2.forward(Tensor::cat(vec![d1, x], 1))
    }
}

/// The U-net layout without skip connections.
#[derive(Module, Debug)]
pub struct UnetNoSkip<B: Backend> {
    down: Vec<ConvBnRel<B>>,
    up: Vec<ConvBnRel<B>>,
}

impl<B: Backend> UnetNoSkip<B> {
    pub fn new(
        dim: Dimension,
        in_channels: usize,
        out_channels: usize,
        batch_norm: bool,
        device: &B::Device,
    ) -> Self {
        let relu = Activation::Relu;
        let leaky = Activation::LeakyRelu;
        let none = Activation::None;
        let bn = batch_norm;

        let down = vec![
            same(in_channels, 16, 1, bn, relu),
            same(16, 32, 2, bn, relu),
            same(32, 32, 1, bn, relu),
            same(32, 32, 2, bn, relu),
            same(32, 32, 1, bn, relu),
            same(32, 64, 2, bn, relu),
            same(64, 64, 1, bn, relu),
            same(64, 64, 2, bn, relu),
        ];
        let up_path = vec![
            up(64, 64, bn, leaky),
            same(64, 64, 1, bn, leaky),
            up(64, 64, bn, leaky),
            same(64, 32, 1, bn, leaky),
            up(32, 32, bn, leaky),
            same(32, 8, 1, bn, leaky),
            up(8, 8, bn, none),
            same(8, out_channels, 1, bn, none),
        ];

        Self {
            down: down.iter().map(|c| c.init(dim, device)).collect(),
            up: up_path.iter().map(|c| c.init(dim, device)).collect(),
        }
    }

    pub fn required_divisor(&self) -> usize {
        16
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.down
            .iter()
            .chain(self.up.iter())
            .fold(x, |x, layer| layer.forward(x))
    }
}
