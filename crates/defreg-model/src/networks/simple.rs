use burn::module::Ignored;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig3d};
use burn::prelude::*;
use burn::tensor::activation;
use defreg_core::{Dimension, RegistrationError};
use super::softmax::weighted_softmax;

/// Configuration for [`SimpleConsistent`].
#[derive(Config, Debug)]
pub struct SimpleConsistentConfig {
    /// Channels of the input image.
    pub in_channels: usize,
    /// Number of Gaussians, i.e. output channels.
    pub nr_of_gaussians: usize,
    /// Kernel size per layer; all entries must be odd.
    #[config(default = "vec![7, 7]")]
    pub kernel_sizes: Vec<usize>,
    /// Features of every layer but the last, which always has
    /// `nr_of_gaussians` outputs.
    #[config(default = "vec![20]")]
    pub number_of_features_per_layer: Vec<usize>,
    #[config(default = "true")]
    pub use_batch_normalization: bool,
    /// Relu between layers instead of a sigmoid.
    #[config(default = "false")]
    pub use_relu: bool,
    /// Bias the final softmax towards `global_weights`.
    #[config(default = "false")]
    pub estimate_around_global_weights: bool,
    /// Prior weights per Gaussian; empty means uniform.
    #[config(default = "Vec::new()")]
    pub global_weights: Vec<f64>,
}

impl SimpleConsistentConfig {
    /// # Errors
    /// `InvalidConfiguration` if a kernel size is even, if the layer lists
    /// disagree in length, or if the global weights do not match the number
    /// of Gaussians.
    pub fn init<B: Backend>(&self, dim: Dimension, device: &B::Device) -> defreg_core::Result<SimpleConsistent<B>> {
        if let Some(even) = self.kernel_sizes.iter().find(|&&k| k % 2 == 0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "kernel sizes need to be odd, got {even}"
            )));
        }

        let mut features = self.number_of_features_per_layer.clone();
        features.push(self.nr_of_gaussians);
        if features.len() != self.kernel_sizes.len() {
            return Err(RegistrationError::invalid_configuration(format!(
                "{} kernel sizes given for {} layers",
                self.kernel_sizes.len(),
                features.len()
            )));
        }

        let global_weights = if self.estimate_around_global_weights {
            if self.global_weights.is_empty() {
                Some(vec![1.0 / self.nr_of_gaussians as f64; self.nr_of_gaussians])
            } else if self.global_weights.len() == self.nr_of_gaussians {
                Some(self.global_weights.clone())
            } else {
                return Err(RegistrationError::invalid_configuration(format!(
                    "{} global weights given for {} Gaussians",
                    self.global_weights.len(),
                    self.nr_of_gaussians
                )));
            }
        } else {
            None
        };

        let mut convs = Vec::with_capacity(features.len());
        let mut in_channels = self.in_channels;
        for (&out_channels, &k) in features.iter().zip(&self.kernel_sizes) {
            let [p0, p1, p2] = dim.padding((k - 1) / 2);
            convs.push(
                Conv3dConfig::new([in_channels, out_channels], dim.kernel(k))
                    .with_padding(PaddingConfig3d::Explicit(p0, p1, p2))
                    .init(device),
            );
            in_channels = out_channels;
        }

        // Not applied after the last layer
        let batch_norms = if self.use_batch_normalization {
            features[..features.len() - 1]
                .iter()
                .map(|&f| BatchNormConfig::new(f).with_momentum(0.1).init(device))
                .collect()
        } else {
            Vec::new()
        };

        Ok(SimpleConsistent {
            convs,
            batch_norms,
            use_relu: Ignored(self.use_relu),
            global_weights: Ignored(global_weights),
        })
    }
}

/// Stack of same-padded convolutions followed by a (weighted) softmax over
/// the Gaussians.
#[derive(Module, Debug)]
pub struct SimpleConsistent<B: Backend> {
    convs: Vec<Conv3d<B>>,
    batch_norms: Vec<BatchNorm<B, 3>>,
    use_relu: Ignored<bool>,
    global_weights: Ignored<Option<Vec<f64>>>,
}

impl<B: Backend> SimpleConsistent<B> {
    pub fn nr_of_layers(&self) -> usize {
        self.convs.len()
    }

    /// Per-voxel weights `[B, K, A0, A1, A2]`, non-negative and summing to
    /// one over `K`.
    pub fn forward(&self, x: Tensor<B, 5>) -> defreg_core::Result<Tensor<B, 5>> {
        let last = self.convs.len() - 1;
        let mut x = x;
        for (l, conv) in self.convs.iter().enumerate() {
            x = conv.forward(x);
            if l == last {
                break;
            }
            if let Some(bn) = self.batch_norms.get(l) {
                x = bn.forward(x);
            }
            x = if self.use_relu.0 {
                activation::relu(x)
            } else {
                activation::sigmoid(x)
            };
        }
        weighted_softmax(x, self.global_weights.0.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_even_kernel_is_rejected() {
        let config = SimpleConsistentConfig::new(1, 3).with_kernel_sizes(vec![7, 4]);
        let result = config.init::<Backend>(Dimension::Two, &Default::default());
        assert!(matches!(result, Err(RegistrationError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_layer_count_mismatch() {
        let config = SimpleConsistentConfig::new(1, 3)
            .with_kernel_sizes(vec![5, 5, 5])
            .with_number_of_features_per_layer(vec![10]);
        let result = config.init::<Backend>(Dimension::Two, &Default::default());
        assert!(matches!(result, Err(RegistrationError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_output_is_a_partition_of_unity() {
        let device = Default::default();
        let net = SimpleConsistentConfig::new(1, 4)
            .init::<Backend>(Dimension::Two, &device)
            .unwrap();
        assert_eq!(net.nr_of_layers(), 2);
        let x = Tensor::<Backend, 5>::random(
            [1, 1, 1, 10, 12],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let w = net.forward(x).unwrap();
        assert_eq!(w.dims(), [1, 4, 1, 10, 12]);
        let sums = w.clone().sum_dim(1);
        let err: f32 = sums.sub_scalar(1.0).abs().max().into_scalar();
        assert!(err < 1e-5);
        let min: f32 = w.min().into_scalar();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_global_weight_count_is_validated() {
        let config = SimpleConsistentConfig::new(1, 3)
            .with_estimate_around_global_weights(true)
            .with_global_weights(vec![0.5, 0.5]);
        let result = config.init::<Backend>(Dimension::One, &Default::default());
        assert!(matches!(result, Err(RegistrationError::InvalidConfiguration(_))));
    }
}
