//! Edge-aware total variation of a kernel-weight field.
//!
//! For every kernel channel `k` the penalty is
//!
//! TV_k = ∫ g(I) |∇w_k|_p dx / B
//!
//! where `g` is the localized edge penalty of the source image. Channels are
//! summed, or combined with an L2 norm in color-TV mode.

use burn::prelude::*;
use defreg_core::{Dimension, RegistrationError, Result, Spacing};
use super::edge::{compute_localized_edge_penalty, local_norm_of_gradient, EdgePenaltyConfig, NORM_EPSILON};

#[derive(Debug, Clone)]
pub struct TotalVariationLoss {
    dim: Dimension,
    edge: EdgePenaltyConfig,
    pnorm: f64,
}

impl TotalVariationLoss {
    /// # Errors
    /// `UnsupportedDimension` for `dim` outside {1, 2, 3}.
    pub fn new(dim: usize, edge: EdgePenaltyConfig) -> Result<Self> {
        Ok(Self {
            dim: Dimension::new(dim)?,
            edge,
            pnorm: 2.0,
        })
    }

    /// Exponent of the per-voxel gradient norm (default 2).
    ///
    /// # Errors
    /// `InvalidConfiguration` for `pnorm < 1`.
    pub fn with_pnorm(mut self, pnorm: f64) -> Result<Self> {
        if !(pnorm >= 1.0 && pnorm.is_finite()) {
            return Err(RegistrationError::invalid_configuration(format!(
                "TV norm exponent must be >= 1, got {pnorm}"
            )));
        }
        self.pnorm = pnorm;
        Ok(self)
    }

    pub fn dimension(&self) -> Dimension {
        self.dim
    }

    pub fn pnorm(&self) -> f64 {
        self.pnorm
    }

    /// # Arguments
    /// * `image` - Source image `[B, C, A0, A1, A2]`; only channel 0 drives
    ///   the edge indicator
    /// * `weights` - Kernel weights `[B, K, A0, A1, A2]`
    /// * `use_color_tv` - Combine the per-channel penalties with an L2 norm
    ///
    /// # Errors
    /// * `UnsupportedDimension` if `spacing` has another dimensionality than
    ///   the loss.
    /// * `ShapeMismatch` if image and weights differ in batch or spatial
    ///   extent.
    pub fn forward<B: Backend>(
        &self,
        image: Tensor<B, 5>,
        spacing: &Spacing,
        weights: Tensor<B, 5>,
        use_color_tv: bool,
    ) -> Result<Tensor<B, 1>> {
        if spacing.dimension() != self.dim {
            return Err(RegistrationError::UnsupportedDimension(spacing.dimension().get()));
        }
        let [b, k, a0, a1, a2] = weights.dims();
        let [ib, _, i0, i1, i2] = image.dims();
        if [ib, i0, i1, i2] != [b, a0, a1, a2] {
            return Err(RegistrationError::shape_mismatch(&[b, a0, a1, a2], &[ib, i0, i1, i2]));
        }
        let scale = spacing.volume_element() / b as f64;

        let g = compute_localized_edge_penalty(image, spacing, self.edge.gamma);
        let local = local_norm_of_gradient(weights, spacing, self.pnorm);

        // [K] penalty per kernel
        let per_channel = (local * g)
            .swap_dims(0, 1)
            .reshape([k, b * a0 * a1 * a2])
            .sum_dim(1)
            .reshape([k])
            .mul_scalar(scale);

        Ok(if use_color_tv {
            per_channel
                .powf_scalar(2.0)
                .sum()
                .add_scalar(NORM_EPSILON)
                .sqrt()
                .sub_scalar(NORM_EPSILON.sqrt())
        } else {
            per_channel.sum()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, TensorData};
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_constant_weights_have_zero_tv() {
        let device = Default::default();
        let image = Tensor::<Backend, 5>::random([1, 1, 1, 8, 8], Distribution::Uniform(0.0, 1.0), &device);
        let weights = Tensor::<Backend, 5>::ones([1, 3, 1, 8, 8], &device).div_scalar(3.0);
        let spacing = Spacing::normalized(&[8, 8]).unwrap();
        let loss = TotalVariationLoss::new(2, EdgePenaltyConfig::new()).unwrap();
        for color in [false, true] {
            let tv: f32 = loss
                .forward(image.clone(), &spacing, weights.clone(), color)
                .unwrap()
                .into_scalar();
            assert!(tv.abs() < 1e-5, "color={color}: {tv}");
        }
    }

    #[test]
    fn test_step_weights_on_flat_image() {
        let device = Default::default();
        let image = Tensor::<Backend, 5>::zeros([1, 1, 1, 1, 4], &device);
        let weights = Tensor::<Backend, 5>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 1.0, 1.0], [1, 1, 1, 1, 4]),
            &device,
        );
        let spacing = Spacing::new(vec![1.0]).unwrap();
        let loss = TotalVariationLoss::new(1, EdgePenaltyConfig::new()).unwrap();
        let tv: f32 = loss.forward(image, &spacing, weights, false).unwrap().into_scalar();
        assert!((tv - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(
            TotalVariationLoss::new(4, EdgePenaltyConfig::new()),
            Err(RegistrationError::UnsupportedDimension(4))
        ));
        let loss = TotalVariationLoss::new(2, EdgePenaltyConfig::new()).unwrap();
        assert!(loss.with_pnorm(0.5).is_err());
    }

    #[test]
    fn test_weights_must_match_the_image_grid() {
        let device = Default::default();
        let image = Tensor::<Backend, 5>::zeros([1, 1, 1, 8, 8], &device);
        let loss = TotalVariationLoss::new(2, EdgePenaltyConfig::new()).unwrap();
        let spacing = Spacing::normalized(&[8, 8]).unwrap();

        let coarse = Tensor::<Backend, 5>::zeros([1, 3, 1, 4, 4], &device);
        assert!(matches!(
            loss.forward(image.clone(), &spacing, coarse, false),
            Err(RegistrationError::ShapeMismatch { .. })
        ));

        let weights = Tensor::<Backend, 5>::zeros([1, 3, 1, 8, 8], &device);
        let line = Spacing::new(vec![0.1]).unwrap();
        assert!(matches!(
            loss.forward(image.clone(), &line, weights.clone(), false),
            Err(RegistrationError::UnsupportedDimension(1))
        ));
        assert_eq!(loss.dimension(), Dimension::Two);
        assert!(loss.forward(image, &spacing, weights, true).is_ok());
    }
}
