use burn::tensor::backend::Backend;
use burn::tensor::module::conv1d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Tensor, TensorData};
use crate::dimension::CANONICAL_RANK;
use crate::error::{RegistrationError, Result};
use crate::image::Image;
use crate::spacing::Spacing;

/// Gaussian smoothing filter.
///
/// Separable 1D convolutions along the used spatial axes of a canonical
/// field. Standard deviations are given in physical units and converted to
/// voxels with the spacing; borders replicate the edge value. The kernel
/// support is `ceil(3 sigma)` voxels on each side, bounded by the extent of the
/// smoothed axis.
#[derive(Debug, Clone)]
pub struct GaussianFilter {
    sigmas: Vec<f64>,
    max_kernel_width: Option<usize>,
}

impl GaussianFilter {
    /// # Arguments
    /// * `sigmas` - Standard deviation per spatial axis in physical units. A
    ///   single entry applies to every axis.
    pub fn new(sigmas: Vec<f64>) -> Self {
        Self {
            sigmas,
            max_kernel_width: None,
        }
    }

    /// Isotropic filter.
    pub fn isotropic(sigma: f64) -> Self {
        Self::new(vec![sigma])
    }

    /// Limit the kernel width (radius * 2 + 1) below what the extent allows.
    pub fn with_max_kernel_width(mut self, width: usize) -> Self {
        self.max_kernel_width = Some(width.max(1));
        self
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    pub fn apply<B: Backend>(&self, image: &Image<B>) -> Result<Image<B>> {
        let data = self.apply_tensor(image.data().clone(), image.spacing())?;
        Ok(image.with_data(data))
    }

    /// Smooth a canonical tensor `[B, C, A0, A1, A2]`.
    ///
    /// # Errors
    /// `InvalidConfiguration` if more sigmas than spatial axes are given.
    pub fn apply_tensor<B: Backend>(
        &self,
        input: Tensor<B, CANONICAL_RANK>,
        spacing: &Spacing,
    ) -> Result<Tensor<B, CANONICAL_RANK>> {
        let dim = spacing.dimension();
        if self.sigmas.len() > 1 && self.sigmas.len() != dim.get() {
            return Err(RegistrationError::invalid_configuration(format!(
                "{} Gaussian standard deviations given for a {}D image",
                self.sigmas.len(),
                dim.get()
            )));
        }

        let mut data = input;
        for axis in 0..dim.get() {
            let sigma = self.sigmas.get(axis).or(self.sigmas.first()).copied().unwrap_or(0.0);
            if sigma <= 1e-6 {
                continue;
            }
            let canonical = dim.canonical_axis(axis);
            let extent = data.dims()[canonical];
            let pixel_sigma = sigma / spacing[axis];
            let mut radius = ((3.0 * pixel_sigma).ceil() as usize).min(extent.saturating_sub(1));
            if let Some(width) = self.max_kernel_width {
                radius = radius.min((width - 1) / 2);
            }
            if radius == 0 {
                continue;
            }

            let kernel = gaussian_kernel(pixel_sigma, radius);
            data = convolve_axis(data, &kernel, canonical);
        }
        Ok(data)
    }
}

/// Normalized, sampled Gaussian of the given radius.
pub fn gaussian_kernel(sigma: f64, radius: usize) -> Vec<f32> {
    let two_sigma2 = 2.0 * sigma * sigma;
    let raw: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma2).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|v| (v / sum) as f32).collect()
}

fn convolve_axis<B: Backend>(
    input: Tensor<B, CANONICAL_RANK>,
    kernel: &[f32],
    axis: usize,
) -> Tensor<B, CANONICAL_RANK> {
    let device = input.device();
    let radius = kernel.len() / 2;

    // Move the target axis last and fold everything else into the batch
    let moved = input.swap_dims(axis, CANONICAL_RANK - 1);
    let moved_dims = moved.dims();
    let length = moved_dims[CANONICAL_RANK - 1];
    let batch: usize = moved_dims[..CANONICAL_RANK - 1].iter().product();
    let flat = moved.reshape([batch, 1, length]);

    // Replicate padding
    let first = flat.clone().narrow(2, 0, 1).repeat(&[1, 1, radius]);
    let last = flat.clone().narrow(2, length - 1, 1).repeat(&[1, 1, radius]);
    let padded = Tensor::cat(vec![first, flat, last], 2);

    let weight = Tensor::<B, 3>::from_data(TensorData::new(kernel.to_vec(), [1, 1, kernel.len()]), &device);
    let options = ConvOptions::new([1], [0], [1], 1);
    let smoothed = conv1d(padded, weight, None, options);

    smoothed
        .reshape(moved_dims)
        .swap_dims(axis, CANONICAL_RANK - 1)
}
