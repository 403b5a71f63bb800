use burn::tensor::backend::Backend;
use crate::error::{RegistrationError, Result};
use crate::image::Image;
use crate::interpolation::resample;
use super::gaussian::GaussianFilter;

/// Spatial extent of an image downsampled by `factor` (`round(n * factor)`,
/// at least one voxel).
pub fn scaled_extent(spatial: &[usize], factor: f64) -> Vec<usize> {
    spatial
        .iter()
        .map(|&n| ((n as f64 * factor).round() as usize).max(1))
        .collect()
}

/// Downsample an image by a scale factor in `(0, 1]`.
///
/// The image is first smoothed with a Gaussian of half the new spacing and
/// then linearly resampled; the returned image carries the new spacing.
///
/// # Errors
/// `InvalidConfiguration` for factors outside `(0, 1]`.
pub fn downsample_by_factor<B: Backend>(image: &Image<B>, factor: f64) -> Result<Image<B>> {
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "scale factor must lie in (0, 1], got {factor}"
        )));
    }
    if (factor - 1.0).abs() < f64::EPSILON {
        return Ok(image.clone());
    }

    let dim = image.dimension();
    let spatial = image.spatial_shape();
    let target = scaled_extent(&spatial, factor);
    if target == spatial {
        return Ok(image.clone());
    }
    let new_spacing = image.spacing().resampled(&spatial, &target)?;

    let sigmas = new_spacing.as_slice().iter().map(|s| 0.5 * s).collect();
    let smoothed = GaussianFilter::new(sigmas).apply(image)?;
    let data = resample(smoothed.into_canonical(), dim.canonical_spatial(&target)?);

    Ok(Image::from_canonical(data, new_spacing))
}

/// Multi-resolution image pyramid.
///
/// One level per scale factor, in the order the factors are given.
#[derive(Debug, Clone)]
pub struct ImagePyramid<B: Backend> {
    factors: Vec<f64>,
    images: Vec<Image<B>>,
}

impl<B: Backend> ImagePyramid<B> {
    pub fn new(input: &Image<B>, factors: &[f64]) -> Result<Self> {
        let images = factors
            .iter()
            .map(|&factor| downsample_by_factor(input, factor))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            factors: factors.to_vec(),
            images,
        })
    }

    /// Get image at specific level.
    pub fn level(&self, level: usize) -> Option<&Image<B>> {
        self.images.get(level)
    }

    pub fn factor(&self, level: usize) -> Option<f64> {
        self.factors.get(level).copied()
    }

    /// Get number of levels.
    pub fn levels(&self) -> usize {
        self.images.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spacing::Spacing;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_scaled_extent() {
        assert_eq!(scaled_extent(&[64, 33], 0.5), vec![32, 17]);
        assert_eq!(scaled_extent(&[3], 0.1), vec![1]);
    }

    #[test]
    fn test_downsample_updates_spacing() {
        let device = Default::default();
        let data = Tensor::<Backend, 4>::ones([1, 1, 65, 33], &device);
        let image = Image::from_tensor(data, Spacing::normalized(&[65, 33]).unwrap()).unwrap();
        let coarse = downsample_by_factor(&image, 0.5).unwrap();
        assert_eq!(coarse.dims(), [1, 1, 1, 33, 17]);
        let spacing = coarse.spacing().as_slice();
        assert!((spacing[0] - 1.0 / 32.0).abs() < 1e-12);
        assert!((spacing[1] - 1.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_factor() {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::ones([1, 1, 10], &device);
        let image = Image::from_tensor(data, Spacing::normalized(&[10]).unwrap()).unwrap();
        assert!(downsample_by_factor(&image, 0.0).is_err());
        assert!(downsample_by_factor(&image, 1.5).is_err());
    }

    #[test]
    fn test_pyramid_levels() {
        let device = Default::default();
        let data = Tensor::<Backend, 4>::zeros([1, 1, 16, 16], &device);
        let image = Image::from_tensor(data, Spacing::normalized(&[16, 16]).unwrap()).unwrap();
        let pyramid = ImagePyramid::new(&image, &[0.25, 0.5, 1.0]).unwrap();
        assert_eq!(pyramid.levels(), 3);
        assert_eq!(pyramid.level(0).unwrap().spatial_shape(), vec![4, 4]);
        assert_eq!(pyramid.level(2).unwrap().spatial_shape(), vec![16, 16]);
        assert_eq!(pyramid.factor(1), Some(0.5));
    }
}
