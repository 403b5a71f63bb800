//! Image type: canonical tensor data paired with voxel spacing.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use crate::dimension::{Dimension, CANONICAL_RANK};
use crate::error::{RegistrationError, Result};
use crate::layout::{from_canonical, natural_shape, to_canonical};
use crate::spacing::Spacing;

/// Image or field with physical spacing.
///
/// Data is held in the canonical layout `[B, C, A0, A1, A2]`; the spacing
/// length fixes the dimensionality.
///
/// # Examples
/// ```rust
/// use defreg_core::{Image, Spacing};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 4>::zeros([1, 1, 32, 48], &device);
/// let image = Image::from_tensor(data, Spacing::normalized(&[32, 48]).unwrap()).unwrap();
/// assert_eq!(image.spatial_shape(), vec![32, 48]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend> {
    data: Tensor<B, CANONICAL_RANK>,
    spacing: Spacing,
}

impl<B: Backend> Image<B> {
    /// Wrap a natural `[B, C, spatial...]` tensor.
    ///
    /// # Errors
    /// * `UnsupportedDimension` for ranks outside 3..=5.
    /// * `ShapeMismatch` if the spacing length does not match the rank.
    pub fn from_tensor<const R: usize>(data: Tensor<B, R>, spacing: Spacing) -> Result<Self> {
        let (data, dim) = to_canonical(data)?;
        if dim != spacing.dimension() {
            return Err(RegistrationError::shape_mismatch(
                &[dim.get()],
                &[spacing.len()],
            ));
        }
        Ok(Self { data, spacing })
    }

    /// Wrap a tensor that is already in canonical layout.
    pub fn from_canonical(data: Tensor<B, CANONICAL_RANK>, spacing: Spacing) -> Self {
        Self { data, spacing }
    }

    pub fn data(&self) -> &Tensor<B, CANONICAL_RANK> {
        &self.data
    }

    pub fn spacing(&self) -> &Spacing {
        &self.spacing
    }

    pub fn dimension(&self) -> Dimension {
        self.spacing.dimension()
    }

    /// Canonical shape `[B, C, A0, A1, A2]`.
    pub fn dims(&self) -> [usize; CANONICAL_RANK] {
        self.data.dims()
    }

    /// Natural shape `[B, C, spatial...]`.
    pub fn shape(&self) -> Vec<usize> {
        natural_shape(self.dims(), self.dimension())
    }

    /// Spatial extent of the used axes only.
    pub fn spatial_shape(&self) -> Vec<usize> {
        self.dimension().spatial_shape(self.dims())
    }

    pub fn into_canonical(self) -> Tensor<B, CANONICAL_RANK> {
        self.data
    }

    /// Convert back to a natural `[B, C, spatial...]` tensor.
    pub fn into_tensor<const R: usize>(self) -> Result<Tensor<B, R>> {
        let dim = self.dimension();
        from_canonical(self.data, dim)
    }

    /// Replace the data, keeping the spacing.
    pub fn with_data(&self, data: Tensor<B, CANONICAL_RANK>) -> Self {
        Self {
            data,
            spacing: self.spacing.clone(),
        }
    }
}
