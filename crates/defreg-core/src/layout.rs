//! Conversion between natural tensors (`[B, C, spatial...]`, rank 3 to 5)
//! and the canonical rank-5 layout used internally.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use crate::dimension::{Dimension, CANONICAL_RANK};
use crate::error::{RegistrationError, Result};

/// Lift a `[B, C, spatial...]` tensor into the canonical layout.
///
/// Returns the lifted tensor and the dimensionality implied by its rank.
///
/// # Errors
/// `UnsupportedDimension` if the rank is not 3, 4 or 5.
pub fn to_canonical<B: Backend, const R: usize>(
    tensor: Tensor<B, R>,
) -> Result<(Tensor<B, CANONICAL_RANK>, Dimension)> {
    if R < 3 {
        return Err(RegistrationError::UnsupportedDimension(R.saturating_sub(2)));
    }
    let dim = Dimension::new(R - 2)?;
    let dims = tensor.dims();

    let mut shape = [1usize; CANONICAL_RANK];
    shape[0] = dims[0];
    shape[1] = dims[1];
    for (axis, &extent) in dims[2..].iter().enumerate() {
        shape[dim.canonical_axis(axis)] = extent;
    }
    Ok((tensor.reshape(shape), dim))
}

/// Drop the padding axes of a canonical tensor.
///
/// # Errors
/// `ShapeMismatch` if `R` does not equal `dim + 2` or the padding axes are
/// not singleton.
pub fn from_canonical<B: Backend, const R: usize>(
    tensor: Tensor<B, CANONICAL_RANK>,
    dim: Dimension,
) -> Result<Tensor<B, R>> {
    let dims = tensor.dims();
    let natural = natural_shape(dims, dim);
    if R != natural.len() || dims[2..2 + dim.padding_axes()].iter().any(|&e| e != 1) {
        return Err(RegistrationError::shape_mismatch(&natural, &dims));
    }
    let shape: [usize; R] = natural
        .clone()
        .try_into()
        .map_err(|_| RegistrationError::shape_mismatch(&natural, &dims))?;
    Ok(tensor.reshape(shape))
}

/// Natural `[B, C, spatial...]` shape of a canonical tensor.
pub fn natural_shape(dims: [usize; CANONICAL_RANK], dim: Dimension) -> Vec<usize> {
    let mut shape = vec![dims[0], dims[1]];
    shape.extend(dim.spatial_shape(dims));
    shape
}
