//! Spatial dimensionality of a registration problem.
//!
//! Every field is stored in the canonical rank-5 layout `[B, C, A0, A1, A2]`
//! (see [`crate::layout`]). A `D`-dimensional image occupies the trailing `D`
//! spatial axes; the leading unused axes have extent 1. `Dimension` maps
//! spatial axis indices and per-axis layer geometry onto that layout so that
//! 1D, 2D and 3D share a single code path.

use serde::{Deserialize, Serialize};
use crate::error::{RegistrationError, Result};

/// Number of spatial axes of an image (1, 2 or 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    One,
    Two,
    Three,
}

/// Rank of the canonical tensor layout.
pub const CANONICAL_RANK: usize = 5;

impl Dimension {
    /// Validate a dimensionality.
    ///
    /// # Errors
    /// `UnsupportedDimension` for anything outside {1, 2, 3}.
    pub fn new(dim: usize) -> Result<Self> {
        match dim {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(RegistrationError::UnsupportedDimension(other)),
        }
    }

    /// Number of spatial axes.
    pub fn get(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Number of unused leading spatial axes in the canonical layout.
    pub fn padding_axes(self) -> usize {
        3 - self.get()
    }

    /// Canonical tensor axis holding spatial axis `axis`.
    pub fn canonical_axis(self, axis: usize) -> usize {
        2 + self.padding_axes() + axis
    }

    /// Expand a scalar kernel size to the canonical spatial axes.
    pub fn kernel(self, size: usize) -> [usize; 3] {
        self.expand(size, 1)
    }

    /// Expand a scalar stride to the canonical spatial axes.
    pub fn stride(self, stride: usize) -> [usize; 3] {
        self.expand(stride, 1)
    }

    /// Expand a scalar padding to the canonical spatial axes.
    pub fn padding(self, padding: usize) -> [usize; 3] {
        self.expand(padding, 0)
    }

    fn expand(self, value: usize, unused: usize) -> [usize; 3] {
        let mut out = [unused; 3];
        for slot in out.iter_mut().skip(self.padding_axes()) {
            *slot = value;
        }
        out
    }

    /// Spatial extent of a canonical shape, restricted to the used axes.
    pub fn spatial_shape(self, dims: [usize; CANONICAL_RANK]) -> Vec<usize> {
        dims[2 + self.padding_axes()..].to_vec()
    }

    /// Canonical spatial extent `[A0, A1, A2]` for a natural spatial shape.
    pub fn canonical_spatial(self, spatial: &[usize]) -> Result<[usize; 3]> {
        if spatial.len() != self.get() {
            return Err(RegistrationError::shape_mismatch(
                &vec![0; self.get()],
                spatial,
            ));
        }
        let mut out = [1; 3];
        out[self.padding_axes()..].copy_from_slice(spatial);
        Ok(out)
    }
}

impl TryFrom<usize> for Dimension {
    type Error = RegistrationError;

    fn try_from(dim: usize) -> Result<Self> {
        Self::new(dim)
    }
}
