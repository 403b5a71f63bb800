//! Physical distance between adjacent voxels along each spatial axis.
//!
//! Spacing is per-axis (anisotropic sampling is common) and its length always
//! equals the spatial dimensionality.

use std::ops::Index;
use serde::{Deserialize, Serialize};
use crate::dimension::Dimension;
use crate::error::{RegistrationError, Result};

/// Voxel spacing, one positive entry per spatial axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spacing {
    values: Vec<f64>,
}

impl Spacing {
    /// Create a spacing vector.
    ///
    /// # Errors
    /// * `UnsupportedDimension` if the length is not 1, 2 or 3.
    /// * `InvalidConfiguration` if an entry is not a positive finite number.
    pub fn new(values: Vec<f64>) -> Result<Self> {
        Dimension::new(values.len())?;
        if let Some(bad) = values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            return Err(RegistrationError::invalid_configuration(format!(
                "spacing entries must be positive, got {bad}"
            )));
        }
        Ok(Self { values })
    }

    /// Create uniform spacing (same value for all dimensions).
    pub fn uniform(dim: Dimension, value: f64) -> Result<Self> {
        Self::new(vec![value; dim.get()])
    }

    /// Spacing that maps the image extent onto the unit hypercube `[0, 1]^d`.
    ///
    /// Singleton axes get spacing 1.
    pub fn normalized(spatial_shape: &[usize]) -> Result<Self> {
        Self::new(
            spatial_shape
                .iter()
                .map(|&n| if n > 1 { 1.0 / (n - 1) as f64 } else { 1.0 })
                .collect(),
        )
    }

    /// Dimensionality implied by the number of entries.
    pub fn dimension(&self) -> Dimension {
        match self.values.len() {
            1 => Dimension::One,
            2 => Dimension::Two,
            _ => Dimension::Three,
        }
    }

    /// Number of spatial axes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false; a spacing has at least one entry.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Volume of a single voxel (product of the entries).
    pub fn volume_element(&self) -> f64 {
        self.values.iter().product()
    }

    /// Multiply every entry by `factor`.
    pub fn scaled(&self, factor: f64) -> Result<Self> {
        Self::new(self.values.iter().map(|v| v * factor).collect())
    }

    /// Spacing of the same physical extent sampled on `new_shape` instead of
    /// `old_shape` (corner-aligned: `s * (n - 1) / (m - 1)`).
    pub fn resampled(&self, old_shape: &[usize], new_shape: &[usize]) -> Result<Self> {
        if old_shape.len() != self.len() || new_shape.len() != self.len() {
            return Err(RegistrationError::shape_mismatch(old_shape, new_shape));
        }
        let values = self
            .values
            .iter()
            .zip(old_shape.iter().zip(new_shape))
            .map(|(&s, (&n, &m))| {
                if m > 1 {
                    s * (n.max(1) - 1) as f64 / (m - 1) as f64
                } else {
                    s * n as f64
                }
            })
            .map(|s| if s > 0.0 { s } else { 1.0 })
            .collect();
        Self::new(values)
    }

    /// Get the minimum spacing value.
    pub fn min_spacing(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Get the maximum spacing value.
    pub fn max_spacing(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Check if spacing is uniform (all components equal).
    pub fn is_uniform(&self) -> bool {
        let first = self.values[0];
        self.values.iter().all(|v| (v - first).abs() < 1e-12)
    }
}

impl Index<usize> for Spacing {
    type Output = f64;

    fn index(&self, axis: usize) -> &f64 {
        &self.values[axis]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing_creation() {
        let s = Spacing::new(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(s[0], 1.0);
        assert_eq!(s[2], 3.0);
        assert_eq!(s.dimension(), Dimension::Three);
        assert!((s.volume_element() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_spacing_rejects_bad_input() {
        assert!(matches!(
            Spacing::new(vec![]),
            Err(RegistrationError::UnsupportedDimension(0))
        ));
        assert!(matches!(
            Spacing::new(vec![1.0; 4]),
            Err(RegistrationError::UnsupportedDimension(4))
        ));
        assert!(matches!(
            Spacing::new(vec![1.0, -1.0]),
            Err(RegistrationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_normalized_spacing() {
        let s = Spacing::normalized(&[65, 33]).unwrap();
        assert!((s[0] - 1.0 / 64.0).abs() < 1e-12);
        assert!((s[1] - 1.0 / 32.0).abs() < 1e-12);
    }

    #[test]
    fn test_resampled_spacing_keeps_extent() {
        let s = Spacing::normalized(&[64, 64]).unwrap();
        let coarse = s.resampled(&[64, 64], &[16, 16]).unwrap();
        assert!((coarse[0] * 15.0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_spacing_min_max() {
        let s = Spacing::new(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(s.min_spacing(), 1.0);
        assert_eq!(s.max_spacing(), 3.0);
        assert!(!s.is_uniform());
        assert!(Spacing::uniform(Dimension::Two, 0.5).unwrap().is_uniform());
    }
}
