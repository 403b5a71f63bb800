//! Finite-difference derivatives on canonical `[B, C, A0, A1, A2]` fields.
//!
//! Derivatives along spatial axis `i` are scaled by `1 / spacing[i]`. The
//! boundary policy is chosen by the caller: `Clamped` replicates the boundary
//! value (zero-flux), `Periodic` wraps around. Every operator returns a tensor
//! with the same shape as its input.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use crate::dimension::Dimension;
use crate::error::{RegistrationError, Result};
use crate::spacing::Spacing;

/// Boundary handling for the neighbour lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryCondition {
    /// Replicate the boundary voxel (one-sided differences vanish at the border).
    #[default]
    Clamped,
    /// Wrap around the domain.
    Periodic,
}

/// Difference stencil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Forward,
    Backward,
    Central,
}

/// Finite-difference engine for a fixed spacing and boundary policy.
#[derive(Debug, Clone)]
pub struct FiniteDifferences {
    spacing: Spacing,
    boundary: BoundaryCondition,
}

impl FiniteDifferences {
    pub fn new(spacing: &Spacing, boundary: BoundaryCondition) -> Self {
        Self {
            spacing: spacing.clone(),
            boundary,
        }
    }

    /// Build from raw spacing values.
    ///
    /// # Errors
    /// `UnsupportedDimension` if the number of entries is not 1, 2 or 3.
    pub fn from_spacing(spacing: &[f64], boundary: BoundaryCondition) -> Result<Self> {
        Ok(Self::new(&Spacing::new(spacing.to_vec())?, boundary))
    }

    pub fn dimension(&self) -> Dimension {
        self.spacing.dimension()
    }

    pub fn spacing(&self) -> &Spacing {
        &self.spacing
    }

    /// Derivative along spatial `axis` with the given stencil.
    ///
    /// # Errors
    /// `UnsupportedDimension` if `axis` is not a spatial axis of this engine.
    pub fn derivative<B: Backend>(
        &self,
        field: Tensor<B, 5>,
        axis: usize,
        scheme: Scheme,
    ) -> Result<Tensor<B, 5>> {
        if axis >= self.spacing.len() {
            return Err(RegistrationError::UnsupportedDimension(axis + 1));
        }
        Ok(self.derivative_unchecked(field, axis, scheme))
    }

    pub fn forward<B: Backend>(&self, field: Tensor<B, 5>, axis: usize) -> Result<Tensor<B, 5>> {
        self.derivative(field, axis, Scheme::Forward)
    }

    pub fn backward<B: Backend>(&self, field: Tensor<B, 5>, axis: usize) -> Result<Tensor<B, 5>> {
        self.derivative(field, axis, Scheme::Backward)
    }

    pub fn central<B: Backend>(&self, field: Tensor<B, 5>, axis: usize) -> Result<Tensor<B, 5>> {
        self.derivative(field, axis, Scheme::Central)
    }

    pub fn dxf<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.forward(field, 0)
    }

    pub fn dyf<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.forward(field, 1)
    }

    pub fn dzf<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.forward(field, 2)
    }

    pub fn dxb<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.backward(field, 0)
    }

    pub fn dyb<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.backward(field, 1)
    }

    pub fn dzb<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.backward(field, 2)
    }

    pub fn dxc<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.central(field, 0)
    }

    pub fn dyc<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.central(field, 1)
    }

    pub fn dzc<B: Backend>(&self, field: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        self.central(field, 2)
    }

    /// Derivatives along every spatial axis, in axis order.
    pub fn gradient<B: Backend>(&self, field: Tensor<B, 5>, scheme: Scheme) -> Vec<Tensor<B, 5>> {
        (0..self.spacing.len())
            .map(|axis| self.derivative_unchecked(field.clone(), axis, scheme))
            .collect()
    }

    /// Squared gradient magnitude from central differences.
    pub fn grad_norm_sqr<B: Backend>(&self, field: Tensor<B, 5>) -> Tensor<B, 5> {
        let zeros = field.zeros_like();
        self.gradient(field, Scheme::Central)
            .into_iter()
            .fold(zeros, |acc, d| acc + d.clone() * d)
    }

    /// Discrete Laplacian (sum of second differences).
    pub fn laplacian<B: Backend>(&self, field: Tensor<B, 5>) -> Tensor<B, 5> {
        let dim = self.dimension();
        let mut acc = field.zeros_like();
        for axis in 0..dim.get() {
            let canonical = dim.canonical_axis(axis);
            let h2 = self.spacing[axis] * self.spacing[axis];
            let next = self.shift_next(field.clone(), canonical);
            let prev = self.shift_prev(field.clone(), canonical);
            acc = acc + (next + prev - field.clone().mul_scalar(2.0)).div_scalar(h2);
        }
        acc
    }

    fn derivative_unchecked<B: Backend>(
        &self,
        field: Tensor<B, 5>,
        axis: usize,
        scheme: Scheme,
    ) -> Tensor<B, 5> {
        let canonical = self.dimension().canonical_axis(axis);
        let h = self.spacing[axis];
        match scheme {
            Scheme::Forward => (self.shift_next(field.clone(), canonical) - field).div_scalar(h),
            Scheme::Backward => (field.clone() - self.shift_prev(field, canonical)).div_scalar(h),
            Scheme::Central => {
                let next = self.shift_next(field.clone(), canonical);
                let prev = self.shift_prev(field, canonical);
                (next - prev).div_scalar(2.0 * h)
            }
        }
    }

    /// `f[i + 1]` with the configured boundary.
    fn shift_next<B: Backend>(&self, field: Tensor<B, 5>, axis: usize) -> Tensor<B, 5> {
        let n = field.dims()[axis];
        if n < 2 {
            return field;
        }
        let tail = match self.boundary {
            BoundaryCondition::Clamped => field.clone().narrow(axis, n - 1, 1),
            BoundaryCondition::Periodic => field.clone().narrow(axis, 0, 1),
        };
        Tensor::cat(vec![field.narrow(axis, 1, n - 1), tail], axis)
    }

    /// `f[i - 1]` with the configured boundary.
    fn shift_prev<B: Backend>(&self, field: Tensor<B, 5>, axis: usize) -> Tensor<B, 5> {
        let n = field.dims()[axis];
        if n < 2 {
            return field;
        }
        let head = match self.boundary {
            BoundaryCondition::Clamped => field.clone().narrow(axis, 0, 1),
            BoundaryCondition::Periodic => field.clone().narrow(axis, n - 1, 1),
        };
        Tensor::cat(vec![head, field.narrow(axis, 0, n - 1)], axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn ramp_1d(n: usize) -> Tensor<Backend, 5> {
        let values: Vec<f32> = (0..n).map(|i| (i * i) as f32).collect();
        Tensor::from_data(TensorData::new(values, [1, 1, 1, 1, n]), &Default::default())
    }

    fn values(t: Tensor<Backend, 5>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_forward_backward_central_1d() {
        let fd = FiniteDifferences::from_spacing(&[0.5], BoundaryCondition::Clamped).unwrap();
        let f = ramp_1d(4); // 0 1 4 9

        assert_eq!(values(fd.dxf(f.clone()).unwrap()), vec![2.0, 6.0, 10.0, 0.0]);
        assert_eq!(values(fd.dxb(f.clone()).unwrap()), vec![0.0, 2.0, 6.0, 10.0]);
        assert_eq!(values(fd.dxc(f).unwrap()), vec![1.0, 4.0, 8.0, 5.0]);
    }

    #[test]
    fn test_periodic_boundary() {
        let fd = FiniteDifferences::from_spacing(&[1.0], BoundaryCondition::Periodic).unwrap();
        let f = ramp_1d(3); // 0 1 4
        assert_eq!(values(fd.dxf(f.clone()).unwrap()), vec![1.0, 3.0, -4.0]);
        assert_eq!(values(fd.dxb(f).unwrap()), vec![-4.0, 1.0, 3.0]);
    }

    #[test]
    fn test_axis_out_of_range() {
        let fd = FiniteDifferences::from_spacing(&[1.0, 1.0], BoundaryCondition::Clamped).unwrap();
        let f = Tensor::<Backend, 5>::zeros([1, 1, 1, 4, 4], &Default::default());
        assert!(matches!(
            fd.dzf(f),
            Err(RegistrationError::UnsupportedDimension(3))
        ));
    }

    #[test]
    fn test_unsupported_spacing_dimension() {
        assert!(matches!(
            FiniteDifferences::from_spacing(&[1.0; 4], BoundaryCondition::Clamped),
            Err(RegistrationError::UnsupportedDimension(4))
        ));
    }

    #[test]
    fn test_2d_axes_are_independent() {
        let device = Default::default();
        // f(x, y) = 3 x, constant along y
        let values: Vec<f32> = (0..4)
            .flat_map(|x| (0..5).map(move |_| 3.0 * x as f32))
            .collect();
        let f = Tensor::<Backend, 5>::from_data(TensorData::new(values, [1, 1, 1, 4, 5]), &device);
        let fd = FiniteDifferences::from_spacing(&[1.0, 1.0], BoundaryCondition::Clamped).unwrap();

        let dy: f32 = fd.dyc(f.clone()).unwrap().abs().sum().into_scalar();
        assert!(dy.abs() < 1e-6);
        let interior = fd.dxc(f).unwrap().narrow(3, 1, 2);
        let mean: f32 = interior.mean().into_scalar();
        assert!((mean - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_laplacian_of_quadratic() {
        let fd = FiniteDifferences::from_spacing(&[1.0], BoundaryCondition::Clamped).unwrap();
        let lap = values(fd.laplacian(ramp_1d(5)));
        // second difference of i^2 is 2 in the interior
        for v in &lap[1..4] {
            assert!((v - 2.0).abs() < 1e-6);
        }
    }
}
