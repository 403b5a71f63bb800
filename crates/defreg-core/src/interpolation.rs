//! Linear sampling of canonical fields at continuous voxel coordinates.
//!
//! All sampling is differentiable with respect to both the sampled field and
//! the sampling grid, which is what the registration models back-propagate
//! through.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use crate::dimension::Dimension;

/// Trilinear interpolation on the canonical layout.
///
/// # Arguments
/// * `image` - Field to sample `[B, C, N0, N1, N2]`
/// * `grid` - Sampling positions in voxel coordinates `[B, 3, M0, M1, M2]`,
///   channel `j` holding the coordinate along canonical axis `2 + j`
///
/// # Returns
/// * Sampled field `[B, C, M0, M1, M2]`; coordinates are clamped to the domain.
pub fn linear_interpolation<B: Backend>(image: Tensor<B, 5>, grid: Tensor<B, 5>) -> Tensor<B, 5> {
    let [b, c, n0, n1, n2] = image.dims();
    let [_, _, m0, m1, m2] = grid.dims();
    let m = m0 * m1 * m2;

    let coords: Vec<Tensor<B, 5>> = (0..3).map(|j| grid.clone().narrow(1, j, 1)).collect();
    let extents = [n0, n1, n2];

    // Lower/upper corner indices and the weight of the upper corner per axis
    let mut lower = Vec::with_capacity(3);
    let mut upper = Vec::with_capacity(3);
    let mut weights = Vec::with_capacity(3);
    for (coord, &n) in coords.into_iter().zip(extents.iter()) {
        let max = (n - 1) as f32;
        let coord = coord.clamp(0.0, max);
        let floor = coord.clone().floor();
        weights.push(coord - floor.clone());
        lower.push(floor.clone().int());
        upper.push(floor.add_scalar(1.0).clamp(0.0, max).int());
    }

    let flat_img = image.reshape([b, c, n0 * n1 * n2]);
    let stride0 = (n1 * n2) as i32;
    let stride1 = n2 as i32;

    let gather = |i0: &Tensor<B, 5, Int>, i1: &Tensor<B, 5, Int>, i2: &Tensor<B, 5, Int>| {
        let idx = i0.clone().mul_scalar(stride0) + i1.clone().mul_scalar(stride1) + i2.clone();
        let idx = idx.reshape([b, 1, m]).repeat(&[1, c, 1]);
        flat_img.clone().gather(2, idx).reshape([b, c, m0, m1, m2])
    };

    let w0 = weights[0].clone();
    let w1 = weights[1].clone();
    let w2 = weights[2].clone();
    let one_minus = |w: &Tensor<B, 5>| w.clone().neg().add_scalar(1.0);

    // Interpolate along the last axis first
    let v00 = gather(&lower[0], &lower[1], &lower[2]) * one_minus(&w2)
        + gather(&lower[0], &lower[1], &upper[2]) * w2.clone();
    let v01 = gather(&lower[0], &upper[1], &lower[2]) * one_minus(&w2)
        + gather(&lower[0], &upper[1], &upper[2]) * w2.clone();
    let v10 = gather(&upper[0], &lower[1], &lower[2]) * one_minus(&w2)
        + gather(&upper[0], &lower[1], &upper[2]) * w2.clone();
    let v11 = gather(&upper[0], &upper[1], &lower[2]) * one_minus(&w2)
        + gather(&upper[0], &upper[1], &upper[2]) * w2;

    let v0 = v00 * one_minus(&w1) + v01 * w1.clone();
    let v1 = v10 * one_minus(&w1) + v11 * w1;

    v0 * one_minus(&w0) + v1 * w0
}

/// Coordinate ramp `0, 1, ..., n-1` (times `scale`) broadcastable along
/// canonical axis `axis` (2, 3 or 4).
pub fn axis_ramp<B: Backend>(n: usize, axis: usize, scale: f64, device: &B::Device) -> Tensor<B, 5> {
    let values: Vec<f32> = (0..n).map(|i| (i as f64 * scale) as f32).collect();
    let mut shape = [1usize; 5];
    shape[axis] = n;
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Sample `image` at `identity + displacement`.
///
/// # Arguments
/// * `image` - Field to warp `[B, C, A0, A1, A2]`
/// * `displacement` - Displacement in voxel units `[B, D, A0, A1, A2]`, one
///   channel per spatial axis of `dim`
pub fn warp<B: Backend>(image: Tensor<B, 5>, displacement: Tensor<B, 5>, dim: Dimension) -> Tensor<B, 5> {
    let [b, _, a0, a1, a2] = displacement.dims();
    let device = displacement.device();
    let extents = [a0, a1, a2];

    let channels: Vec<Tensor<B, 5>> = (0..3)
        .map(|j| {
            if j < dim.padding_axes() {
                Tensor::zeros([b, 1, a0, a1, a2], &device)
            } else {
                let offset = displacement.clone().narrow(1, j - dim.padding_axes(), 1);
                offset + axis_ramp::<B>(extents[j], 2 + j, 1.0, &device)
            }
        })
        .collect();

    linear_interpolation(image, Tensor::cat(channels, 1))
}

/// Corner-aligned linear resampling of a canonical field to a new spatial
/// extent `[M0, M1, M2]`.
pub fn resample<B: Backend>(field: Tensor<B, 5>, new_extent: [usize; 3]) -> Tensor<B, 5> {
    let [b, _, n0, n1, n2] = field.dims();
    if [n0, n1, n2] == new_extent {
        return field;
    }
    let device = field.device();
    let old = [n0, n1, n2];
    let [m0, m1, m2] = new_extent;

    let channels: Vec<Tensor<B, 5>> = (0..3)
        .map(|j| {
            let scale = if new_extent[j] > 1 {
                (old[j] - 1) as f64 / (new_extent[j] - 1) as f64
            } else {
                0.0
            };
            Tensor::zeros([b, 1, m0, m1, m2], &device)
                + axis_ramp::<B>(new_extent[j], 2 + j, scale, &device)
        })
        .collect();

    linear_interpolation(field, Tensor::cat(channels, 1))
}
