use burn::prelude::*;
use defreg_core::Spacing;

/// Lower bound for probabilities inside the logarithm.
const LOG_EPSILON: f64 = 1e-10;

/// Local entropy of a per-voxel distribution over kernels.
///
/// `-sum w log w` integrated over the domain (scaled by the voxel volume)
/// and averaged over the batch. Zero iff every voxel is one-hot.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropyLoss;

impl EntropyLoss {
    pub fn new() -> Self {
        Self
    }

    /// # Arguments
    /// * `weights` - Probabilities `[B, K, A0, A1, A2]`
    pub fn forward<B: Backend>(&self, weights: Tensor<B, 5>, spacing: &Spacing) -> Tensor<B, 1> {
        let batch_size = weights.dims()[0] as f64;
        let log_w = weights.clone().clamp(LOG_EPSILON, 1.0).log();
        (weights * log_w)
            .sum()
            .mul_scalar(-spacing.volume_element() / batch_size)
    }
}

/// Entropy of the average kernel usage over batch and space.
///
/// Penalizes global imbalance between kernels rather than local ambiguity.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalEntropyLoss;

impl GlobalEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    pub fn forward<B: Backend>(&self, weights: Tensor<B, 5>) -> Tensor<B, 1> {
        let [b, k, a0, a1, a2] = weights.dims();
        let elements = (b * a0 * a1 * a2) as f64;
        // [K] occupancy per kernel
        let occupancy = weights
            .swap_dims(0, 1)
            .reshape([k, b * a0 * a1 * a2])
            .sum_dim(1)
            .div_scalar(elements)
            .reshape([k]);
        let log_p = occupancy.clone().clamp(LOG_EPSILON, 1.0).log();
        (occupancy * log_p).sum().neg()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn weights(values: Vec<f32>, k: usize, n: usize) -> Tensor<Backend, 5> {
        Tensor::from_data(TensorData::new(values, [1, k, 1, 1, n]), &Default::default())
    }

    #[test]
    fn test_one_hot_has_zero_entropy() {
        // two kernels, three voxels, each voxel one-hot
        let w = weights(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0], 2, 3);
        let spacing = Spacing::new(vec![0.5]).unwrap();
        let h: f32 = EntropyLoss::new().forward(w, &spacing).into_scalar();
        assert!(h.abs() < 1e-6);
    }

    #[test]
    fn test_uniform_entropy() {
        let w = weights(vec![0.5; 4], 2, 2);
        let spacing = Spacing::new(vec![0.5]).unwrap();
        let h: f32 = EntropyLoss::new().forward(w, &spacing).into_scalar();
        // 2 voxels * ln 2 * 0.5
        assert!((h - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_global_entropy_of_balanced_usage() {
        // each voxel one-hot, but both kernels used equally
        let w = weights(vec![1.0, 0.0, 0.0, 1.0], 2, 2);
        let h: f32 = GlobalEntropyLoss::new().forward(w.clone()).into_scalar();
        assert!((h - std::f32::consts::LN_2).abs() < 1e-5);
        let local: f32 = EntropyLoss::new()
            .forward(w, &Spacing::new(vec![1.0]).unwrap())
            .into_scalar();
        assert!(local.abs() < 1e-6);
    }
}
