use burn::prelude::*;
use defreg_core::{
    BoundaryCondition, Dimension, FiniteDifferences, RegistrationError, Result, Scheme, Spacing,
};
use super::edge::{compute_localized_edge_penalty, EdgePenaltyConfig};

/// Relaxed normalized-cut energy of a soft clustering.
///
/// For each cluster `k` with probability map `p` and edge indicator `w`:
///
/// cut_k = sum p (p + w (dx p + dy p)) / sum p (1 + 2 w)
///
/// and the loss is `sum_batch (K - sum_k cut_k)`. Only two-dimensional
/// images are supported.
#[derive(Debug, Clone)]
pub struct ClusteringLoss {
    edge: EdgePenaltyConfig,
    unit: FiniteDifferences,
}

impl ClusteringLoss {
    /// # Errors
    /// * `NotImplemented` for 1D and 3D.
    /// * `UnsupportedDimension` for anything else but 2.
    pub fn new(dim: usize, edge: EdgePenaltyConfig) -> Result<Self> {
        match Dimension::new(dim)? {
            Dimension::Two => Ok(Self {
                edge,
                // cut costs use unit spacing
                unit: FiniteDifferences::new(
                    &Spacing::uniform(Dimension::Two, 1.0)?,
                    BoundaryCondition::Clamped,
                ),
            }),
            other => Err(RegistrationError::not_implemented(format!(
                "clustering loss for {}D images",
                other.get()
            ))),
        }
    }

    /// # Arguments
    /// * `image` - Image `[B, C, 1, X, Y]`; channel 0 drives the edge indicator
    /// * `probabilities` - Cluster probabilities `[B, K, 1, X, Y]`
    pub fn forward<B: Backend>(
        &self,
        image: Tensor<B, 5>,
        spacing: &Spacing,
        probabilities: Tensor<B, 5>,
    ) -> Tensor<B, 1> {
        let [b, k, a0, a1, a2] = probabilities.dims();
        let n = a0 * a1 * a2;
        let w_edge = compute_localized_edge_penalty(image, spacing, self.edge.gamma);

        let per_batch = |t: Tensor<B, 5>| t.reshape([b, n]).sum_dim(1).reshape([b]);

        let mut penalties = Tensor::<B, 1>::ones([b], &probabilities.device()).mul_scalar(k as f64);
        for cluster in 0..k {
            let p = probabilities.clone().narrow(1, cluster, 1);
            let flux = self
                .unit
                .gradient(p.clone(), Scheme::Forward)
                .into_iter()
                .reduce(|a, d| a + d)
                .unwrap_or_else(|| p.zeros_like());

            let nom = per_batch(p.clone() * (p.clone() + w_edge.clone() * flux));
            let denom = per_batch(p * w_edge.clone().mul_scalar(2.0).add_scalar(1.0));
            penalties = penalties - nom / denom;
        }
        penalties.sum()
    }
}
