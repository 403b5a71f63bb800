//! Regularization losses on kernel-weight fields.
//!
//! All losses reduce to a differentiable scalar and leave their inputs
//! untouched.

pub mod clustering;
pub mod edge;
pub mod entropy;
pub mod total_variation;

pub use clustering::ClusteringLoss;
pub use edge::{compute_localized_edge_penalty, local_norm_of_gradient, EdgePenaltyConfig};
pub use entropy::{EntropyLoss, GlobalEntropyLoss};
pub use total_variation::TotalVariationLoss;
