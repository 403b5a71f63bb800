//! Optimizer trait for the registration parameters.

use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;

/// Gradient-based update of a registration model.
///
/// # Type Parameters
/// * `M` - The module to optimize
/// * `B` - Autodiff backend
pub trait Optimizer<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    /// Apply one update and return the updated module.
    fn step(&mut self, module: M, gradients: GradientsParams) -> M;

    fn learning_rate(&self) -> f64;

    /// Short name used in logs and configuration files.
    fn name(&self) -> &'static str;
}
