use burn::prelude::*;
use burn::tensor::TensorData;
use defreg_core::{RegistrationError, Result};

/// Softmax along the channel axis, biased by per-channel weights.
///
/// Computes `w_k exp(x_k) / sum_j w_j exp(x_j)` with the channel maximum
/// subtracted first. With `weights == None` (or uniform weights) this is the
/// plain softmax.
///
/// # Errors
/// `ShapeMismatch` if the number of weights differs from the channel count.
pub fn weighted_softmax<B: Backend>(x: Tensor<B, 5>, weights: Option<&[f64]>) -> Result<Tensor<B, 5>> {
    let channels = x.dims()[1];
    // the shift cancels in the ratio, so it carries no gradient
    let shifted = x.clone() - x.detach().max_dim(1);
    let exp = shifted.exp();

    let numerator = match weights {
        None => exp,
        Some(w) if w.len() != channels => {
            return Err(RegistrationError::shape_mismatch(&[channels], &[w.len()]));
        }
        Some(w) => {
            let values: Vec<f32> = w.iter().map(|&v| v as f32).collect();
            let w = Tensor::<B, 5>::from_data(TensorData::new(values, [1, channels, 1, 1, 1]), &exp.device());
            exp * w
        }
    };

    let denominator = numerator.clone().sum_dim(1);
    Ok(numerator / denominator)
}
