//! Input checks run before a registration starts.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use defreg_core::{Image, RegistrationError, Result};

/// Relative tolerance when comparing spacings.
const SPACING_TOLERANCE: f64 = 1e-6;

/// Source and target must share their full shape and spacing.
pub fn validate_image_pair<B: Backend>(source: &Image<B>, target: &Image<B>) -> Result<()> {
    let source_shape = source.shape();
    let target_shape = target.shape();
    if source_shape != target_shape {
        return Err(RegistrationError::shape_mismatch(&source_shape, &target_shape));
    }

    let mismatch = source
        .spacing()
        .as_slice()
        .iter()
        .zip(target.spacing().as_slice())
        .any(|(a, b)| (a - b).abs() > SPACING_TOLERANCE * a.abs().max(b.abs()));
    if mismatch {
        return Err(RegistrationError::invalid_configuration(format!(
            "source spacing {:?} differs from target spacing {:?}",
            source.spacing().as_slice(),
            target.spacing().as_slice()
        )));
    }
    Ok(())
}

/// Image extent must match the extent the optimizer was created for.
pub fn validate_spatial_shape<B: Backend>(image: &Image<B>, expected: &[usize]) -> Result<()> {
    let actual = image.spatial_shape();
    if actual != expected {
        return Err(RegistrationError::shape_mismatch(expected, &actual));
    }
    Ok(())
}

/// Learning rate must be a positive finite number.
pub fn validate_learning_rate(lr: f64) -> Result<()> {
    if !(lr.is_finite() && lr > 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "Learning rate must be positive, got {}",
            lr
        )));
    }
    Ok(())
}

/// Whether every element is finite. Logs a warning otherwise; the caller
/// decides whether to continue.
pub fn check_finite<B: Backend, const D: usize>(tensor: &Tensor<B, D>, what: &str) -> bool {
    // NaN and infinities both propagate through the sum
    let finite = tensor.clone().abs().sum().into_scalar().elem::<f64>().is_finite();
    if !finite {
        tracing::warn!("{} contains non-finite values", what);
    }
    finite
}
