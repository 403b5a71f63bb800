//! Intensity normalization applied to images as they are read.

use anyhow::{bail, Result};

/// Percentile with linear interpolation between order statistics.
///
/// `q` is given in percent. Returns `None` for an empty slice.
pub fn percentile(values: &[f32], q: f64) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = (position - lower as f64) as f32;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Scale `values` so that their 95th percentile becomes 0.95.
///
/// Returns the applied factor.
///
/// # Errors
/// Fails if the 95th percentile is not a positive number.
pub fn normalize_intensities(values: &mut [f32]) -> Result<f32> {
    let p95 = percentile(values, 95.0).unwrap_or(0.0);
    if !(p95 > 0.0 && p95.is_finite()) {
        bail!("cannot normalize intensities: 95th percentile is {p95}");
    }
    let factor = 0.95 / p95;
    values.iter_mut().for_each(|v| *v *= factor);
    Ok(factor)
}
