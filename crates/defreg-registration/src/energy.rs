use std::fmt;
use serde::Serialize;

/// Total, similarity and regularization energy of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Energies {
    pub total: f64,
    pub similarity: f64,
    pub regularization: f64,
}

impl Energies {
    pub fn new(similarity: f64, regularization: f64) -> Self {
        Self {
            total: similarity + regularization,
            similarity,
            regularization,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.total.is_finite() && self.similarity.is_finite() && self.regularization.is_finite()
    }
}

impl fmt::Display for Energies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "E={:.6e} | simE={:.6e} | regE={:.6e}",
            self.total, self.similarity, self.regularization
        )
    }
}

/// Energies recorded at one iteration of one scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyRecord {
    /// Position in the scale schedule.
    pub scale: usize,
    pub scale_factor: f64,
    pub iteration: usize,
    pub energies: Energies,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_the_sum() {
        let e = Energies::new(1.5, 0.25);
        assert_eq!(e.total, 1.75);
        assert!(e.is_finite());
        assert!(!Energies::new(f64::NAN, 0.0).is_finite());
        assert!(e.to_string().starts_with("E=1.75"));
    }
}
