//! Error types shared by every defreg crate.
//!
//! Configuration and identifier errors are raised at construction or selection
//! time. Numerical problems (NaN/Inf energies) are never trapped here and flow
//! back to the caller through the energy values.

use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Invalid or inconsistent configuration (even kernel sizes, mismatched
    /// list lengths, non-positive parameters, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Spatial dimensionality outside {1, 2, 3}.
    #[error("Unsupported dimension: {0} (only 1, 2 and 3 are supported)")]
    UnsupportedDimension(usize),

    /// Unrecognized optimizer, model or network name.
    #[error("Unknown {kind}: '{name}'")]
    UnknownIdentifier {
        kind: &'static str,
        name: String,
    },

    /// Functionality that exists only for some dimensionalities.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Error while reading or writing configuration files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an unknown identifier error.
    pub fn unknown_identifier(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownIdentifier {
            kind,
            name: name.into(),
        }
    }

    /// Create a not implemented error.
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RegistrationError::invalid_configuration("even kernel");
        assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_error_display() {
        let err = RegistrationError::unknown_identifier("optimizer", "newton");
        assert_eq!(err.to_string(), "Unknown optimizer: 'newton'");

        let err = RegistrationError::UnsupportedDimension(4);
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_shape_mismatch() {
        let err = RegistrationError::shape_mismatch(&[1, 1, 64, 64], &[1, 1, 32, 32]);
        let err_str = err.to_string();
        assert!(err_str.contains("expected"));
        assert!(err_str.contains("got"));
    }
}
