pub mod error;
pub mod dimension;
pub mod layout;
pub mod spacing;
pub mod image;
pub mod finite_differences;
pub mod interpolation;
pub mod filter;

pub use error::{RegistrationError, Result};
pub use dimension::Dimension;
pub use spacing::Spacing;
pub use image::Image;
pub use finite_differences::{BoundaryCondition, FiniteDifferences, Scheme};
