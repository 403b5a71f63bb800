pub mod gaussian;
pub mod pyramid;

pub use gaussian::GaussianFilter;
pub use pyramid::{downsample_by_factor, ImagePyramid};
