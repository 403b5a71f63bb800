pub mod nifti_io;
pub mod normalize;

pub use nifti_io::{read_image, read_image_pair, write_field, ImageMetadata, ImagePair};
pub use normalize::{normalize_intensities, percentile};
