pub mod block;
pub mod simple;
pub mod smoother;
pub mod softmax;
pub mod unet;

pub use block::{Activation, ConvBnRel, ConvBnRelConfig};
pub use simple::{SimpleConsistent, SimpleConsistentConfig};
pub use smoother::{SmootherNetwork, SmootherNetworkConfig, SmootherNetworkKind};
pub use softmax::weighted_softmax;
pub use unet::{EncoderDecoderSmall, Unet, UnetNoSkip};
