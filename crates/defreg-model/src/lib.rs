pub mod losses;
pub mod networks;

pub use losses::{ClusteringLoss, EdgePenaltyConfig, EntropyLoss, GlobalEntropyLoss, TotalVariationLoss};
pub use networks::{
    weighted_softmax, SimpleConsistent, SimpleConsistentConfig, SmootherNetwork,
    SmootherNetworkConfig, SmootherNetworkKind,
};
