pub mod config;
pub mod settings;
pub mod energy;
pub mod model;
pub mod optimizer;
pub mod registration;
pub mod multiscale;
pub mod validation;
pub mod progress;

pub use config::ParameterTree;
pub use energy::{Energies, EnergyRecord};
pub use model::{DeformationModel, Evaluation, ModelKind, ModelSpec};
pub use multiscale::MultiScaleRegistrationOptimizer;
pub use optimizer::{Optimizer, OptimizerKind};
pub use progress::{ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo};
pub use registration::{Registration, ScaleInfo};
pub use settings::RegistrationSettings;
pub use defreg_core::{RegistrationError, Result};
