//! Named optimizers wrapping burn's `Sgd` and `Adam`.
//!
//! The optimizer is selected by name at runtime (`"sgd"`, `"momentum"`,
//! `"adam"`); unrecognized names fail before any iteration runs.

pub mod adaptor;
pub mod trait_;

use std::fmt;
use std::str::FromStr;
use burn::module::AutodiffModule;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use defreg_core::{RegistrationError, Result};

pub use adaptor::StepRule;
pub use trait_::Optimizer;

/// Momentum factor of the `"momentum"` optimizer.
pub const DEFAULT_MOMENTUM: f64 = 0.9;

/// Optimizer selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Momentum,
    Adam,
}

impl OptimizerKind {
    /// # Errors
    /// `UnknownIdentifier` for names other than `sgd`, `momentum`, `adam`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sgd" => Ok(Self::Sgd),
            "momentum" => Ok(Self::Momentum),
            "adam" => Ok(Self::Adam),
            other => Err(RegistrationError::unknown_identifier("optimizer", other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sgd => "sgd",
            Self::Momentum => "momentum",
            Self::Adam => "adam",
        }
    }

    /// Fresh optimizer state for module type `M`.
    pub fn build<M, B>(self, learning_rate: f64) -> Box<dyn Optimizer<M, B>>
    where
        M: AutodiffModule<B> + 'static,
        B: AutodiffBackend,
    {
        let name = self.name();
        match self {
            Self::Sgd => Box::new(StepRule::new(name, SgdConfig::new().init(), learning_rate)),
            Self::Momentum => {
                let momentum = MomentumConfig::new().with_momentum(DEFAULT_MOMENTUM);
                let rule = SgdConfig::new().with_momentum(Some(momentum)).init();
                Box::new(StepRule::new(name, rule, learning_rate))
            }
            Self::Adam => Box::new(StepRule::new(name, AdamConfig::new().init(), learning_rate)),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = RegistrationError;

    fn from_str(name: &str) -> Result<Self> {
        Self::from_name(name)
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
