//! Typed registration settings, built and validated once from a
//! [`ParameterTree`].
//!
//! Every read goes through [`ParameterTree::value_or`], so the tree ends up
//! holding the complete resolved configuration (and a description for
//! every key), ready to be written back out.

use defreg_core::{RegistrationError, Result};
use defreg_model::{SimpleConsistentConfig, SmootherNetworkConfig, SmootherNetworkKind};
use crate::config::ParameterTree;
use crate::model::ModelKind;
use crate::optimizer::OptimizerKind;

/// Optional pre-smoothing of source and target.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSmoothingSettings {
    pub smooth_images: bool,
    /// Standard deviation in physical units.
    pub gaussian_std: f64,
}

/// Weight network and penalties of the adaptive-smoother model.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveSmootherSettings {
    pub network: SmootherNetworkKind,
    /// Standard deviations of the candidate Gaussians (physical units).
    pub multi_gaussian_stds: Vec<f64>,
    pub kernel_sizes: Vec<usize>,
    pub number_of_features_per_layer: Vec<usize>,
    pub use_batch_normalization: bool,
    pub use_relu: bool,
    pub estimate_around_global_weights: bool,
    pub global_weights: Vec<f64>,
    pub tv_penalty: f64,
    pub entropy_penalty: f64,
    pub global_entropy_penalty: f64,
    pub edge_penalty_gamma: f64,
    pub use_color_tv: bool,
    pub pnorm: f64,
}

impl Default for AdaptiveSmootherSettings {
    fn default() -> Self {
        Self {
            network: SmootherNetworkKind::SimpleConsistent,
            multi_gaussian_stds: vec![0.05, 0.1, 0.15, 0.2, 0.25],
            kernel_sizes: vec![7, 7],
            number_of_features_per_layer: vec![20],
            use_batch_normalization: true,
            use_relu: false,
            estimate_around_global_weights: false,
            global_weights: Vec::new(),
            tv_penalty: 0.1,
            entropy_penalty: 0.01,
            global_entropy_penalty: 0.0,
            edge_penalty_gamma: 10.0,
            use_color_tv: false,
            pnorm: 2.0,
        }
    }
}

impl AdaptiveSmootherSettings {
    pub fn nr_of_gaussians(&self) -> usize {
        self.multi_gaussian_stds.len()
    }

    /// Network configuration for images with `in_channels` channels.
    pub fn network_config(&self, in_channels: usize) -> SmootherNetworkConfig {
        let simple = SimpleConsistentConfig::new(in_channels, self.nr_of_gaussians())
            .with_kernel_sizes(self.kernel_sizes.clone())
            .with_number_of_features_per_layer(self.number_of_features_per_layer.clone())
            .with_use_batch_normalization(self.use_batch_normalization)
            .with_use_relu(self.use_relu)
            .with_estimate_around_global_weights(self.estimate_around_global_weights)
            .with_global_weights(self.global_weights.clone());
        SmootherNetworkConfig::new(self.network, in_channels, self.nr_of_gaussians()).with_simple(simple)
    }

    fn validate(&self) -> Result<()> {
        if self.multi_gaussian_stds.is_empty() || self.multi_gaussian_stds.iter().any(|&s| !(s > 0.0)) {
            return Err(RegistrationError::invalid_configuration(
                "multi_gaussian_stds must be a non-empty list of positive values",
            ));
        }
        if let Some(even) = self.kernel_sizes.iter().find(|&&k| k % 2 == 0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "kernel sizes need to be odd, got {even}"
            )));
        }
        if self.kernel_sizes.len() != self.number_of_features_per_layer.len() + 1 {
            return Err(RegistrationError::invalid_configuration(format!(
                "{} kernel sizes given for {} layers",
                self.kernel_sizes.len(),
                self.number_of_features_per_layer.len() + 1
            )));
        }
        if !self.global_weights.is_empty() && self.global_weights.len() != self.nr_of_gaussians() {
            return Err(RegistrationError::invalid_configuration(format!(
                "{} global weights given for {} Gaussians",
                self.global_weights.len(),
                self.nr_of_gaussians()
            )));
        }
        if self.pnorm < 1.0 {
            return Err(RegistrationError::invalid_configuration(format!(
                "pnorm must be >= 1, got {}",
                self.pnorm
            )));
        }
        let penalties = [self.tv_penalty, self.entropy_penalty, self.global_entropy_penalty, self.edge_penalty_gamma];
        if penalties.iter().any(|&p| !(p >= 0.0)) {
            return Err(RegistrationError::invalid_configuration(
                "penalty weights must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Deformation model and energy weights.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub kind: ModelKind,
    pub use_map: bool,
    /// `sigma` of the similarity term `1/sigma^2 ∫ (I0∘φ - I1)^2`.
    pub sim_sigma: f64,
    /// Weight of the `∫ |∇v|^2` regularizer.
    pub regularizer_weight: f64,
    /// Squaring steps of the velocity integration.
    pub integration_steps: usize,
    pub adaptive_smoother: AdaptiveSmootherSettings,
}

/// Optimizer selection and iteration schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    pub nr_of_iterations: usize,
    pub scale_factors: Vec<f64>,
    pub scale_iterations: Vec<usize>,
}

/// Complete, validated registration settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSettings {
    pub image_smoothing: ImageSmoothingSettings,
    pub model: ModelSettings,
    pub optimizer: OptimizerSettings,
}

impl RegistrationSettings {
    /// Read every recognised key, storing defaults for the missing ones.
    ///
    /// # Errors
    /// * `UnknownIdentifier` for unknown model, optimizer or network names.
    /// * `InvalidConfiguration` for inconsistent values.
    /// * `Serialization` for values of the wrong type.
    pub fn from_tree(tree: &mut ParameterTree) -> Result<Self> {
        let image_smoothing = ImageSmoothingSettings {
            smooth_images: tree.value_or(
                "image_smoothing.smooth_images",
                true,
                "[True|False]; smoothes the images before registration",
            )?,
            gaussian_std: tree.value_or(
                "image_smoothing.smoother.gaussian_std",
                0.01,
                "how much smoothing is done (physical units)",
            )?,
        };
        if !(image_smoothing.gaussian_std > 0.0) {
            return Err(RegistrationError::invalid_configuration(
                "image_smoothing.smoother.gaussian_std must be positive",
            ));
        }

        let model = Self::model_from_tree(tree)?;
        let optimizer = Self::optimizer_from_tree(tree)?;

        Ok(Self {
            image_smoothing,
            model,
            optimizer,
        })
    }

    fn model_from_tree(tree: &mut ParameterTree) -> Result<ModelSettings> {
        let use_map: bool = tree.value_or(
            "model.deformation.use_map",
            true,
            "[True|False] either do computations via a map or directly using the image",
        )?;
        let name: String = tree.value_or(
            "model.deformation.name",
            "svf".to_string(),
            "name of the deformation model: displacement, svf or svf_adaptive_smoother",
        )?;
        let kind = ModelKind::from_name(&name)?;

        let base = "model.registration_model";
        let sim_sigma: f64 = tree.value_or(
            &format!("{base}.similarity_measure.sigma"),
            0.1,
            "1/sigma^2 is the weight in front of the similarity measure",
        )?;
        let regularizer_weight: f64 = tree.value_or(
            &format!("{base}.regularizer.weight"),
            1.0,
            "weight of the gradient regularizer on the velocity/displacement",
        )?;
        let integration_steps: usize = tree.value_or(
            &format!("{base}.integration_steps"),
            6,
            "number of scaling and squaring steps (2^n sub-steps)",
        )?;
        if !(sim_sigma > 0.0) || !(regularizer_weight >= 0.0) {
            return Err(RegistrationError::invalid_configuration(
                "similarity sigma must be positive and the regularizer weight non-negative",
            ));
        }

        let a = format!("{base}.adaptive_smoother");
        let d = AdaptiveSmootherSettings::default();
        let network: String = tree.value_or(
            &format!("{a}.network"),
            d.network.name().to_string(),
            "weight network: simple_consistent, unet, unet_no_skip or encoder_decoder_small",
        )?;
        let adaptive_smoother = AdaptiveSmootherSettings {
            network: network.parse()?,
            multi_gaussian_stds: tree.value_or(
                &format!("{a}.multi_gaussian_stds"),
                d.multi_gaussian_stds,
                "standard deviations of the candidate Gaussians",
            )?,
            kernel_sizes: tree.value_or(
                &format!("{a}.kernel_sizes"),
                d.kernel_sizes,
                "size of the convolution kernels",
            )?,
            number_of_features_per_layer: tree.value_or(
                &format!("{a}.number_of_features_per_layer"),
                d.number_of_features_per_layer,
                "Number of features for the convolution later; last one is set to number of Gaussians",
            )?,
            use_batch_normalization: tree.value_or(
                &format!("{a}.use_batch_normalization"),
                d.use_batch_normalization,
                "If true, uses batch normalization between layers",
            )?,
            use_relu: tree.value_or(
                &format!("{a}.use_relu"),
                d.use_relu,
                "if set to True uses Relu, otherwise sigmoid",
            )?,
            estimate_around_global_weights: tree.value_or(
                &format!("{a}.estimate_around_global_weights"),
                d.estimate_around_global_weights,
                "if true, the softmax is biased towards the global weights",
            )?,
            global_weights: tree.value_or(
                &format!("{a}.global_weights"),
                d.global_weights,
                "prior weight per Gaussian; empty for uniform",
            )?,
            tv_penalty: tree.value_or(
                &format!("{a}.tv_penalty"),
                d.tv_penalty,
                "weight of the edge-aware total variation of the weights",
            )?,
            entropy_penalty: tree.value_or(
                &format!("{a}.entropy_penalty"),
                d.entropy_penalty,
                "weight of the local entropy of the weights",
            )?,
            global_entropy_penalty: tree.value_or(
                &format!("{a}.global_entropy_penalty"),
                d.global_entropy_penalty,
                "weight of the entropy of the average kernel usage",
            )?,
            edge_penalty_gamma: tree.value_or(
                &format!("{a}.edge_penalty_gamma"),
                d.edge_penalty_gamma,
                "edge sensitivity of the localized edge penalty",
            )?,
            use_color_tv: tree.value_or(
                &format!("{a}.use_color_tv"),
                d.use_color_tv,
                "combine the per-kernel TV terms with an L2 norm",
            )?,
            pnorm: tree.value_or(
                &format!("{a}.pnorm"),
                d.pnorm,
                "exponent of the local gradient norm in the TV term",
            )?,
        };
        adaptive_smoother.validate()?;

        Ok(ModelSettings {
            kind,
            use_map,
            sim_sigma,
            regularizer_weight,
            integration_steps,
            adaptive_smoother,
        })
    }

    fn optimizer_from_tree(tree: &mut ParameterTree) -> Result<OptimizerSettings> {
        let name: String = tree.value_or(
            "optimizer.name",
            "adam".to_string(),
            "optimizer: sgd, momentum or adam",
        )?;
        let settings = OptimizerSettings {
            kind: OptimizerKind::from_name(&name)?,
            learning_rate: tree.value_or("optimizer.learning_rate", 0.01, "learning rate")?,
            nr_of_iterations: tree.value_or(
                "optimizer.single_scale.nr_of_iterations",
                20,
                "number of iterations for the single-scale solution",
            )?,
            scale_factors: tree.value_or(
                "optimizer.multi_scale.scale_factors",
                vec![0.25, 0.5, 1.0],
                "how images are scaled; scales run from coarse to fine",
            )?,
            scale_iterations: tree.value_or(
                "optimizer.multi_scale.scale_iterations",
                vec![20, 20, 10],
                "number of iterations per scale",
            )?,
        };

        if !(settings.learning_rate > 0.0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "learning rate must be positive, got {}",
                settings.learning_rate
            )));
        }
        validate_schedule(&settings.scale_factors, &settings.scale_iterations)?;
        Ok(settings)
    }
}

/// Scale factors and iteration counts must pair up and factors must lie in
/// `(0, 1]`.
pub fn validate_schedule(scale_factors: &[f64], iterations: &[usize]) -> Result<()> {
    if scale_factors.is_empty() || scale_factors.len() != iterations.len() {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} scale factors given with {} iteration counts",
            scale_factors.len(),
            iterations.len()
        )));
    }
    if let Some(bad) = scale_factors.iter().find(|&&f| !(f > 0.0 && f <= 1.0)) {
        return Err(RegistrationError::invalid_configuration(format!(
            "scale factors must lie in (0, 1], got {bad}"
        )));
    }
    Ok(())
}
