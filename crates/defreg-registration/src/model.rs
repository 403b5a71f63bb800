//! Deformation models and their registration energy.
//!
//! A model owns the optimized parameter field (displacement, velocity or
//! momentum, in physical units) and, for the adaptive model, the network
//! predicting the per-voxel kernel weights. Evaluating it yields
//!
//! E = 1/σ² ∫ (I0∘φ − I1)² dx + λ ∫ |∇v|² dx (+ weight penalties)
//!
//! together with either the deformation map or the warped source image.

use std::fmt;
use std::str::FromStr;
use burn::module::{Ignored, Param};
use burn::prelude::*;
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};
use defreg_core::filter::GaussianFilter;
use defreg_core::interpolation::{axis_ramp, resample, warp};
use defreg_core::{
    BoundaryCondition, Dimension, FiniteDifferences, Image, RegistrationError, Result, Scheme, Spacing,
};
use defreg_model::{
    EdgePenaltyConfig, EntropyLoss, GlobalEntropyLoss, SmootherNetwork, TotalVariationLoss,
};
use crate::energy::Energies;
use crate::settings::{AdaptiveSmootherSettings, ModelSettings};

/// Parameterization of the transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// `φ = id + u`, optimizing `u` directly.
    Displacement,
    /// `φ = exp(v)` for a stationary velocity field `v`.
    Svf,
    /// `φ = exp(v)` with `v = Σ_k w_k ⊙ (G_σk ∗ m)` and network-predicted
    /// weights `w`.
    SvfAdaptiveSmoother,
}

impl ModelKind {
    /// # Errors
    /// `UnknownIdentifier` for unrecognized names.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "displacement" => Ok(Self::Displacement),
            "svf" => Ok(Self::Svf),
            "svf_adaptive_smoother" => Ok(Self::SvfAdaptiveSmoother),
            other => Err(RegistrationError::unknown_identifier("model", other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Displacement => "displacement",
            Self::Svf => "svf",
            Self::SvfAdaptiveSmoother => "svf_adaptive_smoother",
        }
    }
}

/// Model kind plus output mode, named e.g. `svf_map` or `displacement_image`.
///
/// Map models produce the deformation map, image models the warped source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub kind: ModelKind,
    pub use_map: bool,
}

impl ModelSpec {
    pub fn new(kind: ModelKind, use_map: bool) -> Self {
        Self { kind, use_map }
    }

    /// Parse a full model name.
    ///
    /// # Errors
    /// `UnknownIdentifier` if the suffix is not `_map`/`_image` or the base
    /// name is unknown.
    pub fn from_name(name: &str) -> Result<Self> {
        let unknown = || RegistrationError::unknown_identifier("model", name);
        let (base, use_map) = if let Some(base) = name.strip_suffix("_map") {
            (base, true)
        } else if let Some(base) = name.strip_suffix("_image") {
            (base, false)
        } else {
            return Err(unknown());
        };
        let kind = ModelKind::from_name(base).map_err(|_| unknown())?;
        Ok(Self { kind, use_map })
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl FromStr for ModelSpec {
    type Err = RegistrationError;

    fn from_str(name: &str) -> Result<Self> {
        Self::from_name(name)
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.use_map { "map" } else { "image" };
        write!(f, "{}_{}", self.kind.name(), suffix)
    }
}

/// Non-learnable state of a [`DeformationModel`].
#[derive(Debug, Clone)]
pub struct ModelParameters {
    pub spec: ModelSpec,
    pub dim: Dimension,
    /// Spacing of the grid the parameters currently live on.
    pub spacing: Spacing,
    pub sim_sigma: f64,
    pub regularizer_weight: f64,
    pub integration_steps: usize,
    pub adaptive: AdaptiveSmootherSettings,
}

/// Result of evaluating a model on an image pair.
#[derive(Debug, Clone)]
pub struct Evaluation<B: Backend> {
    pub energy: Tensor<B, 1>,
    pub similarity: Tensor<B, 1>,
    pub regularization: Tensor<B, 1>,
    /// Deformation map in physical coordinates (map models only).
    pub map: Option<Tensor<B, 5>>,
    /// Warped source image (image models only).
    pub warped: Option<Tensor<B, 5>>,
}

impl<B: Backend> Evaluation<B> {
    pub fn energies(&self) -> Energies {
        Energies::new(
            self.similarity.clone().into_scalar().elem::<f64>(),
            self.regularization.clone().into_scalar().elem::<f64>(),
        )
    }
}

/// Registration model: parameter field and optional weight network.
#[derive(Module, Debug)]
pub struct DeformationModel<B: Backend> {
    parameters: Param<Tensor<B, 5>>,
    smoother: Option<SmootherNetwork<B>>,
    settings: Ignored<ModelParameters>,
}

impl<B: Backend> DeformationModel<B> {
    /// Zero-initialized model on the grid of `source`.
    ///
    /// # Errors
    /// Network construction errors of the adaptive model.
    pub fn new(spec: ModelSpec, settings: &ModelSettings, source: &Image<B>, device: &B::Device) -> Result<Self> {
        let dim = source.dimension();
        let [b, c, a0, a1, a2] = source.dims();
        let parameters = Tensor::zeros([b, dim.get(), a0, a1, a2], device);

        let smoother = match spec.kind {
            ModelKind::SvfAdaptiveSmoother => Some(
                settings
                    .adaptive_smoother
                    .network_config(c)
                    .init(dim, device)?,
            ),
            _ => None,
        };

        Ok(Self {
            parameters: Param::from_tensor(parameters),
            smoother,
            settings: Ignored(ModelParameters {
                spec,
                dim,
                spacing: source.spacing().clone(),
                sim_sigma: settings.sim_sigma,
                regularizer_weight: settings.regularizer_weight,
                integration_steps: settings.integration_steps,
                adaptive: settings.adaptive_smoother.clone(),
            }),
        })
    }

    pub fn spec(&self) -> ModelSpec {
        self.settings.0.spec
    }

    pub fn spacing(&self) -> &Spacing {
        &self.settings.0.spacing
    }

    /// Raw parameter field `[B, D, A0, A1, A2]`.
    pub fn parameters(&self) -> Tensor<B, 5> {
        self.parameters.val()
    }

    pub fn parameter_image(&self) -> Image<B> {
        Image::from_canonical(self.parameters(), self.spacing().clone())
    }

    /// Move the parameters to another grid; network weights are kept.
    pub fn resampled(self, extent: [usize; 3], spacing: Spacing) -> Self {
        let current = self.parameters.val().detach();
        let mut settings = self.settings.0;
        settings.spacing = spacing;
        Self {
            // the resampled field is a fresh leaf of the next scale's graph
            parameters: Param::from_tensor(resample(current, extent).detach().require_grad()),
            smoother: self.smoother,
            settings: Ignored(settings),
        }
    }

    /// Energy and outputs for warping `source` onto `target`.
    ///
    /// # Errors
    /// `ShapeMismatch` if the images do not live on the parameter grid.
    pub fn evaluate(&self, source: &Image<B>, target: &Image<B>) -> Result<Evaluation<B>> {
        let settings = &self.settings.0;
        let params = self.parameters.val();
        let dims = params.dims();
        for image in [source, target] {
            let image_dims = image.dims();
            if image_dims[2..] != dims[2..] || image_dims[0] != dims[0] {
                return Err(RegistrationError::shape_mismatch(&dims, &image_dims));
            }
        }

        let spacing = &settings.spacing;
        let batch = dims[0] as f64;
        let volume = spacing.volume_element();

        let (field, extra) = match settings.spec.kind {
            ModelKind::Displacement | ModelKind::Svf => (params, None),
            ModelKind::SvfAdaptiveSmoother => {
                let (velocity, penalty) = self.adaptive_velocity(params, source)?;
                (velocity, Some(penalty))
            }
        };

        let field_voxels = self.to_voxels(field.clone());
        let displacement = match settings.spec.kind {
            ModelKind::Displacement => field_voxels,
            _ => self.integrate(field_voxels),
        };

        let warped = warp(source.data().clone(), displacement.clone(), settings.dim);
        let residual = warped.clone() - target.data().clone();
        let similarity = residual
            .powf_scalar(2.0)
            .sum()
            .mul_scalar(volume / (settings.sim_sigma * settings.sim_sigma * batch));

        let fd = FiniteDifferences::new(spacing, BoundaryCondition::Clamped);
        let gradient_energy = fd
            .gradient(field, Scheme::Forward)
            .into_iter()
            .fold(Tensor::zeros([1], &source.data().device()), |acc, d| acc + d.powf_scalar(2.0).sum());
        let mut regularization = gradient_energy.mul_scalar(settings.regularizer_weight * volume / batch);
        if let Some(extra) = extra {
            regularization = regularization + extra;
        }

        let energy = similarity.clone() + regularization.clone();
        let (map, warped) = if settings.spec.use_map {
            (Some(self.identity_map(dims) + self.to_physical(displacement)), None)
        } else {
            (None, Some(warped))
        };

        Ok(Evaluation {
            energy,
            similarity,
            regularization,
            map,
            warped,
        })
    }

    /// Velocity `Σ_k w_k ⊙ (G_σk ∗ m)` and the penalties on `w`.
    fn adaptive_velocity(&self, momentum: Tensor<B, 5>, source: &Image<B>) -> Result<(Tensor<B, 5>, Tensor<B, 1>)> {
        let settings = &self.settings.0;
        let adaptive = &settings.adaptive;
        let smoother = self.smoother.as_ref().ok_or_else(|| {
            RegistrationError::invalid_configuration("adaptive smoother model without a network")
        })?;

        let weights = smoother.forward(source.data().clone())?;
        let mut velocity = momentum.zeros_like();
        for (k, &std) in adaptive.multi_gaussian_stds.iter().enumerate() {
            let smoothed = GaussianFilter::isotropic(std).apply_tensor(momentum.clone(), &settings.spacing)?;
            velocity = velocity + weights.clone().narrow(1, k, 1) * smoothed;
        }

        let edge = EdgePenaltyConfig::new().with_gamma(adaptive.edge_penalty_gamma);
        let tv = TotalVariationLoss::new(settings.dim.get(), edge)?.with_pnorm(adaptive.pnorm)?;
        let mut penalty = tv
            .forward(source.data().clone(), &settings.spacing, weights.clone(), adaptive.use_color_tv)?
            .mul_scalar(adaptive.tv_penalty);
        penalty = penalty
            + EntropyLoss::new()
                .forward(weights.clone(), &settings.spacing)
                .mul_scalar(adaptive.entropy_penalty);
        if adaptive.global_entropy_penalty > 0.0 {
            penalty = penalty
                + GlobalEntropyLoss::new()
                    .forward(weights)
                    .mul_scalar(adaptive.global_entropy_penalty);
        }
        Ok((velocity, penalty))
    }

    /// Scaling and squaring of a voxel-unit velocity field.
    fn integrate(&self, velocity: Tensor<B, 5>) -> Tensor<B, 5> {
        let steps = self.settings.0.integration_steps;
        let dim = self.settings.0.dim;
        let mut flow = velocity.div_scalar(2f64.powi(steps as i32));
        for _ in 0..steps {
            let composed = warp(flow.clone(), flow.clone(), dim);
            flow = flow + composed;
        }
        flow
    }

    /// Per-channel `1 / spacing` (or `spacing`) as a broadcastable tensor.
    fn channel_scale(&self, invert: bool, device: &B::Device) -> Tensor<B, 5> {
        let spacing = self.spacing().as_slice();
        let values: Vec<f32> = spacing
            .iter()
            .map(|&s| if invert { (1.0 / s) as f32 } else { s as f32 })
            .collect();
        Tensor::from_data(TensorData::new(values, [1, spacing.len(), 1, 1, 1]), device)
    }

    fn to_voxels(&self, field: Tensor<B, 5>) -> Tensor<B, 5> {
        let scale = self.channel_scale(true, &field.device());
        field * scale
    }

    fn to_physical(&self, field: Tensor<B, 5>) -> Tensor<B, 5> {
        let scale = self.channel_scale(false, &field.device());
        field * scale
    }

    /// Identity map in physical coordinates, `[B, D, A0, A1, A2]`.
    fn identity_map(&self, dims: [usize; 5]) -> Tensor<B, 5> {
        let settings = &self.settings.0;
        let device = self.parameters.val().device();
        let [b, _, a0, a1, a2] = dims;
        let channels = (0..settings.dim.get())
            .map(|axis| {
                let canonical = settings.dim.canonical_axis(axis);
                Tensor::zeros([b, 1, a0, a1, a2], &device)
                    + axis_ramp::<B>(dims[canonical], canonical, settings.spacing[axis], &device)
            })
            .collect();
        Tensor::cat(channels, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;
    use crate::config::ParameterTree;
    use crate::settings::RegistrationSettings;

    type Backend = NdArray<f32>;

    fn settings() -> ModelSettings {
        RegistrationSettings::from_tree(&mut ParameterTree::new())
            .unwrap()
            .model
    }

    fn image(h: usize, w: usize) -> Image<Backend> {
        let data = Tensor::<Backend, 4>::random([1, 1, h, w], Distribution::Uniform(0.0, 1.0), &Default::default());
        Image::from_tensor(data, Spacing::normalized(&[h, w]).unwrap()).unwrap()
    }

    #[test]
    fn test_model_names() {
        let spec = ModelSpec::from_name("svf_adaptive_smoother_map").unwrap();
        assert_eq!(spec.kind, ModelKind::SvfAdaptiveSmoother);
        assert!(spec.use_map);
        assert_eq!(ModelSpec::from_name("displacement_image").unwrap().name(), "displacement_image");
        for bad in ["svf", "lddmm_map", "svf_warp"] {
            assert!(matches!(
                ModelSpec::from_name(bad),
                Err(RegistrationError::UnknownIdentifier { kind: "model", .. })
            ));
        }
    }

    #[test]
    fn test_zero_parameters_give_identity() {
        let device = Default::default();
        let source = image(8, 6);
        let spec = ModelSpec::new(ModelKind::Svf, true);
        let model = DeformationModel::new(spec, &settings(), &source, &device).unwrap();
        let eval = model.evaluate(&source, &source).unwrap();
        let energies = eval.energies();
        assert!(energies.total.abs() < 1e-6);
        assert!(eval.warped.is_none());

        let map = eval.map.unwrap();
        assert_eq!(map.dims(), [1, 2, 1, 8, 6]);
        let values = map.into_data().to_vec::<f32>().unwrap();
        // first channel ramps along the first spatial axis in [0, 1]
        assert!((values[6] - 1.0 / 7.0).abs() < 1e-6);
        assert!((values[47] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_image_model_returns_warped_image() {
        let device = Default::default();
        let source = image(8, 8);
        let target = image(8, 8);
        let spec = ModelSpec::new(ModelKind::Displacement, false);
        let model = DeformationModel::new(spec, &settings(), &source, &device).unwrap();
        let eval = model.evaluate(&source, &target).unwrap();
        assert!(eval.map.is_none());
        let warped = eval.warped.clone().unwrap();
        let diff: f32 = (warped - source.data().clone()).abs().max().into_scalar();
        assert!(diff < 1e-6);
        assert!(eval.energies().similarity > 0.0);
    }

    #[test]
    fn test_adaptive_model_has_network_penalties() {
        let device = Default::default();
        let source = image(8, 8);
        let spec = ModelSpec::new(ModelKind::SvfAdaptiveSmoother, true);
        let model = DeformationModel::new(spec, &settings(), &source, &device).unwrap();
        let eval = model.evaluate(&source, &source).unwrap();
        // entropy of the initial weights is positive
        assert!(eval.energies().regularization > 0.0);
        assert!(eval.energies().is_finite());
    }

    #[test]
    fn test_shape_mismatch() {
        let device = Default::default();
        let source = image(8, 8);
        let other = image(8, 6);
        let spec = ModelSpec::new(ModelKind::Displacement, true);
        let model = DeformationModel::new(spec, &settings(), &source, &device).unwrap();
        assert!(matches!(
            model.evaluate(&source, &other),
            Err(RegistrationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_resampling_keeps_constant_parameters() {
        let device = Default::default();
        let source = image(9, 9);
        let spec = ModelSpec::new(ModelKind::Displacement, true);
        let model = DeformationModel::new(spec, &settings(), &source, &device).unwrap();
        let model = model.resampled([1, 5, 5], Spacing::normalized(&[5, 5]).unwrap());
        assert_eq!(model.parameters().dims(), [1, 2, 1, 5, 5]);
        assert_eq!(model.spacing().as_slice(), &[0.25, 0.25]);
    }

    type AutodiffBackend = burn::backend::Autodiff<Backend>;

    fn autodiff_image(h: usize, w: usize) -> Image<AutodiffBackend> {
        let data = Tensor::<AutodiffBackend, 4>::random([1, 1, h, w], Distribution::Uniform(0.0, 1.0), &Default::default());
        Image::from_tensor(data, Spacing::normalized(&[h, w]).unwrap()).unwrap()
    }

    fn assert_parameters_train(model: &DeformationModel<AutodiffBackend>, source: &Image<AutodiffBackend>, target: &Image<AutodiffBackend>) {
        let eval = model.evaluate(source, target).unwrap();
        let grads = eval.energy.backward();
        let grad = model.parameters().grad(&grads).unwrap();
        assert_eq!(grad.dims(), model.parameters().dims());
        let values = grad.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        assert!(values.iter().any(|v| v.abs() > 0.0));
    }

    #[test]
    fn test_resampled_parameters_receive_gradients() {
        let device = Default::default();
        let coarse = autodiff_image(5, 5);
        let source = autodiff_image(9, 9);
        let target = autodiff_image(9, 9);
        let spec = ModelSpec::new(ModelKind::Svf, true);

        let model = DeformationModel::new(spec, &settings(), &coarse, &device)
            .unwrap()
            .resampled([1, 9, 9], source.spacing().clone());
        assert_parameters_train(&model, &source, &target);

        // resampling onto the same grid is a no-op for the values
        let model = model.resampled([1, 9, 9], source.spacing().clone());
        assert_parameters_train(&model, &source, &target);
    }
}
