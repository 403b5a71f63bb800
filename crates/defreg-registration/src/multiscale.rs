//! Coarse-to-fine driver around [`Registration`].
//!
//! Images are optionally smoothed, then for each configured scale factor
//! both images are downsampled, the model parameters are resampled onto the
//! new grid and a fresh optimizer runs the configured number of iterations.
//! Scales run in the order given; parameters carry over between scales and
//! between calls to [`MultiScaleRegistrationOptimizer::optimize`].

use std::sync::Arc;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use defreg_core::filter::{GaussianFilter, ImagePyramid};
use defreg_core::{Image, RegistrationError, Result, Spacing};
use crate::energy::{Energies, EnergyRecord};
use crate::model::{DeformationModel, ModelSpec};
use crate::optimizer::OptimizerKind;
use crate::progress::ProgressCallback;
use crate::registration::{Registration, ScaleInfo};
use crate::settings::{validate_schedule, RegistrationSettings};
use crate::validation::{check_finite, validate_image_pair, validate_learning_rate, validate_spatial_shape};

/// Outputs of the last completed optimization.
#[derive(Debug, Clone)]
struct Outcome<B: AutodiffBackend> {
    energies: Energies,
    map: Option<Tensor<B, 5>>,
    warped: Option<Tensor<B, 5>>,
}

pub struct MultiScaleRegistrationOptimizer<B: AutodiffBackend> {
    spatial_shape: Vec<usize>,
    spacing: Spacing,
    settings: RegistrationSettings,
    spec: ModelSpec,
    optimizer: OptimizerKind,
    scale_factors: Vec<f64>,
    scale_iterations: Vec<usize>,
    visualize: bool,
    visualize_step: usize,
    callback: Option<Arc<dyn ProgressCallback>>,
    source: Option<Image<B>>,
    target: Option<Image<B>>,
    model: Option<DeformationModel<B>>,
    outcome: Option<Outcome<B>>,
    history: Vec<EnergyRecord>,
    device: B::Device,
}

impl<B: AutodiffBackend> MultiScaleRegistrationOptimizer<B> {
    /// Optimizer for images of extent `spatial_shape` and spacing `spacing`.
    ///
    /// `use_map` picks between the map and image variant of the configured
    /// model.
    ///
    /// # Errors
    /// `ShapeMismatch` if `spacing` and `spatial_shape` disagree in length.
    pub fn new(
        spatial_shape: &[usize],
        spacing: Spacing,
        use_map: bool,
        settings: RegistrationSettings,
        device: &B::Device,
    ) -> Result<Self> {
        if spatial_shape.len() != spacing.len() {
            return Err(RegistrationError::shape_mismatch(
                &[spatial_shape.len()],
                &[spacing.len()],
            ));
        }
        let spec = ModelSpec::new(settings.model.kind, use_map);
        Ok(Self {
            spatial_shape: spatial_shape.to_vec(),
            spacing,
            spec,
            optimizer: settings.optimizer.kind,
            scale_factors: settings.optimizer.scale_factors.clone(),
            scale_iterations: settings.optimizer.scale_iterations.clone(),
            settings,
            visualize: false,
            visualize_step: 5,
            callback: None,
            source: None,
            target: None,
            model: None,
            outcome: None,
            history: Vec::new(),
            device: device.clone(),
        })
    }

    /// # Errors
    /// `UnknownIdentifier` for unknown optimizer names.
    pub fn set_optimizer_by_name(&mut self, name: &str) -> Result<()> {
        self.optimizer = OptimizerKind::from_name(name)?;
        Ok(())
    }

    /// Select the model by full name (e.g. `svf_map`). Discards any
    /// previously optimized parameters.
    ///
    /// # Errors
    /// `UnknownIdentifier` for unknown model names.
    pub fn set_model(&mut self, name: &str) -> Result<()> {
        self.spec = ModelSpec::from_name(name)?;
        self.model = None;
        self.outcome = None;
        Ok(())
    }

    pub fn set_source_image(&mut self, image: Image<B>) -> Result<()> {
        validate_spatial_shape(&image, &self.spatial_shape)?;
        self.source = Some(image);
        Ok(())
    }

    pub fn set_target_image(&mut self, image: Image<B>) -> Result<()> {
        validate_spatial_shape(&image, &self.spatial_shape)?;
        self.target = Some(image);
        Ok(())
    }

    pub fn set_scale_factors(&mut self, factors: Vec<f64>) {
        self.scale_factors = factors;
    }

    pub fn set_number_of_iterations_per_scale(&mut self, iterations: Vec<usize>) {
        self.scale_iterations = iterations;
    }

    pub fn set_visualization(&mut self, visualize: bool) {
        self.visualize = visualize;
    }

    pub fn set_visualize_step(&mut self, step: usize) {
        self.visualize_step = step.max(1);
    }

    pub fn set_progress_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callback = Some(callback);
    }

    pub fn model_spec(&self) -> ModelSpec {
        self.spec
    }

    pub fn optimizer_kind(&self) -> OptimizerKind {
        self.optimizer
    }

    /// Run all scales and return the energy at full resolution.
    ///
    /// # Errors
    /// * `InvalidConfiguration` if an image is missing or the scale schedule
    ///   is inconsistent.
    /// * Any error raised while building or evaluating the model.
    pub fn optimize(&mut self) -> Result<Energies> {
        let result = self.run();
        if let (Err(err), Some(callback)) = (&result, &self.callback) {
            callback.on_error(&err.to_string());
        }
        result
    }

    fn run(&mut self) -> Result<Energies> {
        let (source, target) = match (&self.source, &self.target) {
            (Some(source), Some(target)) => (source.clone(), target.clone()),
            _ => {
                return Err(RegistrationError::invalid_configuration(
                    "source and target images must be set before optimizing",
                ))
            }
        };
        validate_schedule(&self.scale_factors, &self.scale_iterations)?;
        validate_learning_rate(self.settings.optimizer.learning_rate)?;
        validate_image_pair(&source, &target)?;

        let (source, target) = if self.settings.image_smoothing.smooth_images {
            let filter = GaussianFilter::isotropic(self.settings.image_smoothing.gaussian_std);
            (filter.apply(&source)?, filter.apply(&target)?)
        } else {
            (source, target)
        };

        let (factors, scale_iterations): (Vec<f64>, Vec<usize>) =
            coarse_to_fine(&self.scale_factors, &self.scale_iterations).into_iter().unzip();
        let source_pyramid = ImagePyramid::new(&source, &factors)?;
        let target_pyramid = ImagePyramid::new(&target, &factors)?;
        let mut model = self.model.take();

        for level in 0..source_pyramid.levels() {
            let (Some(level_source), Some(level_target), Some(factor)) = (
                source_pyramid.level(level),
                target_pyramid.level(level),
                source_pyramid.factor(level),
            ) else {
                break;
            };
            let iterations = scale_iterations[level];
            let extent = spatial_extent(level_source);

            let current = match model {
                Some(model) => model.resampled(extent, level_source.spacing().clone()),
                None => DeformationModel::new(self.spec, &self.settings.model, level_source, &self.device)?,
            };

            tracing::info!(
                "Scale {} (factor {:.3}): {:?}, {} iterations",
                level,
                factor,
                level_source.spatial_shape(),
                iterations
            );
            if let Some(callback) = &self.callback {
                callback.on_scale_start(level, factor, &level_source.spatial_shape());
            }

            let optimizer = self
                .optimizer
                .build::<DeformationModel<B>, B>(self.settings.optimizer.learning_rate);
            let mut registration = Registration::new(optimizer);
            if let (true, Some(callback)) = (self.visualize, &self.callback) {
                registration = registration.with_callback(callback.clone(), self.visualize_step);
            }
            let scale = ScaleInfo { index: level, factor };
            let (updated, records) =
                registration.execute(level_source, level_target, current, iterations, scale)?;
            self.history.extend(records);
            let scale_energies = updated.evaluate(level_source, level_target)?.energies();
            tracing::info!("Scale {} finished: {}", level, scale_energies);
            model = Some(updated);
        }

        let model = match model {
            Some(model) => model.resampled(spatial_extent(&source), source.spacing().clone()),
            None => DeformationModel::new(self.spec, &self.settings.model, &source, &self.device)?,
        };
        let evaluation = model.evaluate(&source, &target)?;
        let energies = evaluation.energies();
        if let Some(map) = &evaluation.map {
            check_finite(map, "deformation map");
        }
        tracing::info!("Final energy: {}", energies);
        if let Some(callback) = &self.callback {
            callback.on_complete(&energies);
        }

        self.outcome = Some(Outcome {
            energies,
            map: evaluation.map.map(|t| t.detach()),
            warped: evaluation.warped.map(|t| t.detach()),
        });
        self.model = Some(model);
        Ok(energies)
    }

    /// Energy after the last optimization.
    pub fn energy(&self) -> Option<Energies> {
        self.outcome.as_ref().map(|o| o.energies)
    }

    /// Warped source image; only produced by image models.
    pub fn warped_image(&self) -> Option<Image<B>> {
        let warped = self.outcome.as_ref()?.warped.clone()?;
        Some(Image::from_canonical(warped, self.spacing.clone()))
    }

    /// Deformation map in physical coordinates; only produced by map models.
    pub fn map(&self) -> Option<Image<B>> {
        let map = self.outcome.as_ref()?.map.clone()?;
        Some(Image::from_canonical(map, self.spacing.clone()))
    }

    /// Optimized parameter field on the full-resolution grid.
    pub fn model_parameters(&self) -> Option<Image<B>> {
        self.model.as_ref().map(|m| m.parameter_image())
    }

    /// Energies of every iteration of every call so far.
    pub fn energy_history(&self) -> &[EnergyRecord] {
        &self.history
    }
}

/// Pair each scale factor with its iteration count, coarsest scale first.
pub fn coarse_to_fine(scale_factors: &[f64], iterations: &[usize]) -> Vec<(f64, usize)> {
    let mut schedule: Vec<(f64, usize)> = scale_factors.iter().copied().zip(iterations.iter().copied()).collect();
    schedule.sort_by(|a, b| a.0.total_cmp(&b.0));
    schedule
}

fn spatial_extent<B: AutodiffBackend>(image: &Image<B>) -> [usize; 3] {
    let [_, _, a0, a1, a2] = image.dims();
    [a0, a1, a2]
}
