use std::sync::Arc;
use std::time::Instant;
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;
use defreg_core::{Image, Result};
use crate::energy::EnergyRecord;
use crate::model::DeformationModel;
use crate::optimizer::Optimizer;
use crate::progress::{ProgressCallback, ProgressInfo};

/// Where a single-scale run sits in the scale schedule.
#[derive(Debug, Clone, Copy)]
pub struct ScaleInfo {
    pub index: usize,
    pub factor: f64,
}

impl Default for ScaleInfo {
    fn default() -> Self {
        Self { index: 0, factor: 1.0 }
    }
}

/// Single-scale gradient descent on a [`DeformationModel`].
pub struct Registration<B: AutodiffBackend> {
    optimizer: Box<dyn Optimizer<DeformationModel<B>, B>>,
    callback: Option<Arc<dyn ProgressCallback>>,
    visualize_step: Option<usize>,
}

impl<B: AutodiffBackend> Registration<B> {
    pub fn new(optimizer: Box<dyn Optimizer<DeformationModel<B>, B>>) -> Self {
        Self {
            optimizer,
            callback: None,
            visualize_step: None,
        }
    }

    /// Report to `callback` every `step` iterations (and at the last one).
    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>, step: usize) -> Self {
        self.callback = Some(callback);
        self.visualize_step = Some(step.max(1));
        self
    }

    pub fn optimizer_name(&self) -> &'static str {
        self.optimizer.name()
    }

    /// Run `iterations` optimizer steps and return the updated model together
    /// with the energy of every iteration (evaluated before its step).
    ///
    /// Non-finite energies are logged but do not stop the run.
    pub fn execute(
        &mut self,
        source: &Image<B>,
        target: &Image<B>,
        mut model: DeformationModel<B>,
        iterations: usize,
        scale: ScaleInfo,
    ) -> Result<(DeformationModel<B>, Vec<EnergyRecord>)> {
        let start = Instant::now();
        let mut records = Vec::with_capacity(iterations);

        for i in 0..iterations {
            let evaluation = model.evaluate(source, target)?;
            let energies = evaluation.energies();
            if !energies.is_finite() {
                tracing::warn!("Iteration {}: non-finite energy ({})", i, energies);
            }

            let info = ProgressInfo {
                scale: scale.index,
                scale_factor: scale.factor,
                iteration: i + 1,
                total_iterations: iterations,
                energies,
                learning_rate: self.optimizer.learning_rate(),
                elapsed: start.elapsed(),
            };
            records.push(info.record());
            if let (Some(callback), Some(step)) = (&self.callback, self.visualize_step) {
                if i % step == 0 || i + 1 == iterations {
                    callback.on_progress(&info);
                }
            }
            tracing::debug!("Iteration {}: {}", i, energies);

            let grads = evaluation.energy.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = self.optimizer.step(model, grads);
        }
        Ok((model, records))
    }
}
