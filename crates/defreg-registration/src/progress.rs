//! Progress reporting for registration runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use crate::energy::{Energies, EnergyRecord};

/// Snapshot passed to callbacks at a visualization step.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Position in the scale schedule.
    pub scale: usize,
    pub scale_factor: f64,
    pub iteration: usize,
    /// Iterations configured for this scale.
    pub total_iterations: usize,
    pub energies: Energies,
    pub learning_rate: f64,
    /// Time since the start of the current scale.
    pub elapsed: Duration,
}

impl ProgressInfo {
    pub fn progress_percent(&self) -> f64 {
        if self.total_iterations == 0 {
            100.0
        } else {
            (self.iteration as f64 / self.total_iterations as f64) * 100.0
        }
    }

    pub fn estimated_remaining(&self) -> Option<Duration> {
        if self.iteration == 0 {
            return None;
        }
        let per_iteration = self.elapsed.as_secs_f64() / self.iteration as f64;
        let remaining = self.total_iterations.saturating_sub(self.iteration);
        Some(Duration::from_secs_f64(per_iteration * remaining as f64))
    }

    pub fn record(&self) -> EnergyRecord {
        EnergyRecord {
            scale: self.scale,
            scale_factor: self.scale_factor,
            iteration: self.iteration,
            energies: self.energies,
        }
    }
}

/// Observer of a running registration.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);

    /// Called before the first iteration of each scale.
    fn on_scale_start(&self, _scale: usize, _scale_factor: f64, _spatial_shape: &[usize]) {}

    /// Called once all scales have finished.
    fn on_complete(&self, _energies: &Energies) {}

    fn on_error(&self, _error: &str) {}
}

/// Logs progress through `tracing`.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log every `log_interval`-th reported step.
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 1 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval == 0 || info.iteration == info.total_iterations {
            let remaining = info
                .estimated_remaining()
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());
            tracing::info!(
                "Scale {} ({:.3}) iter {}/{} ({:.1}%) | {} | LR: {:.2e} | ETA: {}",
                info.scale,
                info.scale_factor,
                info.iteration,
                info.total_iterations,
                info.progress_percent(),
                info.energies,
                info.learning_rate,
                remaining
            );
        }
    }

    fn on_scale_start(&self, scale: usize, scale_factor: f64, spatial_shape: &[usize]) {
        tracing::info!("Optimizing scale {} (factor {:.3}) on grid {:?}", scale, scale_factor, spatial_shape);
    }

    fn on_complete(&self, energies: &Energies) {
        tracing::info!("Registration finished: {}", energies);
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Registration failed: {}", error);
    }
}

/// Records every reported step.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_history(&self) -> Vec<ProgressInfo> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(info.clone());
    }
}
