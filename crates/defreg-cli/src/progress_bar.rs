use std::sync::Mutex;
use indicatif::{ProgressBar, ProgressStyle};
use defreg_registration::{Energies, ProgressCallback, ProgressInfo};

/// Draws one progress bar per scale.
pub struct ScaleProgressBar {
    bar: Mutex<Option<ProgressBar>>,
}

impl ScaleProgressBar {
    pub fn new() -> Self {
        Self { bar: Mutex::new(None) }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }
}

impl ProgressCallback for ScaleProgressBar {
    fn on_scale_start(&self, scale: usize, scale_factor: f64, spatial_shape: &[usize]) {
        let mut slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            previous.finish();
        }
        let bar = ProgressBar::new(0).with_style(Self::style());
        bar.set_prefix(format!("scale {scale} ({scale_factor:.3}, {spatial_shape:?})"));
        *slot = Some(bar);
    }

    fn on_progress(&self, info: &ProgressInfo) {
        let slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = slot.as_ref() {
            bar.set_length(info.total_iterations as u64);
            bar.set_position(info.iteration as u64);
            bar.set_message(info.energies.to_string());
        }
    }

    fn on_complete(&self, energies: &Energies) {
        let mut slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = slot.take() {
            bar.finish_with_message(energies.to_string());
        }
    }

    fn on_error(&self, error: &str) {
        let mut slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = slot.take() {
            bar.abandon_with_message(error.to_string());
        }
    }
}
