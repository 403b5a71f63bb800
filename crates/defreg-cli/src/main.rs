use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use clap::{ArgAction, Parser};
use tracing::{info, warn};
use defreg_core::Image;
use defreg_io::{read_image_pair, write_field, ImageMetadata};
use defreg_registration::{
    ConsoleProgressCallback, MultiScaleRegistrationOptimizer, ParameterTree, RegistrationSettings,
};

mod progress_bar;

use progress_bar::ScaleProgressBar;

type Backend = Autodiff<NdArray<f32>>;

/// Root key under which settings files may nest the registration settings.
const ALGCONF_ROOT: &str = "algconf";

#[derive(Parser, Debug)]
#[command(name = "defreg")]
#[command(about = "Registers two images")]
struct Cli {
    /// Moving (source) image
    #[arg(long)]
    moving_image: PathBuf,

    /// Target image
    #[arg(long)]
    target_image: PathBuf,

    /// JSON settings file; defaults are used for missing entries
    #[arg(long)]
    alg_conf: Option<PathBuf>,

    /// Show progress every `visualize_step` iterations
    #[arg(long)]
    visualize: bool,

    /// Number of iterations between progress updates
    #[arg(long, default_value_t = 5)]
    visualize_step: usize,

    /// Prefix for writing the used configuration
    #[arg(long)]
    used_config: Option<String>,

    /// Use the multi-scale schedule instead of a single scale
    #[arg(long)]
    use_multiscale: bool,

    /// Take the spacing from the image header instead of mapping to [0,1]^d
    #[arg(long = "no-normalize-spacing", action = ArgAction::SetFalse)]
    normalize_spacing: bool,

    /// Keep the intensities instead of scaling the 95th percentile to 0.95
    #[arg(long = "no-normalize-intensities", action = ArgAction::SetFalse)]
    normalize_intensities: bool,

    /// File to write the resulting map to (map-based models)
    #[arg(long)]
    write_map: Option<PathBuf>,

    /// File to write the warped source image to (image-based models)
    #[arg(long)]
    write_warped_image: Option<PathBuf>,

    /// File to write the optimized registration parameters to
    #[arg(long)]
    write_reg_params: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let since = Instant::now();

    let mut tree = load_settings(cli.alg_conf.as_deref())?;
    let settings = RegistrationSettings::from_tree(&mut tree).context("Invalid registration settings")?;

    let device = Default::default();
    let pair = read_image_pair::<Backend, _, _>(
        &cli.moving_image,
        &cli.target_image,
        cli.normalize_spacing,
        cli.normalize_intensities,
        &device,
    )?;
    info!("Spacing = {:?}", pair.source.spacing().as_slice());

    let (scale_factors, scale_iterations) = if cli.use_multiscale {
        (
            settings.optimizer.scale_factors.clone(),
            settings.optimizer.scale_iterations.clone(),
        )
    } else {
        (vec![1.0], vec![settings.optimizer.nr_of_iterations])
    };

    let mut optimizer = MultiScaleRegistrationOptimizer::<Backend>::new(
        &pair.source.spatial_shape(),
        pair.source.spacing().clone(),
        settings.model.use_map,
        settings.clone(),
        &device,
    )?;
    optimizer.set_optimizer_by_name(settings.optimizer.kind.name())?;
    optimizer.set_visualization(cli.visualize);
    optimizer.set_visualize_step(cli.visualize_step);
    if cli.visualize {
        optimizer.set_progress_callback(Arc::new(ScaleProgressBar::new()));
    } else {
        optimizer.set_progress_callback(Arc::new(ConsoleProgressCallback::default()));
    }
    let model_name = optimizer.model_spec().name();
    optimizer.set_model(&model_name)?;
    optimizer.set_source_image(pair.source.clone())?;
    optimizer.set_target_image(pair.target.clone())?;
    optimizer.set_scale_factors(scale_factors);
    optimizer.set_number_of_iterations_per_scale(scale_iterations);

    let energies = optimizer.optimize()?;
    info!(
        "The final energy was: E={}, similarityE={}, regE={}",
        energies.total, energies.similarity, energies.regularization
    );

    let reference = &pair.source_metadata;
    write_output(cli.write_map.as_deref(), optimizer.map(), reference, "Map", &model_name)?;
    write_output(
        cli.write_warped_image.as_deref(),
        optimizer.warped_image(),
        reference,
        "Warped image",
        &model_name,
    )?;
    write_output(
        cli.write_reg_params.as_deref(),
        optimizer.model_parameters(),
        reference,
        "Registration parameters",
        &model_name,
    )?;

    if let Some(prefix) = &cli.used_config {
        info!("Writing the used configuration to file.");
        tree.write_json(format!("{prefix}_settings_clean.json"))?;
        tree.write_json_comments(format!("{prefix}_settings_comments.json"))?;
    }

    info!("time {:.3}s", since.elapsed().as_secs_f64());
    Ok(())
}

/// Settings tree from `path`, unwrapping an `algconf` root if present.
fn load_settings(path: Option<&Path>) -> Result<ParameterTree> {
    let Some(path) = path else {
        info!("No settings file given, using defaults");
        return Ok(ParameterTree::new());
    };
    let tree = ParameterTree::load_json(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if tree.contains(ALGCONF_ROOT) {
        Ok(tree.subtree(ALGCONF_ROOT))
    } else {
        Ok(tree)
    }
}

fn write_output(
    path: Option<&Path>,
    field: Option<Image<Backend>>,
    reference: &ImageMetadata,
    what: &str,
    model_name: &str,
) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    match field {
        Some(field) => write_field(path, &field, Some(reference)),
        None => {
            warn!(
                "{} cannot be written to {}: not computed by model {}",
                what,
                path.display(),
                model_name
            );
            Ok(())
        }
    }
}
