use std::sync::Arc;
use burn::backend::Autodiff;
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use defreg_core::{Image, RegistrationError, Spacing};
use defreg_registration::{
    HistoryCallback, MultiScaleRegistrationOptimizer, ParameterTree, RegistrationSettings,
};

type B = Autodiff<NdArray<f32>>;

const N: usize = 64;

fn blob(offset: f32) -> Image<B> {
    let center = N as f32 / 2.0 + offset;
    let sigma = 4.0f32;
    let mut data = Vec::with_capacity(N * N);
    for y in 0..N {
        for x in 0..N {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            data.push((-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp());
        }
    }
    let tensor = Tensor::<B, 4>::from_data(TensorData::new(data, [1, 1, N, N]), &Default::default());
    Image::from_tensor(tensor, Spacing::normalized(&[N, N]).unwrap()).unwrap()
}

fn settings(json: &str) -> RegistrationSettings {
    let mut tree = ParameterTree::from_json_str(json).unwrap();
    RegistrationSettings::from_tree(&mut tree).unwrap()
}

const SGD: &str = r#"{
    "optimizer": {
        "name": "sgd",
        "learning_rate": 0.002,
        "multi_scale": {"scale_factors": [1.0], "scale_iterations": [0]}
    }
}"#;

fn optimizer(use_map: bool, json: &str) -> MultiScaleRegistrationOptimizer<B> {
    let mut optimizer = MultiScaleRegistrationOptimizer::<B>::new(
        &[N, N],
        Spacing::normalized(&[N, N]).unwrap(),
        use_map,
        settings(json),
        &Default::default(),
    )
    .unwrap();
    optimizer.set_source_image(blob(2.0)).unwrap();
    optimizer.set_target_image(blob(0.0)).unwrap();
    optimizer
}

fn initial_energy() -> f64 {
    let mut opt = optimizer(true, SGD);
    opt.optimize().unwrap().total
}

#[test]
fn test_single_scale_map_registration() {
    let initial = initial_energy();
    assert!(initial > 0.0);

    let mut opt = optimizer(true, SGD);
    opt.set_scale_factors(vec![1.0]);
    opt.set_number_of_iterations_per_scale(vec![5]);
    let energies = opt.optimize().unwrap();

    assert!(energies.is_finite());
    assert!(energies.total <= initial);
    assert_eq!(opt.energy_history().len(), 5);
    assert!(opt.warped_image().is_none());

    let map = opt.map().unwrap().into_tensor::<4>().unwrap();
    assert_eq!(map.dims(), [1, 2, N, N]);
    let values = map.into_data().to_vec::<f32>().unwrap();
    assert!(values.iter().all(|v| v.is_finite()));
}

#[test]
fn test_image_model_returns_warped_image() {
    let mut opt = optimizer(false, SGD);
    opt.set_number_of_iterations_per_scale(vec![2]);
    opt.optimize().unwrap();
    assert!(opt.map().is_none());
    let warped = opt.warped_image().unwrap();
    assert_eq!(warped.spatial_shape(), vec![N, N]);
}

#[test]
fn test_multi_scale_matches_single_scale() {
    let initial = initial_energy();

    let mut single = optimizer(true, SGD);
    single.set_number_of_iterations_per_scale(vec![15]);
    let single = single.optimize().unwrap();

    let mut multi = optimizer(true, SGD);
    multi.set_scale_factors(vec![0.25, 0.5, 1.0]);
    multi.set_number_of_iterations_per_scale(vec![5, 5, 5]);
    let history = Arc::new(HistoryCallback::new());
    multi.set_progress_callback(history.clone());
    multi.set_visualization(true);
    multi.set_visualize_step(1);
    let energies = multi.optimize().unwrap();

    assert!(energies.is_finite() && single.is_finite());
    assert!(energies.total <= initial * 1.001);
    assert!(energies.total < 10.0 * single.total.max(1e-6));

    let scales: Vec<usize> = history.get_history().iter().map(|p| p.scale).collect();
    assert_eq!(scales.len(), 15);
    assert_eq!(scales[0], 0);
    assert_eq!(scales[14], 2);
    assert_eq!(multi.energy_history()[0].scale_factor, 0.25);
}

#[test]
fn test_scales_run_coarse_to_fine_whatever_the_configured_order() {
    let initial = initial_energy();
    let mut opt = optimizer(true, SGD);
    opt.set_model("svf_map").unwrap();
    opt.set_scale_factors(vec![1.0, 0.25, 0.5]);
    opt.set_number_of_iterations_per_scale(vec![1, 3, 2]);
    let energies = opt.optimize().unwrap();
    assert!(energies.is_finite());
    assert!(energies.total <= initial * 1.001);

    let factors: Vec<f64> = opt.energy_history().iter().map(|r| r.scale_factor).collect();
    assert_eq!(factors, vec![0.25, 0.25, 0.25, 0.5, 0.5, 1.0]);
    let scales: Vec<usize> = opt.energy_history().iter().map(|r| r.scale).collect();
    assert_eq!(scales, vec![0, 0, 0, 1, 1, 2]);
}

#[test]
fn test_default_schedule_ends_at_full_resolution() {
    let defaults = settings("{}");
    assert_eq!(defaults.optimizer.scale_factors.last(), Some(&1.0));

    let mut opt = optimizer(true, r#"{"optimizer": {"name": "sgd", "learning_rate": 0.002}}"#);
    opt.set_number_of_iterations_per_scale(vec![1, 1, 1]);
    opt.optimize().unwrap();
    let factors: Vec<f64> = opt.energy_history().iter().map(|r| r.scale_factor).collect();
    assert_eq!(factors, vec![0.25, 0.5, 1.0]);
}

#[test]
fn test_repeated_optimize_continues() {
    let mut opt = optimizer(true, SGD);
    opt.set_number_of_iterations_per_scale(vec![3]);
    let first = opt.optimize().unwrap();
    let second = opt.optimize().unwrap();
    assert_eq!(opt.energy_history().len(), 6);
    assert!(second.total <= first.total * 1.001);

    let params = opt.model_parameters().unwrap();
    let magnitude: f32 = params.data().clone().abs().sum().into_scalar();
    assert!(magnitude > 0.0);
}

#[test]
fn test_adaptive_smoother_model_runs() {
    let json = r#"{
        "model": {"deformation": {"name": "svf_adaptive_smoother"}},
        "optimizer": {
            "name": "adam",
            "multi_scale": {"scale_factors": [0.5, 1.0], "scale_iterations": [1, 1]}
        }
    }"#;
    let mut opt = optimizer(true, json);
    let energies = opt.optimize().unwrap();
    assert!(energies.is_finite());
    assert!(energies.regularization > 0.0);
}

#[test]
fn test_unknown_names_are_rejected() {
    let mut opt = optimizer(true, SGD);
    assert!(matches!(
        opt.set_optimizer_by_name("newton"),
        Err(RegistrationError::UnknownIdentifier { kind: "optimizer", .. })
    ));
    assert!(matches!(
        opt.set_model("lddmm_map"),
        Err(RegistrationError::UnknownIdentifier { kind: "model", .. })
    ));
    assert!(opt.set_model("displacement_image").is_ok());
    assert!(opt.set_optimizer_by_name("momentum").is_ok());
}

#[test]
fn test_invalid_setup_is_reported() {
    let mut opt = MultiScaleRegistrationOptimizer::<B>::new(
        &[N, N],
        Spacing::normalized(&[N, N]).unwrap(),
        true,
        settings(SGD),
        &Default::default(),
    )
    .unwrap();
    assert!(matches!(opt.optimize(), Err(RegistrationError::InvalidConfiguration(_))));

    opt.set_source_image(blob(0.0)).unwrap();
    opt.set_target_image(blob(0.0)).unwrap();
    opt.set_scale_factors(vec![1.0, 0.5]);
    assert!(matches!(opt.optimize(), Err(RegistrationError::InvalidConfiguration(_))));

    let small = Image::<B>::from_tensor(
        Tensor::<B, 4>::zeros([1, 1, 8, 8], &Default::default()),
        Spacing::normalized(&[8, 8]).unwrap(),
    )
    .unwrap();
    assert!(matches!(
        opt.set_source_image(small),
        Err(RegistrationError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_settings_survive_a_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    let mut tree = ParameterTree::from_json_str(SGD).unwrap();
    let original = RegistrationSettings::from_tree(&mut tree).unwrap();
    tree.write_json(&path).unwrap();
    tree.write_json_comments(dir.path().join("settings_comments.json")).unwrap();

    let mut loaded = ParameterTree::load_json(&path).unwrap();
    let reloaded = RegistrationSettings::from_tree(&mut loaded).unwrap();
    assert_eq!(original, reloaded);
    assert_eq!(loaded.values(), tree.values());
}
