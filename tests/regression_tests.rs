use std::path::PathBuf;

use lddmm::algorithms::optimization::{FixedEffects, GradientAscent, StatisticalModel};
use lddmm::attachments::{DeformableMultiObject, DeformableObject, MultiObjectAttachment};
use lddmm::core::{DeformationConfig, Kernel, NormKind, ObjectConfig};
use lddmm::io::read_2d_array;
use lddmm::kernels::GaussianKernel;
use lddmm::models::{GeodesicRegression, TimeSeriesDataset};
use ndarray::{arr2, Array2};

fn curve(points: Array2<f64>) -> DeformableMultiObject {
    let n = points.nrows();
    let segments = Array2::from_shape_fn((n - 1, 2), |(i, j)| i + j);
    DeformableMultiObject::new(vec![
        DeformableObject::polyline("curve", points, segments).unwrap(),
    ])
    .unwrap()
}

fn template_points() -> Array2<f64> {
    arr2(&[[0.0, 0.0], [0.5, 0.2], [1.0, 0.3], [1.5, 0.2]])
}

fn dataset() -> TimeSeriesDataset {
    TimeSeriesDataset::new(
        vec![0.5, 1.0],
        vec![
            curve(template_points().mapv(|v| v + 0.1)),
            curve(template_points().mapv(|v| v * 1.2 + 0.1)),
        ],
    )
    .unwrap()
}

fn model(norm: NormKind) -> GeodesicRegression {
    let config = DeformationConfig {
        dimension: 2,
        kernel_width: 1.0,
        t0: 0.0,
        concentration_of_time_points: 10,
        ..Default::default()
    };
    let attachment = MultiObjectAttachment::from_specifications(&[ObjectConfig {
        name: "curve".to_string(),
        norm,
        kernel_width: 0.5,
        noise_std: 0.5,
    }])
    .unwrap();
    GeodesicRegression::new(
        "regression",
        curve(template_points()),
        attachment,
        GaussianKernel::new(1.0).unwrap(),
        config,
    )
    .unwrap()
    .with_control_points(arr2(&[[0.25, 0.0], [1.25, 0.3]]))
    .unwrap()
    .with_momenta(arr2(&[[0.1, 0.2], [-0.1, 0.3]]))
    .unwrap()
}

fn total(model: &GeodesicRegression, dataset: &TimeSeriesDataset, fe: &FixedEffects) -> f64 {
    model
        .compute_log_likelihood(dataset, fe, false)
        .unwrap()
        .total()
}

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("lddmm_{tag}_{}", std::process::id()))
}

#[test]
fn test_gradient_matches_finite_differences() {
    let dataset = dataset();
    for norm in [NormKind::Current, NormKind::Varifold, NormKind::Landmark] {
        let model = model(norm);
        let fe = model.fixed_effects();
        let ll = model.compute_log_likelihood(&dataset, &fe, true).unwrap();
        let gradient = ll.gradient.clone().unwrap();

        assert_eq!(gradient.len(), 3);
        assert!((ll.total() - total(&model, &dataset, &fe)).abs() < 1e-12);

        let h = 1e-5;
        for (key, values) in &fe {
            for i in 0..values.len() {
                let mut plus = fe.clone();
                plus.get_mut(key).unwrap()[i] += h;
                let mut minus = fe.clone();
                minus.get_mut(key).unwrap()[i] -= h;
                let fd = (total(&model, &dataset, &plus) - total(&model, &dataset, &minus)) / (2.0 * h);
                let g = gradient[key][i];
                assert!(
                    (fd - g).abs() < 1e-6 * g.abs().max(1.0),
                    "{norm:?} {key}[{i}]: tape {g} vs finite difference {fd}"
                );
            }
        }
    }
}

#[test]
fn test_regularity_is_minus_kinetic_energy() {
    let model = model(NormKind::Landmark);
    let dataset = dataset();
    let ll = model
        .compute_log_likelihood(&dataset, &model.fixed_effects(), false)
        .unwrap();

    let kernel = GaussianKernel::new(1.0).unwrap();
    let q = model.control_points();
    let p = model.momenta();
    let energy = (p * &kernel.convolve(q, q, p).unwrap()).sum();
    // forward segment spans one unit of time
    assert!((ll.regularity + energy).abs() < 1e-12);
    assert!(ll.attachment < 0.0);
}

#[test]
fn test_frozen_parameters_are_absent() {
    let model = model(NormKind::Varifold)
        .freeze_template(true)
        .freeze_control_points(true);
    let fe = model.fixed_effects();
    assert_eq!(fe.keys().collect::<Vec<_>>(), vec!["Momenta"]);

    let ll = model.compute_log_likelihood(&dataset(), &fe, true).unwrap();
    let gradient = ll.gradient.unwrap();
    assert_eq!(gradient.keys().collect::<Vec<_>>(), vec!["Momenta"]);
}

#[test]
fn test_template_gradient_smoothing() {
    let dataset = dataset();
    let raw_model = model(NormKind::Current);
    let smooth_model = model(NormKind::Current)
        .with_smoothing_kernel_width(0.8)
        .unwrap();
    let fe = raw_model.fixed_effects();

    let raw = raw_model
        .compute_log_likelihood(&dataset, &fe, true)
        .unwrap()
        .gradient
        .unwrap();
    let smoothed = smooth_model
        .compute_log_likelihood(&dataset, &fe, true)
        .unwrap()
        .gradient
        .unwrap();

    let points = template_points();
    let raw_template = Array2::from_shape_vec((4, 2), raw["TemplateData"].to_vec()).unwrap();
    let expected = GaussianKernel::new(0.8)
        .unwrap()
        .convolve(&points, &points, &raw_template)
        .unwrap();
    for (a, b) in smoothed["TemplateData"].iter().zip(expected.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
    assert_eq!(smoothed["Momenta"], raw["Momenta"]);
}

#[test]
fn test_set_fixed_effects_updates_model() {
    let mut model = model(NormKind::Landmark);
    let mut fe = model.fixed_effects();
    fe.get_mut("Momenta").unwrap()[0] = 0.7;
    fe.get_mut("TemplateData").unwrap()[1] = -0.4;

    model.set_fixed_effects(&fe).unwrap();
    assert_eq!(model.momenta()[[0, 0]], 0.7);
    assert_eq!(model.template_data()[[0, 1]], -0.4);
    assert_eq!(model.template().objects()[0].points()[[0, 1]], -0.4);

    fe.remove("ControlPoints");
    assert!(model.set_fixed_effects(&fe).is_err());
}

#[test]
fn test_gradient_ascent_improves_the_fit() {
    let dataset = dataset();
    let mut model = model(NormKind::Varifold);
    let initial = total(&model, &dataset, &model.fixed_effects());

    let optimizer = GradientAscent::new()
        .with_initial_step_size(1e-2)
        .with_max_iterations(15)
        .with_print_every(5);
    let result = optimizer.update(&mut model, &dataset).unwrap();

    assert!(result.iterations >= 1);
    assert!(result.log_likelihood.total() > initial);
    assert_eq!(model.fixed_effects(), result.fixed_effects);
}

#[test]
fn test_write_outputs() {
    let dir = temp_dir("regression_write");
    let _ = std::fs::remove_dir_all(&dir);
    let model = model(NormKind::Current).with_output_dir(&dir);

    model.write(&dataset()).unwrap();

    let control_points =
        read_2d_array(&dir.join("regression__EstimatedParameters__ControlPoints.txt")).unwrap();
    assert_eq!(&control_points, model.control_points());
    let momenta = read_2d_array(&dir.join("regression__EstimatedParameters__Momenta.txt")).unwrap();
    assert_eq!(&momenta, model.momenta());
    let template =
        read_2d_array(&dir.join("regression__EstimatedParameters__Template_curve.txt")).unwrap();
    assert_eq!(template, template_points());

    // t0 = tmin = 0, tmax = 1, ten steps per unit of time
    let first = read_2d_array(&dir.join("regression__GeodesicFlow__curve__tp_0__age_0.00.txt")).unwrap();
    assert_eq!(first, template_points());
    assert!(dir
        .join("regression__GeodesicFlow__curve__tp_10__age_1.00.txt")
        .exists());
    assert!(!dir
        .join("regression__GeodesicFlow__curve__tp_11__age_1.10.txt")
        .exists());

    std::fs::remove_dir_all(&dir).unwrap();
}
