use lddmm::prelude::*;
use lddmm::{NormKind, ObjectConfig};
use ndarray::Array2;

/// Ellipse-like closed curve sampled with `n` points
fn closed_curve(n: usize, a: f64, b: f64, shift: f64) -> Result<DeformableMultiObject> {
    let points = Array2::from_shape_fn((n, 2), |(i, c)| {
        let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
        if c == 0 {
            a * angle.cos() + shift
        } else {
            b * angle.sin()
        }
    });
    let segments = Array2::from_shape_fn((n, 2), |(i, j)| (i + j) % n);
    DeformableMultiObject::new(vec![DeformableObject::polyline("contour", points, segments)?])
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    println!("=== Geodesic Regression Example ===\n");

    // A circle that grows into an ellipse drifting to the right
    let template = closed_curve(24, 1.0, 1.0, 0.0)?;
    let dataset = TimeSeriesDataset::new(
        vec![0.5, 1.0, 1.5],
        vec![
            closed_curve(24, 1.15, 1.0, 0.1)?,
            closed_curve(24, 1.3, 0.95, 0.2)?,
            closed_curve(24, 1.45, 0.9, 0.3)?,
        ],
    )?;

    let config = DeformationConfig {
        dimension: 2,
        kernel_width: 0.8,
        t0: 0.0,
        tmin: 0.0,
        tmax: 1.5,
        concentration_of_time_points: 10,
        ..Default::default()
    };
    let attachment = MultiObjectAttachment::from_specifications(&[ObjectConfig {
        name: "contour".to_string(),
        norm: NormKind::Varifold,
        kernel_width: 0.5,
        noise_std: 0.1,
    }])?;

    let output_dir = std::env::temp_dir().join("lddmm_regression_demo");
    let mut model = GeodesicRegression::new(
        "demo",
        template,
        attachment,
        GaussianKernel::new(config.kernel_width)?,
        config,
    )?
    .freeze_control_points(true)
    .with_output_dir(&output_dir);

    println!(
        "{} control points, {} observations\n",
        model.control_points().nrows(),
        dataset.len()
    );

    let optimizer = GradientAscent::new()
        .with_initial_step_size(1e-3)
        .with_max_iterations(30)
        .with_print_every(5);
    let result = optimizer.update(&mut model, &dataset)?;

    println!("\nTermination: {:?} ({})", result.termination, result.message);
    println!("Accepted steps: {}", result.iterations);
    println!(
        "Log-likelihood: {:.4e} [attachment = {:.4e} ; regularity = {:.4e}]",
        result.log_likelihood.total(),
        result.log_likelihood.attachment,
        result.log_likelihood.regularity
    );
    for (parameter, step) in &result.step_sizes {
        println!("  step[{parameter}] = {step:.3e}");
    }
    println!("\nOutputs written to {}", output_dir.display());

    Ok(())
}
