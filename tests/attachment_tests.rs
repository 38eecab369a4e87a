use approx::assert_relative_eq;
use lddmm::attachments::{DeformableMultiObject, DeformableObject, MultiObjectAttachment, ObjectNorm};
use lddmm::core::{Error, NormKind};
use lddmm::kernels::GaussianKernel;
use ndarray::{arr2, Array2};

fn open_curve(name: &str, points: Array2<f64>) -> DeformableObject {
    let n = points.nrows();
    let segments = Array2::from_shape_fn((n - 1, 2), |(i, j)| i + j);
    DeformableObject::polyline(name, points, segments).unwrap()
}

fn reversed_curve(name: &str, points: Array2<f64>) -> DeformableObject {
    let n = points.nrows();
    let segments = Array2::from_shape_fn((n - 1, 2), |(i, j)| i + 1 - j);
    DeformableObject::polyline(name, points, segments).unwrap()
}

fn tetrahedron(name: &str, shift: f64) -> DeformableObject {
    let points = arr2(&[
        [0.0 + shift, 0.0, 0.0],
        [1.0 + shift, 0.0, 0.0],
        [0.0 + shift, 1.0, 0.0],
        [0.0 + shift, 0.0, 1.0],
    ]);
    let triangles = arr2(&[[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]]);
    DeformableObject::surface_mesh(name, points, triangles).unwrap()
}

fn norm(kind: NormKind, width: f64, variance: f64) -> ObjectNorm<GaussianKernel> {
    ObjectNorm {
        kind,
        kernel: GaussianKernel::new(width).unwrap(),
        noise_variance: variance,
    }
}

fn arc() -> Array2<f64> {
    arr2(&[[0.0, 0.0], [0.5, 0.3], [1.0, 0.4], [1.5, 0.3], [2.0, 0.0]])
}

fn line() -> Array2<f64> {
    arr2(&[[0.0, -1.0], [1.0, -1.2], [2.0, -1.0]])
}

#[test]
fn test_identical_inputs_give_exactly_zero() {
    for kind in [NormKind::Current, NormKind::Varifold, NormKind::Landmark] {
        let template = DeformableMultiObject::new(vec![open_curve("arc", arc())]).unwrap();
        let attachment = MultiObjectAttachment::new(vec![norm(kind, 0.6, 1.0)]);
        let d = attachment
            .distance(&template.points(), &template, &template)
            .unwrap();
        assert_eq!(d, 0.0, "{kind:?}");
    }

    let surface = DeformableMultiObject::new(vec![tetrahedron("tet", 0.0)]).unwrap();
    for kind in [NormKind::Current, NormKind::Varifold] {
        let attachment = MultiObjectAttachment::new(vec![norm(kind, 1.0, 1.0)]);
        let d = attachment
            .weighted_distance(&surface.points(), &surface, &surface)
            .unwrap();
        assert_eq!(d, 0.0, "{kind:?}");
    }
}

#[test]
fn test_distance_is_positive_for_different_shapes() {
    let template = DeformableMultiObject::new(vec![tetrahedron("tet", 0.0)]).unwrap();
    let target = DeformableMultiObject::new(vec![tetrahedron("tet", 0.3)]).unwrap();
    for kind in [NormKind::Current, NormKind::Varifold, NormKind::Landmark] {
        let attachment = MultiObjectAttachment::new(vec![norm(kind, 1.0, 1.0)]);
        let d = attachment
            .distance(&template.points(), &template, &target)
            .unwrap();
        assert!(d > 0.0, "{kind:?}: {d}");
    }
}

#[test]
fn test_symmetric_under_object_permutation() {
    let template = DeformableMultiObject::new(vec![
        open_curve("arc", arc()),
        open_curve("line", line()),
    ])
    .unwrap();
    let target = DeformableMultiObject::new(vec![
        open_curve("arc", arc().mapv(|v| v * 1.1)),
        open_curve("line", line().mapv(|v| v + 0.2)),
    ])
    .unwrap();
    let attachment = MultiObjectAttachment::new(vec![
        norm(NormKind::Current, 0.5, 0.5),
        norm(NormKind::Varifold, 0.8, 2.0),
    ]);

    let swapped_template = DeformableMultiObject::new(vec![
        template.objects()[1].clone(),
        template.objects()[0].clone(),
    ])
    .unwrap();
    let swapped_target = DeformableMultiObject::new(vec![
        target.objects()[1].clone(),
        target.objects()[0].clone(),
    ])
    .unwrap();
    let swapped_attachment = MultiObjectAttachment::new(vec![
        attachment.norms()[1].clone(),
        attachment.norms()[0].clone(),
    ]);

    let d = attachment
        .weighted_distance(&template.points(), &template, &target)
        .unwrap();
    let d_swapped = swapped_attachment
        .weighted_distance(&swapped_template.points(), &swapped_template, &swapped_target)
        .unwrap();
    assert!(d > 0.0);
    assert_relative_eq!(d, d_swapped, max_relative = 1e-12);
}

#[test]
fn test_symmetric_under_cell_permutation() {
    let template = DeformableMultiObject::new(vec![tetrahedron("tet", 0.0)]).unwrap();
    let target = DeformableMultiObject::new(vec![tetrahedron("tet", 0.25)]).unwrap();

    // same triangles listed in another order, with cyclically rotated vertices
    let permuted = DeformableObject::surface_mesh(
        "tet",
        template.points(),
        arr2(&[[2, 3, 1], [1, 0, 2], [3, 0, 1], [3, 2, 0]]),
    )
    .unwrap();
    let permuted = DeformableMultiObject::new(vec![permuted]).unwrap();

    for kind in [NormKind::Current, NormKind::Varifold] {
        let attachment = MultiObjectAttachment::new(vec![norm(kind, 0.7, 1.0)]);
        let d = attachment
            .distance(&template.points(), &template, &target)
            .unwrap();
        let d_permuted = attachment
            .distance(&permuted.points(), &permuted, &target)
            .unwrap();
        assert_relative_eq!(d, d_permuted, max_relative = 1e-12);
    }
}

#[test]
fn test_varifold_ignores_orientation_but_current_does_not() {
    let template = DeformableMultiObject::new(vec![open_curve("arc", arc())]).unwrap();
    let flipped = DeformableMultiObject::new(vec![reversed_curve("arc", arc())]).unwrap();

    let varifold = MultiObjectAttachment::new(vec![norm(NormKind::Varifold, 0.5, 1.0)]);
    let d = varifold
        .distance(&template.points(), &template, &flipped)
        .unwrap();
    assert!(d.abs() < 1e-12, "varifold distance to flipped curve: {d}");

    let current = MultiObjectAttachment::new(vec![norm(NormKind::Current, 0.5, 1.0)]);
    let d = current
        .distance(&template.points(), &template, &flipped)
        .unwrap();
    let self_product = current
        .distance(
            &template.points(),
            &template,
            &DeformableMultiObject::new(vec![open_curve("arc", Array2::zeros((5, 2)))]).unwrap(),
        )
        .unwrap();
    // |S - (-S)|² = 4 |S|²
    assert_relative_eq!(d, 4.0 * self_product, max_relative = 1e-10);
}

#[test]
fn test_mismatched_object_lists() {
    let template = DeformableMultiObject::new(vec![
        open_curve("arc", arc()),
        open_curve("line", line()),
    ])
    .unwrap();
    let target = DeformableMultiObject::new(vec![open_curve("arc", arc())]).unwrap();
    let attachment = MultiObjectAttachment::new(vec![
        norm(NormKind::Current, 0.5, 1.0),
        norm(NormKind::Current, 0.5, 1.0),
    ]);

    assert!(matches!(
        attachment.distance(&template.points(), &template, &target),
        Err(Error::DimensionMismatch {
            expected: 2,
            got: 1
        })
    ));
}

#[test]
fn test_landmark_counts_must_match() {
    let template = DeformableMultiObject::new(vec![DeformableObject::landmark(
        "pts",
        arr2(&[[0.0, 0.0], [1.0, 0.0]]),
    )
    .unwrap()])
    .unwrap();
    let target = DeformableMultiObject::new(vec![DeformableObject::landmark(
        "pts",
        arr2(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]),
    )
    .unwrap()])
    .unwrap();
    let attachment = MultiObjectAttachment::new(vec![norm(NormKind::Landmark, 1.0, 1.0)]);
    assert!(matches!(
        attachment.distance(&template.points(), &template, &target),
        Err(Error::DimensionMismatch { .. })
    ));
}
