use mesoscaler::algorithms::{ProjectorConfig, RoiProjector};
use mesoscaler::*;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn circle_mask(size: usize, cx: f64, cy: f64, r: f64) -> RoiMask {
    let mask = Array2::from_shape_fn((size, size), |(row, col)| {
        let dx = col as f64 - cx;
        let dy = row as f64 - cy;
        u8::from(dx * dx + dy * dy <= r * r)
    });
    RoiMask::new(RoiMetadata::new("disc", Side::Left, "test disc", 1), mask)
}

fn overlap(a: &Array2<u8>, b: &Array2<u8>) -> f64 {
    let intersection = a.iter().zip(b.iter()).filter(|(x, y)| **x == 1 && **y == 1).count();
    let union = a.iter().zip(b.iter()).filter(|(x, y)| **x == 1 || **y == 1).count();
    intersection as f64 / union as f64
}

#[test]
fn test_circle_scales_with_native_size() {
    let reference = circle_mask(512, 256.0, 256.0, 200.0);
    let projector = RoiProjector::default();
    let target = CoordinateSpace::new(1024, 1024);
    let map = projector.inverse_map(&AffineMatrix::identity(), target).unwrap();
    let projected = projector.project_mask(&reference, &map);

    assert_eq!(projected.mask.dim(), (1024, 1024));
    assert_eq!(projected.mask[[512, 512]], 1);
    assert_eq!(projected.mask[[512, 512 + 390]], 1);
    assert_eq!(projected.mask[[512, 512 + 410]], 0);
    assert_eq!(projected.mask[[512 - 390, 512]], 1);
    assert_eq!(projected.mask[[512 - 410, 512]], 0);

    let expected = std::f64::consts::PI * 400.0 * 400.0;
    let area = projected.area() as f64;
    assert!((area - expected).abs() / expected < 0.01, "area {}", area);
    assert_eq!(projected.meta, reference.meta);
}

#[test]
fn test_forward_then_inverse_reproduces_reference() {
    let mut rng = StdRng::seed_from_u64(2024);
    let reference = circle_mask(512, 256.0, 240.0, 120.0);
    let projector = RoiProjector::default();
    let working = CoordinateSpace::working();

    for _ in 0..5 {
        let transform = AffineMatrix::rotation_about(rng.gen_range(-0.2..0.2), 256.0, 256.0)
            .then(&AffineMatrix::scaling(rng.gen_range(0.9..1.1), rng.gen_range(0.9..1.1)))
            .then(&AffineMatrix::translation(
                rng.gen_range(-20.0..20.0),
                rng.gen_range(-20.0..20.0),
            ));
        let forward = projector.project_mask(&reference, &projector.inverse_map(&transform, working).unwrap());
        let inverse = transform.invert().unwrap();
        let back = projector.project_mask(&forward, &projector.inverse_map(&inverse, working).unwrap());

        let iou = overlap(&reference.mask, &back.mask);
        assert!(iou > 0.95, "round trip overlap {}", iou);
    }
}

#[test]
fn test_projection_is_bit_identical_across_runs() {
    let atlas = ReferenceAtlas::builtin();
    let alignment = AffineMatrix::rotation_about(0.05, 256.0, 256.0)
        .then(&AffineMatrix::translation(4.5, -3.25));
    let target = CoordinateSpace::new(640, 480);

    let parallel = RoiProjector::default();
    let serial = RoiProjector::new(ProjectorConfig {
        parallel_rows: false,
        ..Default::default()
    });
    let a = parallel.project(atlas.outline(), atlas.rois(), &alignment, target).unwrap();
    let b = parallel.project(atlas.outline(), atlas.rois(), &alignment, target).unwrap();
    let c = serial.project(atlas.outline(), atlas.rois(), &alignment, target).unwrap();

    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(a.len(), atlas.rois().len());
    assert!(a.iter().all(|roi| roi.space() == target));
    assert!(a.outline().mask.iter().all(|v| *v <= 1));
}

#[test]
fn test_singular_alignment_is_rejected() {
    let atlas = ReferenceAtlas::builtin();
    let err = RoiProjector::default()
        .project(
            atlas.outline(),
            atlas.rois(),
            &AffineMatrix::scaling(0.0, 1.0),
            CoordinateSpace::new(100, 100),
        )
        .unwrap_err();
    assert!(matches!(err, MesoscalerError::InvalidAlignment { .. }));
}
