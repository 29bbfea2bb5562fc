use mesoscaler::algorithms::{AlignmentEstimator, EstimatorConfig, FitStrategy, RansacConfig};
use mesoscaler::*;

fn shifted_atlas(dx: f64, dy: f64) -> LandmarkSet {
    LandmarkSet::new(
        CoordinateSpace::working(),
        LandmarkId::ALL.iter().map(|id| {
            let p = id.atlas_position();
            (*id, Landmark::new(p.x + dx, p.y + dy, 1.0))
        }),
    )
}

#[test]
fn test_atlas_against_itself_is_identity() {
    let reference = ReferenceAtlas::canonical_landmarks();
    let estimate = AlignmentEstimator::default()
        .estimate(&reference, &reference)
        .unwrap();
    assert!(estimate.alignment.approx_eq(&AffineMatrix::identity(), 1e-9));
    assert!(estimate.rms_residual < 1e-9);
    assert_eq!(estimate.used, LandmarkId::ALL.to_vec());
}

#[test]
fn test_translation_scenario() {
    let reference = ReferenceAtlas::canonical_landmarks();
    let estimate = AlignmentEstimator::default()
        .estimate(&reference, &shifted_atlas(10.0, 5.0))
        .unwrap();
    let expected = AffineMatrix::new([[1.0, 0.0, 10.0], [0.0, 1.0, 5.0]]);
    assert!(
        estimate.alignment.approx_eq(&expected, 1e-9),
        "got {:?}",
        estimate.alignment
    );
}

#[test]
fn test_translation_from_three_landmarks() {
    let reference = ReferenceAtlas::canonical_landmarks();
    let data = LandmarkSet::new(
        CoordinateSpace::working(),
        [LandmarkId::M5, LandmarkId::M6, LandmarkId::L1]
            .iter()
            .map(|id| {
                let p = id.atlas_position();
                (*id, Landmark::new(p.x + 10.0, p.y + 5.0, 1.0))
            }),
    );
    let estimate = AlignmentEstimator::default()
        .estimate(&reference, &data)
        .unwrap();
    let expected = AffineMatrix::new([[1.0, 0.0, 10.0], [0.0, 1.0, 5.0]]);
    assert!(
        estimate.alignment.approx_eq(&expected, 1e-9),
        "got {:?}",
        estimate.alignment
    );
    assert_eq!(estimate.used, vec![LandmarkId::L1, LandmarkId::M5, LandmarkId::M6]);
}

#[test]
fn test_unconfident_reference_landmark_is_ignored() {
    let reference = LandmarkSet::new(
        CoordinateSpace::working(),
        LandmarkId::ALL.iter().map(|id| {
            let lm = if *id == LandmarkId::L1 {
                Landmark::new(0.0, 0.0, 0.1)
            } else {
                let p = id.atlas_position();
                Landmark::new(p.x, p.y, 1.0)
            };
            (*id, lm)
        }),
    );
    let estimate = AlignmentEstimator::default()
        .estimate(&reference, &shifted_atlas(10.0, 5.0))
        .unwrap();
    assert!(!estimate.used.contains(&LandmarkId::L1));
    assert_eq!(estimate.used.len(), 8);
    let expected = AffineMatrix::new([[1.0, 0.0, 10.0], [0.0, 1.0, 5.0]]);
    assert!(
        estimate.alignment.approx_eq(&expected, 1e-9),
        "got {:?}",
        estimate.alignment
    );
}

#[test]
fn test_fewer_than_three_confident_landmarks() {
    let reference = ReferenceAtlas::canonical_landmarks();
    let data = LandmarkSet::new(
        CoordinateSpace::working(),
        vec![
            (LandmarkId::L1, Landmark::new(100.0, 150.0, 1.0)),
            (LandmarkId::M5, Landmark::new(256.0, 256.0, 0.99999)),
            // below the default likelihood threshold
            (LandmarkId::R7, Landmark::new(410.0, 148.0, 0.9)),
        ],
    );
    let err = AlignmentEstimator::default()
        .estimate(&reference, &data)
        .unwrap_err();
    assert!(matches!(
        err,
        MesoscalerError::InsufficientLandmarks { needed: 3, got: 2 }
    ));
    assert!(!err.is_fatal());
}

#[test]
fn test_likelihood_threshold_is_inclusive() {
    let reference = ReferenceAtlas::canonical_landmarks();
    let data = LandmarkSet::new(
        CoordinateSpace::working(),
        [LandmarkId::L1, LandmarkId::M5, LandmarkId::R7]
            .iter()
            .map(|id| {
                let p = id.atlas_position();
                (*id, Landmark::new(p.x, p.y, 0.9999))
            }),
    );
    let estimate = AlignmentEstimator::default()
        .estimate(&reference, &data)
        .unwrap();
    assert_eq!(estimate.used.len(), 3);
}

#[test]
fn test_general_affine_is_recovered() {
    let reference = ReferenceAtlas::canonical_landmarks();
    let truth = AffineMatrix::rotation_about(0.12, 256.0, 256.0)
        .then(&AffineMatrix::scaling(1.1, 0.95))
        .then(&AffineMatrix::translation(-7.5, 12.0));
    let data = reference.transformed(&truth, CoordinateSpace::working());

    for strategy in [
        FitStrategy::LeastSquares,
        FitStrategy::Ransac(RansacConfig::default()),
    ] {
        let estimator = AlignmentEstimator::new(EstimatorConfig {
            strategy,
            ..Default::default()
        });
        let estimate = estimator.estimate(&reference, &data).unwrap();
        assert!(estimate.alignment.approx_eq(&truth, 1e-6));
    }
}

#[test]
fn test_rescale_round_trip() {
    let original = shifted_atlas(3.25, -1.5);
    let native = CoordinateSpace::new(1300, 900);
    let back = original
        .rescale(native)
        .unwrap()
        .rescale(CoordinateSpace::working())
        .unwrap();

    assert_eq!(back.space(), CoordinateSpace::working());
    for (id, lm) in original.iter() {
        let other = back.get(id).unwrap();
        assert!((lm.x - other.x).abs() < 1e-9);
        assert!((lm.y - other.y).abs() < 1e-9);
        assert_eq!(lm.likelihood, other.likelihood);
    }
}

#[test]
fn test_matching_ignores_input_order() {
    let reference = ReferenceAtlas::canonical_landmarks();
    let forward: Vec<_> = shifted_atlas(1.0, 2.0).iter().map(|(id, lm)| (id, *lm)).collect();
    let mut reversed = forward.clone();
    reversed.reverse();

    let a = reference.matched_with(&LandmarkSet::new(CoordinateSpace::working(), forward));
    let b = reference.matched_with(&LandmarkSet::new(CoordinateSpace::working(), reversed));
    assert_eq!(a, b);
    let ids: Vec<_> = a.iter().map(|c| c.id).collect();
    assert_eq!(ids, LandmarkId::ALL.to_vec());
}
