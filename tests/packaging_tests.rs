use image::{Rgb, RgbImage};
use mesoscaler::algorithms::RoiProjector;
use mesoscaler::packaging::{schema, Container, ContainerReader, ResultComponents, ResultPackager};
use mesoscaler::*;

fn components(name: &str, native: CoordinateSpace) -> ResultComponents {
    let atlas = ReferenceAtlas::builtin();
    let alignment = AffineMatrix::translation(3.0, -2.0);
    let rois = RoiProjector::default()
        .project(atlas.outline(), atlas.rois(), &alignment, native)
        .unwrap();
    let shade = |v: u8| RgbImage::from_pixel(512, 512, Rgb([v, v, v]));

    ResultComponents {
        native: Some(native),
        source_image: Some(shade(10)),
        landmarks_image: Some(shade(20)),
        alignment_image: Some(shade(30)),
        landmarks: Some(atlas.landmarks().transformed(&alignment, CoordinateSpace::working())),
        alignment: Some(alignment),
        rois: Some(rois),
        ..ResultComponents::new(name, format!("/data/raw/{}", name))
    }
}

#[test]
fn test_batch_with_one_incomplete_image() {
    let dir = tempfile::tempdir().unwrap();
    let native = CoordinateSpace::new(160, 120);
    let mut broken = components("m2.png", native);
    broken.alignment = None;
    let batch = vec![components("m1.png", native), broken, components("m3.png", native)];

    let packager = ResultPackager::default();
    let summary = packager.package_batch(batch, dir.path()).unwrap();

    assert_eq!(summary.packaged.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    let (name, err) = &summary.failed[0];
    assert_eq!(name, "m2.png");
    match err {
        MesoscalerError::IncompleteResult { image, missing } => {
            assert_eq!(image, "m2.png");
            assert_eq!(missing, &vec!["alignment".to_string()]);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!dir.path().join("m2.png_mesoscaler.mspkg").exists());
    assert!(dir.path().join("m1.png_mesoscaler.mspkg").exists());
    assert!(dir.path().join("m3.png_mesoscaler.mspkg").exists());
}

#[test]
fn test_package_contents_follow_schema() {
    let dir = tempfile::tempdir().unwrap();
    let native = CoordinateSpace::new(200, 150);
    let packager = ResultPackager::default();
    let path = packager
        .package(components("session1/m1.png", native), dir.path())
        .unwrap();
    assert_eq!(path.file_name().unwrap(), "session1__m1.png_mesoscaler.mspkg");

    let container = Container::read_from(&path).unwrap();
    for attr in ["image_name", "source_path", "width", "height", "created_at", "format_version"] {
        assert!(container.attrs().contains_key(attr), "missing attribute {}", attr);
    }
    assert_eq!(container.attrs()["width"], 200);
    assert_eq!(container.attrs()["height"], 150);

    for image in ["source", "landmarks", "alignment"] {
        let ds = container
            .dataset(&format!("{}/{}", schema::IMAGES_GROUP, image))
            .unwrap();
        assert_eq!(ds.shape, vec![512, 512, 3]);
    }
    assert_eq!(container.dataset(schema::ALIGNMENT_DATASET).unwrap().shape, vec![2, 3]);
    assert_eq!(container.dataset("rois/outline").unwrap().shape, vec![150, 200]);

    let left = container.children("rois/left");
    let right = container.children("rois/right");
    assert_eq!(left.len(), right.len());
    assert!(!left.is_empty());
    let (_, first) = left[0];
    for key in ["name", "side", "description", "AllenID"] {
        assert!(first.attrs.contains_key(key), "missing ROI attribute {}", key);
    }

    let result = ContainerReader.read(&path).unwrap();
    assert_eq!(result.image_name, "session1/m1.png");
    assert_eq!(result.native, native);
    assert_eq!(result.rois.space(), native);
    assert!(result.alignment.approx_eq(&AffineMatrix::translation(3.0, -2.0), 1e-12));
    assert_eq!(result.landmarks.len(), 9);
}

#[test]
fn test_rois_in_wrong_space_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut parts = components("m1.png", CoordinateSpace::new(160, 120));
    parts.native = Some(CoordinateSpace::new(320, 240));
    let err = ResultPackager::default().package(parts, dir.path()).unwrap_err();
    assert!(matches!(err, MesoscalerError::SpaceMismatch { .. }));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}
