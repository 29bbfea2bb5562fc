use image::{Rgb, RgbImage};
use mesoscaler::config::{Config, StageKind};
use mesoscaler::error::{self, CoreResult};
use mesoscaler::packaging::ContainerReader;
use mesoscaler::pipeline::{RunSummary, StageState};
use mesoscaler::predictor::{LandmarkPredictor, PredictionRequest};
use mesoscaler::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Returns the atlas landmarks shifted by a fixed offset; `sparse` images get two.
struct ShiftedAtlasPredictor {
    calls: Arc<AtomicUsize>,
    sparse: &'static str,
}

impl LandmarkPredictor for ShiftedAtlasPredictor {
    fn predict(&self, request: &PredictionRequest<'_>) -> CoreResult<LandmarkSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(request.image.dimensions(), (512, 512));
        let shifted = ReferenceAtlas::canonical_landmarks()
            .transformed(&AffineMatrix::translation(6.0, -4.0), CoordinateSpace::working());
        if request.name == self.sparse {
            let kept: Vec<_> = shifted.iter().take(2).map(|(id, lm)| (id, *lm)).collect();
            return Ok(LandmarkSet::new(CoordinateSpace::working(), kept));
        }
        Ok(shifted)
    }

    fn predictor_name(&self) -> &str {
        "shifted-atlas"
    }
}

struct BrokenPredictor;

impl LandmarkPredictor for BrokenPredictor {
    fn predict(&self, _request: &PredictionRequest<'_>) -> CoreResult<LandmarkSet> {
        Err(MesoscalerError::Predictor("model crashed".into()))
    }

    fn predictor_name(&self) -> &str {
        "broken"
    }
}

fn write_inputs(dir: &Path) {
    for (name, w, h) in [("a.png", 600, 400), ("b.png", 512, 512), ("c.tif", 300, 320)] {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]))
            .save(dir.join(name))
            .unwrap();
    }
    std::fs::write(dir.join("notes.txt"), "not an image").unwrap();
}

fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.pipeline.input_dir = Some(root.join("input"));
    config.pipeline.output_dir = root.join("out");
    config.pipeline.workers = 2;
    config
}

fn run(config: &Config, calls: &Arc<AtomicUsize>) -> RunSummary {
    let predictor = ShiftedAtlasPredictor {
        calls: Arc::clone(calls),
        sparse: "b.png",
    };
    config
        .build_pipeline_with(&StageKind::ALL, Some(Box::new(predictor)))
        .unwrap()
        .run()
        .unwrap()
}

#[test]
fn test_full_run_records_failures_and_packages_the_rest() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("input")).unwrap();
    write_inputs(&root.path().join("input"));
    let config = config(root.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let summary = run(&config, &calls);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let collection = summary.stage("collection").unwrap();
    assert_eq!(collection.succeeded, vec!["a.png", "b.png", "c.tif"]);
    assert_eq!(summary.stage("prediction").unwrap().succeeded.len(), 3);

    let alignment = summary.stage("alignment").unwrap();
    assert_eq!(alignment.succeeded, vec!["a.png", "c.tif"]);
    assert_eq!(alignment.failed.len(), 1);
    assert_eq!(alignment.failed[0].key, "b.png");
    assert_eq!(alignment.failed[0].kind, "InsufficientLandmarks");

    let rois = summary.stage("rois").unwrap();
    assert_eq!(rois.succeeded.len(), 2);
    assert_eq!(rois.failed[0].kind, "MalformedArtifact");

    let packaging = summary.stage("packaging").unwrap();
    assert_eq!(packaging.succeeded.len(), 2);
    assert_eq!(packaging.failed[0].kind, "IncompleteResult");
    assert!(summary.stages.iter().all(|s| s.state == StageState::Completed));
    assert_eq!(summary.failed_images().len(), 1);

    let out = root.path().join("out");
    assert!(out.join("run_summary.json").exists());
    assert!(!out.join("packages/b.png_mesoscaler.mspkg").exists());

    let packaged = ContainerReader.read(out.join("packages/a.png_mesoscaler.mspkg")).unwrap();
    assert_eq!(packaged.native, CoordinateSpace::new(600, 400));
    assert_eq!(packaged.rois.space(), CoordinateSpace::new(600, 400));
    assert!(packaged
        .alignment
        .approx_eq(&AffineMatrix::translation(6.0, -4.0), 1e-6));
    assert_eq!(packaged.images.source.dimensions(), (512, 512));
    assert_ne!(packaged.images.landmarks, packaged.images.source);
    assert_ne!(packaged.images.alignment, packaged.images.source);
}

#[test]
fn test_rerun_skips_existing_artifacts() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("input")).unwrap();
    write_inputs(&root.path().join("input"));
    let mut config = config(root.path());

    let first = Arc::new(AtomicUsize::new(0));
    run(&config, &first);

    let second = Arc::new(AtomicUsize::new(0));
    let summary = run(&config, &second);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(summary.stage("collection").unwrap().skipped.len(), 3);
    assert_eq!(summary.stage("prediction").unwrap().skipped.len(), 3);
    assert_eq!(summary.stage("rois").unwrap().skipped.len(), 2);
    assert_eq!(summary.stage("packaging").unwrap().skipped.len(), 2);

    config.pipeline.overwrite = true;
    let third = Arc::new(AtomicUsize::new(0));
    let summary = run(&config, &third);
    assert_eq!(third.load(Ordering::SeqCst), 3);
    assert!(summary.stage("prediction").unwrap().skipped.is_empty());
}

#[test]
fn test_corrupt_artifact_is_recomputed() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("input")).unwrap();
    write_inputs(&root.path().join("input"));
    let config = config(root.path());
    run(&config, &Arc::new(AtomicUsize::new(0)));

    std::fs::write(root.path().join("out/landmarks/a.png.json"), b"{ truncated").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let summary = run(&config, &calls);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.stage("prediction").unwrap().succeeded, vec!["a.png"]);
}

#[test]
fn test_predictor_failure_aborts_and_keeps_earlier_artifacts() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("input")).unwrap();
    write_inputs(&root.path().join("input"));
    let config = config(root.path());

    let err = config
        .build_pipeline_with(&StageKind::ALL, Some(Box::new(BrokenPredictor)))
        .unwrap()
        .run()
        .unwrap_err();
    assert!(error::is_fatal(&err));

    let out = root.path().join("out");
    assert!(out.join("collected/metadata.json").exists());
    assert!(out.join("collected/images512/a.png.png").exists());
    assert!(!out.join("packages").exists());

    let summary: RunSummary =
        serde_json::from_slice(&std::fs::read(out.join("run_summary.json")).unwrap()).unwrap();
    assert_eq!(summary.stage("prediction").unwrap().state, StageState::Failed);
    assert!(summary.stage("alignment").is_none());
}

#[test]
fn test_stages_can_run_one_at_a_time() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("input")).unwrap();
    write_inputs(&root.path().join("input"));
    let config = config(root.path());
    let calls = Arc::new(AtomicUsize::new(0));

    for stage in StageKind::ALL {
        let predictor: Option<Box<dyn LandmarkPredictor>> = (stage == StageKind::Predict).then(|| {
            Box::new(ShiftedAtlasPredictor {
                calls: Arc::clone(&calls),
                sparse: "none",
            }) as Box<dyn LandmarkPredictor>
        });
        let summary = config
            .build_pipeline_with(&[stage], predictor)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(summary.stages.len(), 1);
        assert!(summary.stages[0].failed.is_empty());
    }

    let packages = std::fs::read_dir(root.path().join("out/packages")).unwrap().count();
    assert_eq!(packages, 3);
}

#[test]
fn test_same_stem_with_different_extensions_gets_two_packages() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    std::fs::create_dir(&input).unwrap();
    RgbImage::from_pixel(600, 400, Rgb([40, 80, 120])).save(input.join("m1.png")).unwrap();
    RgbImage::from_pixel(300, 320, Rgb([90, 90, 90])).save(input.join("m1.tif")).unwrap();
    let config = config(root.path());

    let summary = run(&config, &Arc::new(AtomicUsize::new(0)));
    assert_eq!(summary.stage("packaging").unwrap().succeeded, vec!["m1.png", "m1.tif"]);

    let packages = root.path().join("out/packages");
    let png = ContainerReader.read(packages.join("m1.png_mesoscaler.mspkg")).unwrap();
    let tif = ContainerReader.read(packages.join("m1.tif_mesoscaler.mspkg")).unwrap();
    assert_eq!(png.native, CoordinateSpace::new(600, 400));
    assert_eq!(tif.native, CoordinateSpace::new(300, 320));
    assert_eq!(std::fs::read_dir(&packages).unwrap().count(), 2);
}

#[test]
fn test_multipage_tiff_is_processed_per_frame() {
    use tiff::encoder::{colortype, TiffEncoder};

    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input");
    std::fs::create_dir(&input).unwrap();
    let mut encoder = TiffEncoder::new(std::fs::File::create(input.join("stack.tif")).unwrap()).unwrap();
    for (w, h) in [(256u32, 200u32), (256, 200), (128, 128)] {
        let data: Vec<u8> = (0..w * h).map(|i| (i % 251) as u8).collect();
        encoder.write_image::<colortype::Gray8>(w, h, &data).unwrap();
    }
    drop(encoder);
    let config = config(root.path());

    let summary = run(&config, &Arc::new(AtomicUsize::new(0)));
    let expected = vec!["stack.tif_frame01", "stack.tif_frame02", "stack.tif_frame03"];
    assert_eq!(summary.stage("collection").unwrap().succeeded, expected);
    assert_eq!(summary.stage("packaging").unwrap().succeeded, expected);

    let third = ContainerReader
        .read(root.path().join("out/packages/stack.tif_frame03_mesoscaler.mspkg"))
        .unwrap();
    assert_eq!(third.native, CoordinateSpace::new(128, 128));
    assert_eq!(third.rois.space(), CoordinateSpace::new(128, 128));

    // a second run recognises every frame as already collected
    let again = run(&config, &Arc::new(AtomicUsize::new(0)));
    assert_eq!(again.stage("collection").unwrap().skipped.len(), 3);
}
