use crate::algorithms::{AlignmentEstimator, RoiProjector};
use crate::atlas::ReferenceAtlas;
use crate::data::{
    annotate, artifact_key, collect_image_files, count_frames, load_working_frame,
    load_working_image, unique_names_from_paths,
};
use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::CoordinateSpace;
use crate::landmarks::LandmarkSet;
use crate::packaging::{schema, Container, ResultComponents, ResultPackager};
use crate::pipeline::executor::{process_images, Step};
use crate::pipeline::store::StoreKind;
use crate::pipeline::{
    AlignmentArtifact, Frame, ImageRecord, PipelineStage, RunContext, StageReport, METADATA_KEY,
};
use crate::predictor::{LandmarkPredictor, PredictionRequest};
use crate::rois::RoiSet;
use crate::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Working-space copies of the source images.
pub const IMAGES_GROUP: &str = schema::IMAGES_GROUP;
/// Working images with predicted landmarks drawn on.
pub const ANNOTATED_GROUP: &str = "annotated";
/// Working images with the aligned atlas drawn on.
pub const OVERLAY_GROUP: &str = "overlay";

/// Treat an unreadable artifact as absent so it gets recomputed.
fn existing<T>(found: CoreResult<Option<T>>) -> CoreResult<Option<T>> {
    match found {
        Err(e @ MesoscalerError::MalformedArtifact { .. }) => {
            warn!(error = %e, "Ignoring malformed artifact");
            Ok(None)
        }
        other => other,
    }
}

fn require<T>(found: CoreResult<Option<T>>, store: StoreKind, key: &str) -> CoreResult<T> {
    found?.ok_or_else(|| MesoscalerError::malformed(format!("{}/{}", store, key), "artifact not found"))
}

/// Stage that finds source images and prepares working copies
pub struct CollectionStage {
    input_dir: PathBuf,
    suffixes: Vec<String>,
}

/// One image to collect: a whole file, or one page of a multi-page TIFF.
struct Candidate {
    key: String,
    name: String,
    path: PathBuf,
    frame: Option<Frame>,
}

impl CollectionStage {
    pub fn new(input_dir: impl Into<PathBuf>, suffixes: Vec<String>) -> Self {
        Self {
            input_dir: input_dir.into(),
            suffixes,
        }
    }

    /// Expand multi-page TIFFs into one candidate per page.
    fn candidates(name: String, path: PathBuf) -> Vec<Candidate> {
        let total = match count_frames(&path) {
            Ok(total) => total,
            Err(e) => {
                // reported when the image is loaded
                debug!(path = %path.display(), error = %e, "Could not count frames");
                1
            }
        };
        if total <= 1 {
            return vec![Candidate {
                key: artifact_key(&name),
                name,
                path,
                frame: None,
            }];
        }

        debug!(path = %path.display(), frames = total, "Expanding multi-page image");
        (1..=total as u32)
            .map(|index| {
                let frame = Frame {
                    index,
                    total: total as u32,
                };
                let frame_name = frame.image_name(&name);
                Candidate {
                    key: artifact_key(&frame_name),
                    name: frame_name,
                    path: path.clone(),
                    frame: Some(frame),
                }
            })
            .collect()
    }
}

impl PipelineStage for CollectionStage {
    fn stage_name(&self) -> &str {
        "collection"
    }

    fn inputs(&self) -> &[StoreKind] {
        &[]
    }

    fn output(&self) -> StoreKind {
        StoreKind::Collected
    }

    fn execute(&self, ctx: &RunContext) -> Result<StageReport> {
        let suffixes: Vec<&str> = self.suffixes.iter().map(String::as_str).collect();
        let files = collect_image_files(&self.input_dir, &suffixes)?;
        let names = unique_names_from_paths(&files)?;
        if files.is_empty() {
            warn!(dir = %self.input_dir.display(), "No source images found");
        }

        let store = ctx.store(StoreKind::Collected);
        let previous: HashMap<String, ImageRecord> = ctx
            .collected_records()?
            .into_iter()
            .map(|r| (r.key.clone(), r))
            .collect();
        let candidates: Vec<Candidate> = names
            .into_iter()
            .zip(files)
            .flat_map(|(name, path)| Self::candidates(name, path))
            .collect();

        let (report, records) = process_images(
            ctx,
            self.stage_name(),
            &candidates,
            self.can_parallelize(),
            |c| c.key.as_str(),
            |candidate| {
                let key = &candidate.key;
                if !ctx.overwrite() {
                    if let Some(prev) = previous
                        .get(key)
                        .filter(|p| p.source_path == candidate.path && p.frame == candidate.frame)
                    {
                        if existing(store.get_image(IMAGES_GROUP, key))?.is_some() {
                            return Ok(Step::Skipped(prev.clone()));
                        }
                    }
                }
                let working = match candidate.frame {
                    Some(frame) => load_working_frame(&candidate.path, frame.index as usize - 1)?,
                    None => load_working_image(&candidate.path)?,
                };
                store.put_image(IMAGES_GROUP, key, &working.image)?;
                Ok(Step::Written(ImageRecord {
                    key: key.clone(),
                    name: candidate.name.clone(),
                    source_path: candidate.path.clone(),
                    width: working.native.width,
                    height: working.native.height,
                    frame: candidate.frame,
                }))
            },
        )?;

        store.put_json(METADATA_KEY, &records)?;
        info!(
            images = records.len(),
            dir = %self.input_dir.display(),
            "Collected source images"
        );
        Ok(report)
    }
}

/// Stage that runs the landmark predictor on every working image
pub struct PredictionStage {
    predictor: Box<dyn LandmarkPredictor>,
}

impl PredictionStage {
    pub fn new(predictor: Box<dyn LandmarkPredictor>) -> Self {
        Self { predictor }
    }
}

impl PipelineStage for PredictionStage {
    fn stage_name(&self) -> &str {
        "prediction"
    }

    fn inputs(&self) -> &[StoreKind] {
        &[StoreKind::Collected]
    }

    fn output(&self) -> StoreKind {
        StoreKind::Landmarks
    }

    // The predictor is a blocking external resource.
    fn can_parallelize(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &RunContext) -> Result<StageReport> {
        let records = ctx.collected_records()?;
        let collected = ctx.store(StoreKind::Collected);
        let store = ctx.store(StoreKind::Landmarks);
        debug!(predictor = self.predictor.predictor_name(), "Predicting landmarks");

        let (report, _) = process_images(
            ctx,
            self.stage_name(),
            &records,
            self.can_parallelize(),
            |r| r.key.as_str(),
            |record| {
                let key = record.key.as_str();
                if !ctx.overwrite()
                    && existing(store.get_json::<LandmarkSet>(key))?.is_some()
                    && existing(store.get_image(ANNOTATED_GROUP, key))?.is_some()
                {
                    return Ok(Step::Skipped(()));
                }

                let image = require(collected.get_image(IMAGES_GROUP, key), StoreKind::Collected, key)?;
                let landmarks = self.predictor.predict(&PredictionRequest {
                    key,
                    name: &record.name,
                    image: &image,
                })?;
                landmarks.ensure_space(CoordinateSpace::working())?;

                let mut annotated = image;
                annotate::draw_landmarks(&mut annotated, &landmarks, annotate::WHITE);
                store.put_json(key, &landmarks)?;
                store.put_image(ANNOTATED_GROUP, key, &annotated)?;
                debug!(image = key, landmarks = landmarks.len(), "Stored predicted landmarks");
                Ok(Step::Written(()))
            },
        )?;
        Ok(report)
    }
}

/// Stage that fits the atlas to each image's landmarks
pub struct AlignmentStage {
    atlas: Arc<ReferenceAtlas>,
    estimator: AlignmentEstimator,
    projector: RoiProjector,
}

impl AlignmentStage {
    pub fn new(atlas: Arc<ReferenceAtlas>, estimator: AlignmentEstimator, projector: RoiProjector) -> Self {
        Self {
            atlas,
            estimator,
            projector,
        }
    }

    /// Working image with the aligned atlas outline, regions and landmarks.
    fn render_overlay(
        &self,
        base: image::RgbImage,
        artifact: &AlignmentArtifact,
    ) -> CoreResult<image::RgbImage> {
        let projected = self.projector.project(
            self.atlas.outline(),
            self.atlas.rois(),
            &artifact.estimate.alignment,
            CoordinateSpace::working(),
        )?;
        let mut overlay = base;
        annotate::draw_mask_boundary(&mut overlay, &projected.outline().mask, annotate::ATLAS_COLOR);
        for roi in projected.iter() {
            annotate::draw_mask_boundary(&mut overlay, &roi.mask, annotate::ATLAS_COLOR);
        }
        annotate::draw_landmarks(&mut overlay, &artifact.aligned_landmarks, annotate::ATLAS_COLOR);
        Ok(overlay)
    }
}

impl PipelineStage for AlignmentStage {
    fn stage_name(&self) -> &str {
        "alignment"
    }

    fn inputs(&self) -> &[StoreKind] {
        &[StoreKind::Collected, StoreKind::Landmarks]
    }

    fn output(&self) -> StoreKind {
        StoreKind::Alignment
    }

    fn execute(&self, ctx: &RunContext) -> Result<StageReport> {
        let records = ctx.collected_records()?;
        let collected = ctx.store(StoreKind::Collected);
        let landmarks = ctx.store(StoreKind::Landmarks);
        let store = ctx.store(StoreKind::Alignment);
        let reference = self.atlas.landmarks();

        let (report, _) = process_images(
            ctx,
            self.stage_name(),
            &records,
            self.can_parallelize(),
            |r| r.key.as_str(),
            |record| {
                let key = record.key.as_str();
                if !ctx.overwrite()
                    && existing(store.get_json::<AlignmentArtifact>(key))?.is_some()
                    && existing(store.get_image(OVERLAY_GROUP, key))?.is_some()
                {
                    return Ok(Step::Skipped(()));
                }

                let data: LandmarkSet = require(landmarks.get_json(key), StoreKind::Landmarks, key)?;
                let estimate = self.estimator.estimate(reference, &data)?;
                let artifact = AlignmentArtifact {
                    aligned_landmarks: reference.transformed(&estimate.alignment, CoordinateSpace::working()),
                    estimate,
                };

                let base = require(collected.get_image(IMAGES_GROUP, key), StoreKind::Collected, key)?;
                let overlay = self.render_overlay(base, &artifact)?;
                store.put_json(key, &artifact)?;
                store.put_image(OVERLAY_GROUP, key, &overlay)?;
                debug!(
                    image = key,
                    rms_residual = artifact.estimate.rms_residual,
                    landmarks = artifact.estimate.used.len(),
                    "Stored alignment"
                );
                Ok(Step::Written(()))
            },
        )?;
        Ok(report)
    }
}

/// Stage that projects atlas regions into each image at native resolution
pub struct RoiStage {
    atlas: Arc<ReferenceAtlas>,
    projector: RoiProjector,
}

impl RoiStage {
    pub fn new(atlas: Arc<ReferenceAtlas>, projector: RoiProjector) -> Self {
        Self { atlas, projector }
    }
}

fn stored_rois(container: Option<Container>) -> CoreResult<Option<RoiSet>> {
    container.map(|c| schema::get_roi_set(&c)).transpose()
}

impl PipelineStage for RoiStage {
    fn stage_name(&self) -> &str {
        "rois"
    }

    fn inputs(&self) -> &[StoreKind] {
        &[StoreKind::Collected, StoreKind::Alignment]
    }

    fn output(&self) -> StoreKind {
        StoreKind::Rois
    }

    fn execute(&self, ctx: &RunContext) -> Result<StageReport> {
        let records = ctx.collected_records()?;
        let alignments = ctx.store(StoreKind::Alignment);
        let store = ctx.store(StoreKind::Rois);

        let (report, _) = process_images(
            ctx,
            self.stage_name(),
            &records,
            self.can_parallelize(),
            |r| r.key.as_str(),
            |record| {
                let key = record.key.as_str();
                let native = record.native();
                if !ctx.overwrite() {
                    let previous = existing(existing(store.get_container(key)).and_then(stored_rois))?;
                    if previous.is_some_and(|rois| rois.space() == native) {
                        return Ok(Step::Skipped(()));
                    }
                }

                let artifact: AlignmentArtifact =
                    require(alignments.get_json(key), StoreKind::Alignment, key)?;
                let rois = self.projector.project(
                    self.atlas.outline(),
                    self.atlas.rois(),
                    &artifact.estimate.alignment,
                    native,
                )?;

                let mut container = Container::new();
                container.set_attr("image_name", record.name.clone());
                container.set_attr("width", native.width);
                container.set_attr("height", native.height);
                schema::put_roi_set(&mut container, &rois)?;
                store.put_container(key, &container)?;
                debug!(image = key, native = %native, rois = rois.len(), "Stored native ROIs");
                Ok(Step::Written(()))
            },
        )?;
        Ok(report)
    }
}

/// Stage that bundles every artifact of an image into one package
pub struct PackagingStage {
    packager: ResultPackager,
}

impl PackagingStage {
    pub fn new(packager: ResultPackager) -> Self {
        Self { packager }
    }
}

impl PipelineStage for PackagingStage {
    fn stage_name(&self) -> &str {
        "packaging"
    }

    fn inputs(&self) -> &[StoreKind] {
        &[
            StoreKind::Collected,
            StoreKind::Landmarks,
            StoreKind::Alignment,
            StoreKind::Rois,
        ]
    }

    fn output(&self) -> StoreKind {
        StoreKind::Packages
    }

    fn execute(&self, ctx: &RunContext) -> Result<StageReport> {
        let records = ctx.collected_records()?;
        let collected = ctx.store(StoreKind::Collected);
        let landmarks = ctx.store(StoreKind::Landmarks);
        let alignments = ctx.store(StoreKind::Alignment);
        let rois = ctx.store(StoreKind::Rois);
        let out_dir = ctx.store(StoreKind::Packages).dir().to_path_buf();

        let (report, _) = process_images(
            ctx,
            self.stage_name(),
            &records,
            self.can_parallelize(),
            |r| r.key.as_str(),
            |record| {
                let key = record.key.as_str();
                if !ctx.overwrite() {
                    if let Some(path) = self.packager.existing_package(&out_dir, &record.name) {
                        return Ok(Step::Skipped(path));
                    }
                }

                let alignment = existing(alignments.get_json::<AlignmentArtifact>(key))?;
                let components = ResultComponents {
                    native: Some(record.native()),
                    source_image: existing(collected.get_image(IMAGES_GROUP, key))?,
                    landmarks_image: existing(landmarks.get_image(ANNOTATED_GROUP, key))?,
                    alignment_image: existing(alignments.get_image(OVERLAY_GROUP, key))?,
                    landmarks: existing(landmarks.get_json(key))?,
                    alignment: alignment.map(|a| a.estimate.alignment),
                    rois: existing(existing(rois.get_container(key)).and_then(stored_rois))?,
                    ..ResultComponents::new(record.name.clone(), record.source_path.display().to_string())
                };
                Ok(Step::Written(self.packager.package(components, &out_dir)?))
            },
        )?;
        Ok(report)
    }
}
