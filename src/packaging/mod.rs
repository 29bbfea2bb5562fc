//! Aggregation of per-image artifacts into one result file.

pub mod container;
pub mod schema;

pub use container::*;

use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::{AffineMatrix, CoordinateSpace};
use crate::landmarks::LandmarkSet;
use crate::rois::RoiSet;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const FORMAT_VERSION: &str = "1.0";
pub const PACKAGE_SUFFIX: &str = "_mesoscaler";

/// The three 512x512 renderings stored with every result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultImages {
    pub source: RgbImage,
    pub landmarks: RgbImage,
    pub alignment: RgbImage,
}

/// Everything known about one image; complete by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PackagedResult {
    pub image_name: String,
    pub source_path: String,
    pub native: CoordinateSpace,
    pub created_at: String,
    pub images: ResultImages,
    pub landmarks: LandmarkSet,
    pub alignment: AffineMatrix,
    pub rois: RoiSet,
}

/// Per-image artifacts as found in the stores; any part may be missing.
#[derive(Debug, Clone, Default)]
pub struct ResultComponents {
    pub image_name: String,
    pub source_path: String,
    pub native: Option<CoordinateSpace>,
    pub source_image: Option<RgbImage>,
    pub landmarks_image: Option<RgbImage>,
    pub alignment_image: Option<RgbImage>,
    pub landmarks: Option<LandmarkSet>,
    pub alignment: Option<AffineMatrix>,
    pub rois: Option<RoiSet>,
}

impl ResultComponents {
    pub fn new(image_name: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            source_path: source_path.into(),
            ..Default::default()
        }
    }

    /// Names of the missing parts, empty when complete.
    pub fn missing(&self) -> Vec<String> {
        [
            ("native_size", self.native.is_none()),
            ("source_image", self.source_image.is_none()),
            ("landmarks_image", self.landmarks_image.is_none()),
            ("alignment_image", self.alignment_image.is_none()),
            ("landmarks", self.landmarks.is_none()),
            ("alignment", self.alignment.is_none()),
            ("rois", self.rois.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| name.to_string())
        .collect()
    }

    /// Turn complete components into a result, or report everything missing.
    pub fn assemble(self) -> CoreResult<PackagedResult> {
        let missing = self.missing();
        let ResultComponents {
            image_name,
            source_path,
            native,
            source_image,
            landmarks_image,
            alignment_image,
            landmarks,
            alignment,
            rois,
        } = self;
        let (
            Some(native),
            Some(source),
            Some(landmarks_image),
            Some(alignment_image),
            Some(landmarks),
            Some(alignment),
            Some(rois),
        ) = (
            native,
            source_image,
            landmarks_image,
            alignment_image,
            landmarks,
            alignment,
            rois,
        )
        else {
            return Err(MesoscalerError::IncompleteResult {
                image: image_name,
                missing,
            });
        };

        if rois.space() != native {
            return Err(MesoscalerError::SpaceMismatch {
                expected: native.to_string(),
                got: rois.space().to_string(),
            });
        }
        Ok(PackagedResult {
            image_name,
            source_path,
            native,
            created_at: chrono::Utc::now().to_rfc3339(),
            images: ResultImages {
                source,
                landmarks: landmarks_image,
                alignment: alignment_image,
            },
            landmarks,
            alignment,
            rois,
        })
    }
}

impl PackagedResult {
    pub fn to_container(&self) -> CoreResult<Container> {
        let mut c = Container::new();
        c.set_attr("image_name", self.image_name.clone());
        c.set_attr("source_path", self.source_path.clone());
        c.set_attr("width", self.native.width);
        c.set_attr("height", self.native.height);
        c.set_attr("created_at", self.created_at.clone());
        c.set_attr("format_version", FORMAT_VERSION);

        schema::put_rgb(&mut c, &format!("{}/source", schema::IMAGES_GROUP), &self.images.source)?;
        schema::put_rgb(&mut c, &format!("{}/landmarks", schema::IMAGES_GROUP), &self.images.landmarks)?;
        schema::put_rgb(&mut c, &format!("{}/alignment", schema::IMAGES_GROUP), &self.images.alignment)?;
        schema::put_landmarks(&mut c, &self.landmarks)?;
        schema::put_alignment(&mut c, &self.alignment)?;
        schema::put_roi_set(&mut c, &self.rois)?;
        Ok(c)
    }

    pub fn from_container(c: &Container) -> CoreResult<Self> {
        let text = |key: &str| -> CoreResult<String> {
            c.attrs()
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| MesoscalerError::malformed(key, "root attribute missing"))
        };
        let dim = |key: &str| -> CoreResult<u32> {
            c.attrs()
                .get(key)
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
                .ok_or_else(|| MesoscalerError::malformed(key, "root attribute missing"))
        };
        let image = |name: &str| schema::get_rgb(c, &format!("{}/{}", schema::IMAGES_GROUP, name));

        Ok(PackagedResult {
            image_name: text("image_name")?,
            source_path: text("source_path")?,
            native: CoordinateSpace::new(dim("width")?, dim("height")?),
            created_at: text("created_at")?,
            images: ResultImages {
                source: image("source")?,
                landmarks: image("landmarks")?,
                alignment: image("alignment")?,
            },
            landmarks: schema::get_landmarks(c)?,
            alignment: schema::get_alignment(c)?,
            rois: schema::get_roi_set(c)?,
        })
    }
}

/// Seam for output encoders.
pub trait PackageWriter: Send + Sync {
    /// File extension including the dot.
    fn extension(&self) -> &str;

    fn write(&self, result: &PackagedResult, path: &Path) -> CoreResult<()>;

    /// Whether `path` holds a complete package this writer produced.
    fn is_readable(&self, path: &Path) -> bool;
}

/// Writes results as gzip-compressed containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerWriter;

impl PackageWriter for ContainerWriter {
    fn extension(&self) -> &str {
        ".mspkg"
    }

    fn write(&self, result: &PackagedResult, path: &Path) -> CoreResult<()> {
        result.to_container()?.write_to(path)
    }

    fn is_readable(&self, path: &Path) -> bool {
        ContainerReader.read(path).is_ok()
    }
}

/// Reads packages written by [`ContainerWriter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerReader;

impl ContainerReader {
    pub fn read(&self, path: impl AsRef<Path>) -> CoreResult<PackagedResult> {
        PackagedResult::from_container(&Container::read_from(path)?)
    }
}

/// Outcome of packaging several images.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub packaged: Vec<PathBuf>,
    pub failed: Vec<(String, MesoscalerError)>,
}

pub struct ResultPackager {
    writer: Box<dyn PackageWriter>,
}

impl Default for ResultPackager {
    fn default() -> Self {
        Self::new(Box::new(ContainerWriter))
    }
}

impl ResultPackager {
    pub fn new(writer: Box<dyn PackageWriter>) -> Self {
        Self { writer }
    }

    /// `<key>_mesoscaler<ext>` inside `out_dir`, where `<key>` is the
    /// artifact key of the unique image name, extension included.
    pub fn output_path(&self, out_dir: &Path, image_name: &str) -> PathBuf {
        out_dir.join(format!(
            "{}{}{}",
            crate::data::artifact_key(image_name),
            PACKAGE_SUFFIX,
            self.writer.extension()
        ))
    }

    /// Path of an already written, readable package for `image_name`.
    pub fn existing_package(&self, out_dir: &Path, image_name: &str) -> Option<PathBuf> {
        let path = self.output_path(out_dir, image_name);
        (path.exists() && self.writer.is_readable(&path)).then_some(path)
    }

    /// Validate and write one image; nothing is written when parts are missing.
    pub fn package(&self, components: ResultComponents, out_dir: &Path) -> CoreResult<PathBuf> {
        let path = self.output_path(out_dir, &components.image_name);
        let result = components.assemble()?;
        self.writer.write(&result, &path)?;
        info!(
            image = %result.image_name,
            path = %path.display(),
            rois = result.rois.len(),
            "Packaged result"
        );
        Ok(path)
    }

    /// Package every image, collecting per-image failures.
    ///
    /// Fatal errors stop the batch and are returned.
    pub fn package_batch(
        &self,
        batch: impl IntoIterator<Item = ResultComponents>,
        out_dir: &Path,
    ) -> CoreResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        for components in batch {
            let name = components.image_name.clone();
            match self.package(components, out_dir) {
                Ok(path) => summary.packaged.push(path),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(image = %name, error = %e, kind = e.kind(), "Skipping image");
                    summary.failed.push((name, e));
                }
            }
        }
        info!(
            packaged = summary.packaged.len(),
            failed = summary.failed.len(),
            "Packaging batch finished"
        );
        Ok(summary)
    }
}
