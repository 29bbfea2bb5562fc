//! Reference atlas: canonical landmarks and ROI masks in the working space.

mod builtin;

use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::CoordinateSpace;
use crate::landmarks::{Landmark, LandmarkId, LandmarkSet};
use crate::rois::{RoiMask, RoiMetadata, Side};
use anyhow::Context;
use lazy_static::lazy_static;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const ATLAS_MANIFEST: &str = "atlas.json";

lazy_static! {
    static ref BUILTIN_ATLAS: ReferenceAtlas = ReferenceAtlas::rasterize_builtin();
}

#[derive(Debug, Clone)]
pub struct ReferenceAtlas {
    landmarks: LandmarkSet,
    outline: RoiMask,
    rois: Vec<RoiMask>,
}

impl ReferenceAtlas {
    /// Assemble an atlas, checking that everything lives in the working space.
    pub fn new(landmarks: LandmarkSet, outline: RoiMask, rois: Vec<RoiMask>) -> CoreResult<Self> {
        let working = CoordinateSpace::working();
        landmarks.ensure_space(working)?;
        for mask in std::iter::once(&outline).chain(rois.iter()) {
            if mask.space() != working {
                let got = mask.space();
                return Err(MesoscalerError::MaskShape {
                    name: mask.meta.name.clone(),
                    expected_width: working.width,
                    expected_height: working.height,
                    got_width: got.width,
                    got_height: got.height,
                });
            }
        }
        Ok(Self {
            landmarks,
            outline,
            rois,
        })
    }

    /// The atlas shipped with the crate, rasterized on first use.
    pub fn builtin() -> &'static ReferenceAtlas {
        &BUILTIN_ATLAS
    }

    pub fn landmarks(&self) -> &LandmarkSet {
        &self.landmarks
    }

    pub fn outline(&self) -> &RoiMask {
        &self.outline
    }

    pub fn rois(&self) -> &[RoiMask] {
        &self.rois
    }

    pub fn space(&self) -> CoordinateSpace {
        CoordinateSpace::working()
    }

    /// Canonical landmark positions with likelihood 1.
    pub fn canonical_landmarks() -> LandmarkSet {
        LandmarkSet::new(
            CoordinateSpace::working(),
            LandmarkId::ALL.iter().map(|id| {
                let p = id.atlas_position();
                (*id, Landmark::new(p.x, p.y, 1.0))
            }),
        )
    }

    fn rasterize_builtin() -> ReferenceAtlas {
        let space = CoordinateSpace::working();
        let mut rois = Vec::with_capacity(builtin::REGIONS.len() * 2);
        for side in [Side::Left, Side::Right] {
            for region in builtin::REGIONS {
                let vertices = match side {
                    Side::Right => builtin::mirror(region.vertices),
                    _ => region.vertices.to_vec(),
                };
                rois.push(RoiMask::new(
                    builtin::region_metadata(region, side),
                    builtin::rasterize_polygon(&vertices, space),
                ));
            }
        }

        let mut outline = builtin::rasterize_polygon(builtin::HEMISPHERE_OUTLINE, space);
        let right =
            builtin::rasterize_polygon(&builtin::mirror(builtin::HEMISPHERE_OUTLINE), space);
        outline.zip_mut_with(&right, |a, &b| *a |= b);
        let outline = RoiMask::new(outline_metadata(Side::Whole), outline);

        debug!(rois = rois.len(), "Rasterized built-in atlas");
        ReferenceAtlas {
            landmarks: Self::canonical_landmarks(),
            outline,
            rois,
        }
    }

    /// Load an atlas directory containing `atlas.json` and PNG masks.
    ///
    /// Landmarks missing from the manifest fall back to the canonical
    /// positions. Any non-zero mask pixel counts as inside.
    pub fn load_dir(dir: impl AsRef<Path>) -> crate::Result<ReferenceAtlas> {
        let dir = dir.as_ref();
        let manifest_path = dir.join(ATLAS_MANIFEST);
        let content = std::fs::read_to_string(&manifest_path)
            .map_err(|e| MesoscalerError::io(&manifest_path, e))?;
        let manifest: AtlasManifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", manifest_path.display()))?;

        let mut landmarks: Vec<(LandmarkId, Landmark)> = Self::canonical_landmarks()
            .iter()
            .map(|(id, lm)| (id, *lm))
            .collect();
        for entry in &manifest.landmarks {
            let id: LandmarkId = entry.name.parse()?;
            landmarks.retain(|(existing, _)| *existing != id);
            landmarks.push((id, Landmark::new(entry.x, entry.y, 1.0)));
        }
        let landmarks = LandmarkSet::new(CoordinateSpace::working(), landmarks);

        let left = load_mask(&dir.join(&manifest.outline.left))?;
        let right = load_mask(&dir.join(&manifest.outline.right))?;
        let outline = merge_outlines(left, right)?;

        let mut rois = Vec::with_capacity(manifest.rois.len());
        for entry in manifest.rois {
            let mask = load_mask(&dir.join(&entry.mask))?;
            rois.push(RoiMask::new(entry.meta, mask));
        }

        let atlas = ReferenceAtlas::new(landmarks, outline, rois)?;
        info!(
            path = %dir.display(),
            rois = atlas.rois.len(),
            landmarks = atlas.landmarks.len(),
            "Loaded reference atlas"
        );
        Ok(atlas)
    }
}

fn outline_metadata(side: Side) -> RoiMetadata {
    RoiMetadata::new("outline", side, "whole-brain outline", 0)
}

fn merge_outlines(left: Array2<u8>, right: Array2<u8>) -> CoreResult<RoiMask> {
    let left = RoiMask::new(outline_metadata(Side::Left), left);
    let right = RoiMask::new(outline_metadata(Side::Right), right);
    left.union(&right, outline_metadata(Side::Whole))
}

fn load_mask(path: &Path) -> crate::Result<Array2<u8>> {
    let img = image::open(path)
        .map_err(|source| MesoscalerError::Image {
            path: path.display().to_string(),
            source,
        })?
        .to_luma8();
    let (w, h) = img.dimensions();
    Ok(Array2::from_shape_fn((h as usize, w as usize), |(row, col)| {
        u8::from(img.get_pixel(col as u32, row as u32)[0] != 0)
    }))
}

#[derive(Debug, Serialize, Deserialize)]
struct AtlasManifest {
    #[serde(default)]
    landmarks: Vec<ManifestLandmark>,
    outline: ManifestOutline,
    #[serde(default)]
    rois: Vec<ManifestRoi>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestLandmark {
    name: String,
    x: f64,
    y: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestOutline {
    left: String,
    right: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestRoi {
    #[serde(flatten)]
    meta: RoiMetadata,
    mask: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_builtin_atlas_shape() {
        let atlas = ReferenceAtlas::builtin();
        assert_eq!(atlas.landmarks().len(), 9);
        assert_eq!(atlas.rois().len(), 18);
        assert!(atlas.outline().area() > 0);
        for roi in atlas.rois() {
            assert_eq!(roi.space(), CoordinateSpace::working());
            assert!(roi.area() > 0, "{} is empty", roi.meta.name);
        }
    }

    #[test]
    fn test_builtin_hemispheres_mirror() {
        let atlas = ReferenceAtlas::builtin();
        let left = atlas
            .rois()
            .iter()
            .find(|r| r.meta.name == "VISp" && r.meta.side == Side::Left)
            .unwrap();
        let right = atlas
            .rois()
            .iter()
            .find(|r| r.meta.name == "VISp" && r.meta.side == Side::Right)
            .unwrap();
        assert_eq!(left.meta.allen_id, right.meta.allen_id);
        let diff = (left.area() as i64 - right.area() as i64).abs();
        assert!(diff < left.area() as i64 / 20);
    }

    #[test]
    fn test_load_dir_reads_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut half = GrayImage::new(512, 512);
        for y in 100..200 {
            for x in 100..200 {
                half.put_pixel(x, y, Luma([255]));
            }
        }
        half.save(dir.path().join("left.png")).unwrap();
        GrayImage::new(512, 512).save(dir.path().join("right.png")).unwrap();
        half.save(dir.path().join("roi.png")).unwrap();

        let manifest = serde_json::json!({
            "landmarks": [{"name": "bregma", "x": 250.0, "y": 260.0}],
            "outline": {"left": "left.png", "right": "right.png"},
            "rois": [{"name": "A", "side": "left", "description": "test", "AllenID": 7, "mask": "roi.png"}]
        });
        std::fs::write(dir.path().join(ATLAS_MANIFEST), manifest.to_string()).unwrap();

        let atlas = ReferenceAtlas::load_dir(dir.path()).unwrap();
        assert_eq!(atlas.rois().len(), 1);
        assert_eq!(atlas.rois()[0].area(), 100 * 100);
        assert_eq!(atlas.outline().area(), 100 * 100);
        let bregma = atlas.landmarks().get(LandmarkId::M5).unwrap();
        assert_eq!((bregma.x, bregma.y), (250.0, 260.0));
        assert_eq!(atlas.landmarks().len(), 9);
    }

    #[test]
    fn test_load_dir_rejects_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::new(256, 256).save(dir.path().join("o.png")).unwrap();
        let manifest = serde_json::json!({"outline": {"left": "o.png", "right": "o.png"}});
        std::fs::write(dir.path().join(ATLAS_MANIFEST), manifest.to_string()).unwrap();
        let err = ReferenceAtlas::load_dir(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MesoscalerError>(),
            Some(MesoscalerError::MaskShape { .. })
        ));
    }
}
