//! Mapping between domain values and container datasets.

use super::container::{Attributes, Container, DatasetData};
use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::{AffineMatrix, CoordinateSpace};
use crate::landmarks::{Landmark, LandmarkId, LandmarkSet};
use crate::rois::{RoiMask, RoiMetadata, RoiSet, Side};
use image::RgbImage;
use ndarray::Array2;
use serde_json::{json, Value};

pub const IMAGES_GROUP: &str = "images512";
pub const LANDMARKS_GROUP: &str = "landmarks512";
pub const ALIGNMENT_DATASET: &str = "affine_ref_to_data512";
pub const ROIS_GROUP: &str = "rois";
pub const OUTLINE_NAME: &str = "outline";

fn metadata_attrs(meta: &RoiMetadata) -> Attributes {
    match serde_json::to_value(meta) {
        Ok(Value::Object(map)) => map,
        _ => Attributes::new(),
    }
}

fn metadata_from_attrs(path: &str, attrs: &Attributes) -> CoreResult<RoiMetadata> {
    serde_json::from_value(Value::Object(attrs.clone()))
        .map_err(|e| MesoscalerError::malformed(path, format!("bad ROI attributes: {}", e)))
}

pub fn put_rgb(container: &mut Container, path: &str, img: &RgbImage) -> CoreResult<()> {
    let (w, h) = img.dimensions();
    container.add_dataset(
        path,
        vec![h as usize, w as usize, 3],
        DatasetData::U8(img.as_raw().clone()),
        Attributes::new(),
    )
}

pub fn get_rgb(container: &Container, path: &str) -> CoreResult<RgbImage> {
    let ds = container.require(path)?;
    let data = ds
        .as_u8()
        .ok_or_else(|| MesoscalerError::malformed(path, "expected u8 image"))?;
    match ds.shape.as_slice() {
        [h, w, 3] => RgbImage::from_raw(*w as u32, *h as u32, data.to_vec())
            .ok_or_else(|| MesoscalerError::malformed(path, "image buffer too small")),
        other => Err(MesoscalerError::malformed(path, format!("unexpected image shape {:?}", other))),
    }
}

pub fn put_mask(container: &mut Container, path: &str, roi: &RoiMask) -> CoreResult<()> {
    let (rows, cols) = roi.mask.dim();
    container.add_dataset(
        path,
        vec![rows, cols],
        DatasetData::U8(roi.mask.iter().copied().collect()),
        metadata_attrs(&roi.meta),
    )
}

fn get_mask(container: &Container, path: &str) -> CoreResult<RoiMask> {
    let ds = container.require(path)?;
    let data = ds
        .as_u8()
        .ok_or_else(|| MesoscalerError::malformed(path, "expected u8 mask"))?;
    let &[rows, cols] = ds.shape.as_slice() else {
        return Err(MesoscalerError::malformed(path, "mask must be 2-D"));
    };
    let mask = Array2::from_shape_vec((rows, cols), data.to_vec())
        .map_err(|e| MesoscalerError::malformed(path, e))?;
    Ok(RoiMask::new(metadata_from_attrs(path, &ds.attrs)?, mask))
}

/// `rois/outline` plus `rois/<side>/<name>` for every region.
pub fn put_roi_set(container: &mut Container, rois: &RoiSet) -> CoreResult<()> {
    container.add_group(ROIS_GROUP, Attributes::new());
    put_mask(container, &format!("{}/{}", ROIS_GROUP, OUTLINE_NAME), rois.outline())?;
    for roi in rois.iter() {
        let path = format!("{}/{}/{}", ROIS_GROUP, roi.meta.side, roi.meta.name);
        put_mask(container, &path, roi)?;
    }
    Ok(())
}

pub fn get_roi_set(container: &Container) -> CoreResult<RoiSet> {
    let outline = get_mask(container, &format!("{}/{}", ROIS_GROUP, OUTLINE_NAME))?;
    let mut rois = Vec::new();
    for side in [Side::Left, Side::Right, Side::Whole] {
        let group = format!("{}/{}", ROIS_GROUP, side);
        for (name, _) in container.children(&group) {
            rois.push(get_mask(container, &format!("{}/{}", group, name))?);
        }
    }
    RoiSet::new(outline.space(), outline, rois)
}

/// Parallel `x`, `y`, `likelihood` arrays; names live in the group's `names` attribute.
pub fn put_landmarks(container: &mut Container, landmarks: &LandmarkSet) -> CoreResult<()> {
    let names: Vec<String> = landmarks.ids().iter().map(|id| id.to_string()).collect();
    let space = landmarks.space();
    let mut attrs = Attributes::new();
    attrs.insert("names".into(), json!(names));
    attrs.insert("width".into(), json!(space.width));
    attrs.insert("height".into(), json!(space.height));
    container.add_group(LANDMARKS_GROUP, attrs);

    let n = landmarks.len();
    let column = |f: fn(&Landmark) -> f64| DatasetData::F64(landmarks.iter().map(|(_, lm)| f(lm)).collect());
    for (field, data) in [
        ("x", column(|lm| lm.x)),
        ("y", column(|lm| lm.y)),
        ("likelihood", column(|lm| lm.likelihood)),
    ] {
        container.add_dataset(format!("{}/{}", LANDMARKS_GROUP, field), vec![n], data, Attributes::new())?;
    }
    Ok(())
}

pub fn get_landmarks(container: &Container) -> CoreResult<LandmarkSet> {
    let attrs = container
        .group(LANDMARKS_GROUP)
        .ok_or_else(|| MesoscalerError::malformed(LANDMARKS_GROUP, "group missing"))?;
    let names: Vec<String> = attrs
        .get("names")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| MesoscalerError::malformed(LANDMARKS_GROUP, e))?
        .unwrap_or_default();
    let dim = |key: &str| attrs.get(key).and_then(Value::as_u64).map(|v| v as u32);
    let space = match (dim("width"), dim("height")) {
        (Some(w), Some(h)) => CoordinateSpace::new(w, h),
        _ => CoordinateSpace::working(),
    };

    let column = |field: &str| -> CoreResult<Vec<f64>> {
        let path = format!("{}/{}", LANDMARKS_GROUP, field);
        let values = container
            .require(&path)?
            .as_f64()
            .ok_or_else(|| MesoscalerError::malformed(&path, "expected f64"))?
            .to_vec();
        if values.len() != names.len() {
            return Err(MesoscalerError::malformed(&path, "length differs from names"));
        }
        Ok(values)
    };
    let (xs, ys, ps) = (column("x")?, column("y")?, column("likelihood")?);

    let mut entries = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let id: LandmarkId = name
            .parse()
            .map_err(|e| MesoscalerError::malformed(LANDMARKS_GROUP, e))?;
        entries.push((id, Landmark::new(xs[i], ys[i], ps[i])));
    }
    Ok(LandmarkSet::new(space, entries))
}

pub fn put_alignment(container: &mut Container, alignment: &AffineMatrix) -> CoreResult<()> {
    container.add_dataset(
        ALIGNMENT_DATASET,
        vec![2, 3],
        DatasetData::F64(alignment.to_row_major().to_vec()),
        Attributes::new(),
    )
}

pub fn get_alignment(container: &Container) -> CoreResult<AffineMatrix> {
    let ds = container.require(ALIGNMENT_DATASET)?;
    match (ds.shape.as_slice(), ds.as_f64()) {
        ([2, 3], Some(&[a, b, c, d, e, f])) => Ok(AffineMatrix::new([[a, b, c], [d, e, f]])),
        _ => Err(MesoscalerError::malformed(ALIGNMENT_DATASET, "expected 2x3 f64")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::ReferenceAtlas;

    #[test]
    fn test_landmarks_keep_names_and_order() {
        let mut c = Container::new();
        let set = ReferenceAtlas::canonical_landmarks().filtered(0.0);
        put_landmarks(&mut c, &set).unwrap();
        let names = c.group(LANDMARKS_GROUP).unwrap()["names"].clone();
        assert_eq!(names[0], "L1");
        assert_eq!(names[8], "R9");
        assert_eq!(get_landmarks(&c).unwrap(), set);
    }

    #[test]
    fn test_roi_set_layout() {
        let atlas = ReferenceAtlas::builtin();
        let set = RoiSet::new(
            CoordinateSpace::working(),
            atlas.outline().clone(),
            atlas.rois().iter().take(3).cloned(),
        )
        .unwrap();
        let mut c = Container::new();
        put_roi_set(&mut c, &set).unwrap();

        let mos = c.dataset("rois/left/MOs").unwrap();
        assert_eq!(mos.attrs["AllenID"], 993);
        assert_eq!(mos.attrs["side"], "left");
        assert!(c.dataset("rois/outline").is_some());
        assert_eq!(get_roi_set(&c).unwrap(), set);
    }

    #[test]
    fn test_alignment_dataset_shape() {
        let mut c = Container::new();
        let m = AffineMatrix::new([[1.0, 0.1, 10.0], [-0.1, 1.0, 5.0]]);
        put_alignment(&mut c, &m).unwrap();
        assert_eq!(c.dataset(ALIGNMENT_DATASET).unwrap().shape, vec![2, 3]);
        assert_eq!(get_alignment(&c).unwrap(), m);
    }
}
