//! Binary region-of-interest masks and their metadata.

use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::CoordinateSpace;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
    Whole,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::Whole => "whole",
        }
    }

    pub fn mirrored(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::Whole => Side::Whole,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed metadata record carried by every mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiMetadata {
    pub name: String,
    pub side: Side,
    #[serde(default)]
    pub description: String,
    /// Allen CCF structure id, 0 when the region has no counterpart.
    #[serde(rename = "AllenID", default)]
    pub allen_id: u32,
}

impl RoiMetadata {
    pub fn new(name: impl Into<String>, side: Side, description: impl Into<String>, allen_id: u32) -> Self {
        Self {
            name: name.into(),
            side,
            description: description.into(),
            allen_id,
        }
    }

    pub fn key(&self) -> RoiKey {
        RoiKey {
            side: self.side,
            name: self.name.clone(),
        }
    }
}

/// Identity of a mask within a set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoiKey {
    pub side: Side,
    pub name: String,
}

impl fmt::Display for RoiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.side, self.name)
    }
}

/// A `{0,1}` raster of shape `(height, width)` with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiMask {
    pub meta: RoiMetadata,
    pub mask: Array2<u8>,
}

impl RoiMask {
    pub fn new(meta: RoiMetadata, mask: Array2<u8>) -> Self {
        Self { meta, mask }
    }

    pub fn space(&self) -> CoordinateSpace {
        let (rows, cols) = self.mask.dim();
        CoordinateSpace::new(cols as u32, rows as u32)
    }

    pub fn area(&self) -> usize {
        self.mask.iter().filter(|&&v| v != 0).count()
    }

    /// Pixel-wise union, used to merge hemisphere outlines.
    pub fn union(&self, other: &RoiMask, meta: RoiMetadata) -> CoreResult<RoiMask> {
        ensure_shape(&meta.name, self.space(), &other.mask)?;
        let mut merged = self.mask.clone();
        merged.zip_mut_with(&other.mask, |a, &b| *a = (*a | b).min(1));
        Ok(RoiMask::new(meta, merged))
    }
}

fn ensure_shape(name: &str, expected: CoordinateSpace, mask: &Array2<u8>) -> CoreResult<()> {
    let (rows, cols) = mask.dim();
    if rows != expected.height as usize || cols != expected.width as usize {
        return Err(MesoscalerError::MaskShape {
            name: name.to_string(),
            expected_width: expected.width,
            expected_height: expected.height,
            got_width: cols as u32,
            got_height: rows as u32,
        });
    }
    Ok(())
}

/// All projected regions of one image plus the whole-brain outline.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiSet {
    space: CoordinateSpace,
    outline: RoiMask,
    rois: BTreeMap<RoiKey, RoiMask>,
}

impl RoiSet {
    /// Every mask must have exactly the dimensions of `space`.
    pub fn new(
        space: CoordinateSpace,
        outline: RoiMask,
        rois: impl IntoIterator<Item = RoiMask>,
    ) -> CoreResult<Self> {
        space.validate()?;
        ensure_shape(&outline.meta.name, space, &outline.mask)?;
        let mut map = BTreeMap::new();
        for roi in rois {
            ensure_shape(&roi.meta.name, space, &roi.mask)?;
            map.insert(roi.meta.key(), roi);
        }
        Ok(Self {
            space,
            outline,
            rois: map,
        })
    }

    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    pub fn outline(&self) -> &RoiMask {
        &self.outline
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    pub fn get(&self, side: Side, name: &str) -> Option<&RoiMask> {
        self.rois.get(&RoiKey {
            side,
            name: name.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoiMask> + '_ {
        self.rois.values()
    }

    pub fn side(&self, side: Side) -> impl Iterator<Item = &RoiMask> + '_ {
        self.rois.values().filter(move |r| r.meta.side == side)
    }
}
