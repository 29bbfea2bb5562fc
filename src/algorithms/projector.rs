//! Inverse-warp of reference ROI masks into native image space.

use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::{AffineMatrix, CoordinateSpace, Point};
use crate::rois::{RoiMask, RoiSet};
use instant::Instant;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_BINARIZE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Interpolated values at or above this are inside the region.
    pub binarize_threshold: f64,
    /// Warp rows on the rayon pool.
    pub parallel_rows: bool,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            binarize_threshold: DEFAULT_BINARIZE_THRESHOLD,
            parallel_rows: true,
        }
    }
}

impl ProjectorConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        if self.binarize_threshold > 0.0 && self.binarize_threshold <= 1.0 {
            Ok(())
        } else {
            Err(vec!["projection.binarize_threshold must be within (0, 1]".to_string()])
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoiProjector {
    config: ProjectorConfig,
}

/// Precomputed mapping from output pixels back into the reference grid.
#[derive(Debug, Clone, Copy)]
pub struct InverseMap {
    output_to_reference: AffineMatrix,
    target: CoordinateSpace,
}

impl InverseMap {
    pub fn reference_point(&self, col: usize, row: usize) -> Point {
        self.output_to_reference
            .apply(Point::new(col as f64, row as f64))
    }
}

impl RoiProjector {
    pub fn new(config: ProjectorConfig) -> Self {
        Self { config }
    }

    /// Working-space alignment expressed between native-resolution grids.
    ///
    /// `S · T · S⁻¹` with `S = diag(W/512, H/512)`.
    pub fn rescale_alignment(
        alignment: &AffineMatrix,
        target: CoordinateSpace,
    ) -> CoreResult<AffineMatrix> {
        let factors = CoordinateSpace::working().scale_to(&target)?;
        if !factors.is_uniform() {
            warn!(
                target = %target,
                sx = factors.sx,
                sy = factors.sy,
                "Native aspect ratio differs from the working space"
            );
        }
        Ok(alignment.conjugate_by_scale(factors))
    }

    /// Build the output-pixel to reference-pixel map for one image.
    pub fn inverse_map(
        &self,
        alignment: &AffineMatrix,
        target: CoordinateSpace,
    ) -> CoreResult<InverseMap> {
        if alignment.is_singular() {
            return Err(MesoscalerError::InvalidAlignment {
                determinant: alignment.determinant(),
            });
        }
        let native = Self::rescale_alignment(alignment, target)?;
        let factors = CoordinateSpace::working().scale_to(&target)?;
        // native -> native reference, then back down to the 512 reference grid
        let to_reference = native
            .invert()?
            .then(&AffineMatrix::scaling(1.0 / factors.sx, 1.0 / factors.sy));
        Ok(InverseMap {
            output_to_reference: to_reference,
            target,
        })
    }

    /// Warp one reference mask. Metadata is carried over unchanged.
    pub fn project_mask(&self, mask: &RoiMask, map: &InverseMap) -> RoiMask {
        RoiMask::new(mask.meta.clone(), self.warp(mask.mask.view(), map))
    }

    /// Project the outline and every ROI into `target`.
    pub fn project(
        &self,
        outline: &RoiMask,
        rois: &[RoiMask],
        alignment: &AffineMatrix,
        target: CoordinateSpace,
    ) -> CoreResult<RoiSet> {
        let start = Instant::now();
        let map = self.inverse_map(alignment, target)?;
        let projected_outline = self.project_mask(outline, &map);
        let projected: Vec<RoiMask> = rois.iter().map(|r| self.project_mask(r, &map)).collect();

        debug!(
            target = %target,
            rois = projected.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Projected ROI masks"
        );
        RoiSet::new(target, projected_outline, projected)
    }

    fn warp(&self, reference: ArrayView2<'_, u8>, map: &InverseMap) -> Array2<u8> {
        let mut out = Array2::<u8>::zeros(map.target.shape());
        let threshold = self.config.binarize_threshold;
        let fill_row = |row: usize, mut line: ndarray::ArrayViewMut1<'_, u8>| {
            for (col, value) in line.iter_mut().enumerate() {
                let p = map.reference_point(col, row);
                *value = u8::from(sample_bilinear(&reference, p) >= threshold);
            }
        };

        if self.config.parallel_rows {
            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(row, line)| fill_row(row, line));
        } else {
            out.axis_iter_mut(Axis(0))
                .enumerate()
                .for_each(|(row, line)| fill_row(row, line));
        }
        out
    }
}

/// Bilinear sample of a binary raster.
///
/// Pixels cover `[i - 0.5, i + 0.5]`, so points within half a pixel of the
/// border take the edge value; anything further out is 0.
fn sample_bilinear(mask: &ArrayView2<'_, u8>, p: Point) -> f64 {
    let (rows, cols) = mask.dim();
    let max_x = (cols - 1) as f64;
    let max_y = (rows - 1) as f64;
    if !p.is_finite() || p.x < -0.5 || p.y < -0.5 || p.x > max_x + 0.5 || p.y > max_y + 0.5 {
        return 0.0;
    }
    let p = Point::new(p.x.clamp(0.0, max_x), p.y.clamp(0.0, max_y));
    let x0 = p.x.floor() as usize;
    let y0 = p.y.floor() as usize;
    let x1 = (x0 + 1).min(cols - 1);
    let y1 = (y0 + 1).min(rows - 1);
    let fx = p.x - x0 as f64;
    let fy = p.y - y0 as f64;

    let v = |r: usize, c: usize| f64::from(mask[[r, c]].min(1));
    let top = v(y0, x0) * (1.0 - fx) + v(y0, x1) * fx;
    let bottom = v(y1, x0) * (1.0 - fx) + v(y1, x1) * fx;
    top * (1.0 - fy) + bottom * fy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rois::{RoiMetadata, Side};

    fn block(w: usize, h: usize, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> RoiMask {
        let mut mask = Array2::<u8>::zeros((h, w));
        for r in rows {
            for c in cols.clone() {
                mask[[r, c]] = 1;
            }
        }
        RoiMask::new(RoiMetadata::new("block", Side::Left, "test block", 42), mask)
    }

    #[test]
    fn test_identity_same_size_is_exact() {
        let mask = block(512, 512, 100..200, 50..150);
        let projector = RoiProjector::default();
        let map = projector
            .inverse_map(&AffineMatrix::identity(), CoordinateSpace::working())
            .unwrap();
        let out = projector.project_mask(&mask, &map);
        assert_eq!(out.mask, mask.mask);
        assert_eq!(out.meta, mask.meta);
    }

    #[test]
    fn test_translation_moves_mask() {
        let mask = block(512, 512, 100..110, 100..110);
        let projector = RoiProjector::default();
        let map = projector
            .inverse_map(&AffineMatrix::translation(20.0, -10.0), CoordinateSpace::working())
            .unwrap();
        let out = projector.project_mask(&mask, &map);
        assert_eq!(out.mask[[90, 120]], 1);
        assert_eq!(out.mask[[100, 100]], 0);
        assert_eq!(out.area(), 100);
    }

    #[test]
    fn test_singular_alignment_rejected() {
        let singular = AffineMatrix::new([[1.0, 1.0, 0.0], [1.0, 1.0, 0.0]]);
        let err = RoiProjector::default()
            .inverse_map(&singular, CoordinateSpace::new(100, 100))
            .unwrap_err();
        assert!(matches!(err, MesoscalerError::InvalidAlignment { .. }));
    }

    #[test]
    fn test_outside_reference_is_background() {
        let mask = block(512, 512, 0..512, 0..512);
        let projector = RoiProjector::default();
        // shift the reference grid half out of view
        let map = projector
            .inverse_map(&AffineMatrix::translation(256.0, 0.0), CoordinateSpace::working())
            .unwrap();
        let out = projector.project_mask(&mask, &map);
        assert_eq!(out.mask[[10, 10]], 0);
        assert_eq!(out.mask[[10, 300]], 1);
    }

    #[test]
    fn test_upscaled_full_mask_keeps_edges() {
        let mask = block(512, 512, 0..512, 0..512);
        let projector = RoiProjector::default();
        let map = projector
            .inverse_map(&AffineMatrix::identity(), CoordinateSpace::new(1024, 1024))
            .unwrap();
        let out = projector.project_mask(&mask, &map);
        assert_eq!(out.mask[[1023, 1023]], 1);
        assert_eq!(out.mask[[0, 1023]], 1);
        assert_eq!(out.mask[[1023, 0]], 1);
        assert_eq!(out.area(), 1024 * 1024);
    }

    #[test]
    fn test_parallel_and_serial_agree() {
        let mask = block(512, 512, 37..301, 12..260);
        let alignment = AffineMatrix::rotation_about(0.3, 256.0, 256.0);
        let target = CoordinateSpace::new(700, 530);
        let parallel = RoiProjector::default();
        let serial = RoiProjector::new(ProjectorConfig {
            parallel_rows: false,
            ..Default::default()
        });
        let a = parallel.project_mask(&mask, &parallel.inverse_map(&alignment, target).unwrap());
        let b = serial.project_mask(&mask, &serial.inverse_map(&alignment, target).unwrap());
        assert_eq!(a.mask, b.mask);
        assert_eq!(a.space(), target);
    }
}
