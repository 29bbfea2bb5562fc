//! Built-in dorsal cortex atlas at 512x512.
//!
//! Regions are stored as left-hemisphere polygons in working-space pixel
//! coordinates and mirrored across the midline `x = 256` for the right side.

use crate::geometry::{CoordinateSpace, WORKING_SIZE};
use crate::rois::{RoiMetadata, Side};
use ndarray::Array2;

pub(crate) const MIDLINE_X: f64 = WORKING_SIZE as f64 / 2.0;

pub(crate) struct RegionOutline {
    pub name: &'static str,
    pub description: &'static str,
    pub allen_id: u32,
    pub vertices: &'static [(f64, f64)],
}

pub(crate) const HEMISPHERE_OUTLINE: &[(f64, f64)] = &[
    (256.0, 18.0),
    (226.0, 20.0),
    (206.0, 40.0),
    (204.0, 62.0),
    (166.0, 68.0),
    (126.0, 90.0),
    (102.0, 122.0),
    (88.0, 170.0),
    (84.0, 230.0),
    (90.0, 300.0),
    (106.0, 365.0),
    (134.0, 422.0),
    (172.0, 460.0),
    (214.0, 472.0),
    (256.0, 474.0),
];

pub(crate) const REGIONS: &[RegionOutline] = &[
    RegionOutline {
        name: "OB",
        description: "olfactory bulb",
        allen_id: 507,
        vertices: &[(255.0, 22.0), (226.0, 24.0), (210.0, 40.0), (208.0, 58.0), (255.0, 58.0)],
    },
    RegionOutline {
        name: "MOs",
        description: "secondary motor area",
        allen_id: 993,
        vertices: &[(255.0, 64.0), (204.0, 64.0), (196.0, 140.0), (212.0, 236.0), (255.0, 240.0)],
    },
    RegionOutline {
        name: "MOp",
        description: "primary motor area",
        allen_id: 985,
        vertices: &[
            (204.0, 64.0),
            (166.0, 70.0),
            (150.0, 150.0),
            (170.0, 232.0),
            (212.0, 236.0),
            (196.0, 140.0),
        ],
    },
    RegionOutline {
        name: "SSp-ul",
        description: "primary somatosensory area, upper limb",
        allen_id: 369,
        vertices: &[(166.0, 70.0), (128.0, 92.0), (108.0, 130.0), (150.0, 150.0)],
    },
    RegionOutline {
        name: "SSp-bfd",
        description: "primary somatosensory area, barrel field",
        allen_id: 329,
        vertices: &[
            (108.0, 130.0),
            (94.0, 180.0),
            (96.0, 250.0),
            (140.0, 258.0),
            (160.0, 200.0),
            (150.0, 150.0),
        ],
    },
    RegionOutline {
        name: "SSp-ll",
        description: "primary somatosensory area, lower limb",
        allen_id: 337,
        vertices: &[(160.0, 200.0), (140.0, 258.0), (190.0, 262.0), (170.0, 232.0)],
    },
    RegionOutline {
        name: "PTLp",
        description: "posterior parietal association areas",
        allen_id: 22,
        vertices: &[(140.0, 262.0), (192.0, 264.0), (210.0, 300.0), (150.0, 310.0)],
    },
    RegionOutline {
        name: "RSPd",
        description: "retrosplenial area, dorsal part",
        allen_id: 879,
        vertices: &[(255.0, 244.0), (214.0, 240.0), (226.0, 330.0), (236.0, 440.0), (255.0, 450.0)],
    },
    RegionOutline {
        name: "VISp",
        description: "primary visual area",
        allen_id: 385,
        vertices: &[
            (150.0, 314.0),
            (212.0, 304.0),
            (222.0, 380.0),
            (200.0, 430.0),
            (150.0, 410.0),
            (120.0, 360.0),
        ],
    },
];

/// Reflect left-hemisphere vertices onto the right hemisphere.
pub(crate) fn mirror(vertices: &[(f64, f64)]) -> Vec<(f64, f64)> {
    vertices
        .iter()
        .map(|&(x, y)| (2.0 * MIDLINE_X - x, y))
        .collect()
}

/// Fill a polygon with the even-odd rule, sampling at integer pixel positions.
pub(crate) fn rasterize_polygon(vertices: &[(f64, f64)], space: CoordinateSpace) -> Array2<u8> {
    let mut mask = Array2::<u8>::zeros(space.shape());
    if vertices.len() < 3 {
        return mask;
    }

    let (min_y, max_y) = vertices
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| {
            (lo.min(y), hi.max(y))
        });
    let first_row = min_y.ceil().max(0.0) as usize;
    let last_row = (max_y.floor() as i64).min(space.height as i64 - 1);
    if last_row < first_row as i64 {
        return mask;
    }

    let mut crossings = Vec::with_capacity(vertices.len());
    for row in first_row..=last_row as usize {
        let y = row as f64;
        crossings.clear();
        for i in 0..vertices.len() {
            let (x0, y0) = vertices[i];
            let (x1, y1) = vertices[(i + 1) % vertices.len()];
            // half-open so shared vertices count once
            if (y0 <= y && y < y1) || (y1 <= y && y < y0) {
                crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil().max(0.0) as i64;
            let end = (span[1].floor() as i64).min(space.width as i64 - 1);
            for col in start..=end {
                mask[[row, col as usize]] = 1;
            }
        }
    }
    mask
}

pub(crate) fn region_metadata(region: &RegionOutline, side: Side) -> RoiMetadata {
    RoiMetadata::new(region.name, side, region.description, region.allen_id)
}
