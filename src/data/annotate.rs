//! Rendering landmarks and region boundaries onto working images.

use crate::landmarks::LandmarkSet;
use image::{Rgb, RgbImage};
use ndarray::Array2;

/// Disc radius for landmark markers, in working-space pixels.
pub const MARKER_RADIUS: f64 = 8.0;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const ATLAS_COLOR: Rgb<u8> = Rgb([255, 200, 0]);

/// Fill a disc centred on `(cx, cy)`; parts outside the image are clipped.
pub fn draw_disc(img: &mut RgbImage, cx: f64, cy: f64, radius: f64, color: Rgb<u8>) {
    if !(cx.is_finite() && cy.is_finite()) {
        return;
    }
    let (w, h) = img.dimensions();
    let x_min = (cx - radius).floor().max(0.0) as i64;
    let x_max = ((cx + radius).ceil() as i64).min(w as i64 - 1);
    let y_min = (cy - radius).floor().max(0.0) as i64;
    let y_max = ((cy + radius).ceil() as i64).min(h as i64 - 1);
    let r2 = radius * radius;
    for y in y_min..=y_max {
        for x in x_min..=x_max {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy <= r2 {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

pub fn draw_landmarks(img: &mut RgbImage, landmarks: &LandmarkSet, color: Rgb<u8>) {
    for (_, lm) in landmarks.iter() {
        draw_disc(img, lm.x, lm.y, MARKER_RADIUS, color);
    }
}

/// Paint mask pixels that touch the background (4-neighbourhood).
pub fn draw_mask_boundary(img: &mut RgbImage, mask: &Array2<u8>, color: Rgb<u8>) {
    let (rows, cols) = mask.dim();
    let (w, h) = img.dimensions();
    let inside = |r: isize, c: isize| -> bool {
        r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols && mask[[r as usize, c as usize]] != 0
    };
    for row in 0..rows.min(h as usize) {
        for col in 0..cols.min(w as usize) {
            let (r, c) = (row as isize, col as isize);
            if !inside(r, c) {
                continue;
            }
            let edge = !inside(r - 1, c) || !inside(r + 1, c) || !inside(r, c - 1) || !inside(r, c + 1);
            if edge {
                img.put_pixel(col as u32, row as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CoordinateSpace;
    use crate::landmarks::{Landmark, LandmarkId};

    #[test]
    fn test_disc_is_clipped_at_border() {
        let mut img = RgbImage::new(20, 20);
        draw_disc(&mut img, 1.0, 1.0, 3.0, WHITE);
        assert_eq!(*img.get_pixel(0, 0), WHITE);
        assert_eq!(*img.get_pixel(1, 4), WHITE);
        assert_eq!(*img.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_landmarks_and_boundary() {
        let mut img = RgbImage::new(64, 64);
        let set = LandmarkSet::new(
            CoordinateSpace::new(64, 64),
            vec![(LandmarkId::M5, Landmark::new(32.0, 32.0, 1.0))],
        );
        draw_landmarks(&mut img, &set, WHITE);
        assert_eq!(*img.get_pixel(32, 24), WHITE);

        let mut mask = Array2::<u8>::zeros((64, 64));
        for r in 2..6 {
            for c in 2..6 {
                mask[[r, c]] = 1;
            }
        }
        let mut canvas = RgbImage::new(64, 64);
        draw_mask_boundary(&mut canvas, &mask, ATLAS_COLOR);
        assert_eq!(*canvas.get_pixel(2, 2), ATLAS_COLOR);
        assert_eq!(*canvas.get_pixel(3, 3), Rgb([0, 0, 0]));
    }
}
