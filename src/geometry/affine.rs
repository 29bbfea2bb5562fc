//! 2x3 affine matrices in the "compressed" convention.
//!
//! A point `(x, y)` maps to
//!
//! ```text
//!   X = xx * x + xy * y + xc
//!   Y = yx * x + yy * y + yc
//! ```
//!
//! which is the layout a standard affine-warp primitive consumes directly.

use super::{Point, ScaleFactors};
use crate::error::{CoreResult, MesoscalerError};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Below this magnitude the linear part is treated as singular.
pub const SINGULAR_DETERMINANT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "AffineEntries", into = "AffineEntries")]
pub struct AffineMatrix {
    rows: [[f64; 3]; 2],
}

/// Flat, named serialization of the six coefficients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct AffineEntries {
    xx: f64,
    xy: f64,
    xc: f64,
    yx: f64,
    yy: f64,
    yc: f64,
}

impl From<AffineEntries> for AffineMatrix {
    fn from(e: AffineEntries) -> Self {
        Self::new([[e.xx, e.xy, e.xc], [e.yx, e.yy, e.yc]])
    }
}

impl From<AffineMatrix> for AffineEntries {
    fn from(m: AffineMatrix) -> Self {
        let [[xx, xy, xc], [yx, yy, yc]] = m.rows;
        Self { xx, xy, xc, yx, yy, yc }
    }
}

impl Default for AffineMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineMatrix {
    pub const fn new(rows: [[f64; 3]; 2]) -> Self {
        Self { rows }
    }

    pub const fn identity() -> Self {
        Self::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    pub const fn translation(dx: f64, dy: f64) -> Self {
        Self::new([[1.0, 0.0, dx], [0.0, 1.0, dy]])
    }

    pub const fn scaling(sx: f64, sy: f64) -> Self {
        Self::new([[sx, 0.0, 0.0], [0.0, sy, 0.0]])
    }

    /// Rotation by `angle` radians (counter-clockwise in a y-up frame) about `(cx, cy)`.
    pub fn rotation_about(angle: f64, cx: f64, cy: f64) -> Self {
        let (sin_a, cos_a) = angle.sin_cos();
        Self::new([
            [cos_a, -sin_a, cx - cx * cos_a + cy * sin_a],
            [sin_a, cos_a, cy - cx * sin_a - cy * cos_a],
        ])
    }

    pub fn rows(&self) -> &[[f64; 3]; 2] {
        &self.rows
    }

    /// Row-major coefficients `[xx, xy, xc, yx, yy, yc]`.
    pub fn to_row_major(&self) -> [f64; 6] {
        let [[a, b, c], [d, e, f]] = self.rows;
        [a, b, c, d, e, f]
    }

    pub fn determinant(&self) -> f64 {
        self.rows[0][0] * self.rows[1][1] - self.rows[0][1] * self.rows[1][0]
    }

    pub fn is_singular(&self) -> bool {
        !self.determinant().is_finite() || self.determinant().abs() < SINGULAR_DETERMINANT
    }

    pub fn apply(&self, p: Point) -> Point {
        let [[a, b, c], [d, e, f]] = self.rows;
        Point::new(a * p.x + b * p.y + c, d * p.x + e * p.y + f)
    }

    pub fn to_square(&self) -> Matrix3<f64> {
        let [[a, b, c], [d, e, f]] = self.rows;
        Matrix3::new(a, b, c, d, e, f, 0.0, 0.0, 1.0)
    }

    pub fn from_square(m: &Matrix3<f64>) -> Self {
        Self::new([
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        ])
    }

    /// `self` applied first, then `next`.
    pub fn then(&self, next: &AffineMatrix) -> AffineMatrix {
        Self::from_square(&(next.to_square() * self.to_square()))
    }

    pub fn invert(&self) -> CoreResult<AffineMatrix> {
        let det = self.determinant();
        if self.is_singular() {
            return Err(MesoscalerError::InvalidAlignment { determinant: det });
        }
        let [[a, b, c], [d, e, f]] = self.rows;
        let (ia, ib, id, ie) = (e / det, -b / det, -d / det, a / det);
        Ok(Self::new([
            [ia, ib, -(ia * c + ib * f)],
            [id, ie, -(id * c + ie * f)],
        ]))
    }

    /// Conjugate by a per-axis scale: `S * self * S^-1`.
    ///
    /// Turns a transform valid between two spaces of one resolution into the
    /// same transform between the two spaces rescaled by `factors`. Shear and
    /// rotation terms pick up `sx/sy` ratios, so this is not a plain
    /// multiplication of the coefficients.
    pub fn conjugate_by_scale(&self, factors: ScaleFactors) -> AffineMatrix {
        let scale = AffineMatrix::scaling(factors.sx, factors.sy);
        let unscale = AffineMatrix::scaling(1.0 / factors.sx, 1.0 / factors.sy);
        unscale.then(self).then(&scale)
    }

    pub fn approx_eq(&self, other: &AffineMatrix, tol: f64) -> bool {
        self.to_row_major()
            .iter()
            .zip(other.to_row_major().iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }
}
