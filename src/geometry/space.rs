use crate::error::{CoreResult, MesoscalerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side length of the working space every registration happens in.
pub const WORKING_SIZE: u32 = 512;

/// Pixel grid an image, landmark set or mask is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoordinateSpace {
    pub width: u32,
    pub height: u32,
}

/// Per-axis factors converting coordinates from one space into another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub sx: f64,
    pub sy: f64,
}

impl ScaleFactors {
    /// False when the two spaces have different aspect ratios.
    pub fn is_uniform(&self) -> bool {
        (self.sx - self.sy).abs() <= 1e-9 * self.sx.abs().max(self.sy.abs())
    }
}

impl CoordinateSpace {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The fixed 512x512 registration space.
    pub const fn working() -> Self {
        Self::new(WORKING_SIZE, WORKING_SIZE)
    }

    pub fn is_working(&self) -> bool {
        *self == Self::working()
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MesoscalerError::InvalidSpace {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Factors mapping coordinates in `self` to coordinates in `target`.
    pub fn scale_to(&self, target: &CoordinateSpace) -> CoreResult<ScaleFactors> {
        self.validate()?;
        target.validate()?;
        Ok(ScaleFactors {
            sx: target.width as f64 / self.width as f64,
            sy: target.height as f64 / self.height as f64,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// `(rows, cols)` as used by mask rasters.
    pub fn shape(&self) -> (usize, usize) {
        (self.height as usize, self.width as usize)
    }
}

impl fmt::Display for CoordinateSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
