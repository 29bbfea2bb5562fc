use crate::geometry::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The nine anatomical landmarks shared by the atlas and the predictor.
///
/// Declaration order is the canonical order used everywhere correspondences
/// are listed: left side, midline, right side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum LandmarkId {
    L1,
    L2,
    L3,
    M4,
    M5,
    M6,
    R7,
    R8,
    R9,
}

impl LandmarkId {
    pub const ALL: [LandmarkId; 9] = [
        LandmarkId::L1,
        LandmarkId::L2,
        LandmarkId::L3,
        LandmarkId::M4,
        LandmarkId::M5,
        LandmarkId::M6,
        LandmarkId::R7,
        LandmarkId::R8,
        LandmarkId::R9,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            LandmarkId::L1 => "L1",
            LandmarkId::L2 => "L2",
            LandmarkId::L3 => "L3",
            LandmarkId::M4 => "M4",
            LandmarkId::M5 => "M5",
            LandmarkId::M6 => "M6",
            LandmarkId::R7 => "R7",
            LandmarkId::R8 => "R8",
            LandmarkId::R9 => "R9",
        }
    }

    /// Anatomical name as emitted by the landmark network.
    pub fn anatomical_name(&self) -> &'static str {
        match self {
            LandmarkId::L1 => "left",
            LandmarkId::L2 => "top left",
            LandmarkId::L3 => "bottom left",
            LandmarkId::M4 => "top center",
            LandmarkId::M5 => "bregma",
            LandmarkId::M6 => "lambda",
            LandmarkId::R7 => "right",
            LandmarkId::R8 => "top right",
            LandmarkId::R9 => "bottom right",
        }
    }

    /// Position in the 512x512 reference atlas.
    pub fn atlas_position(&self) -> Point {
        let (x, y) = match self {
            LandmarkId::L1 => (102.0, 148.0),
            LandmarkId::L2 => (166.0, 88.0),
            LandmarkId::L3 => (214.0, 454.0),
            LandmarkId::M4 => (256.0, 88.0),
            LandmarkId::M5 => (256.0, 256.0),
            LandmarkId::M6 => (256.0, 428.0),
            LandmarkId::R7 => (410.0, 148.0),
            LandmarkId::R8 => (346.0, 88.0),
            LandmarkId::R9 => (298.0, 454.0),
        };
        Point::new(x, y)
    }
}

impl fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown landmark name '{0}'")]
pub struct UnknownLandmark(pub String);

impl FromStr for LandmarkId {
    type Err = UnknownLandmark;

    /// Accepts either the short code (`"M5"`) or the anatomical name (`"bregma"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        LandmarkId::ALL
            .iter()
            .copied()
            .find(|id| {
                id.code().eq_ignore_ascii_case(needle)
                    || id.anatomical_name().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| UnknownLandmark(s.to_string()))
    }
}

impl From<LandmarkId> for String {
    fn from(id: LandmarkId) -> Self {
        id.code().to_string()
    }
}

impl TryFrom<String> for LandmarkId {
    type Error = UnknownLandmark;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
