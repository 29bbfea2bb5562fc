//! Named anatomical landmarks with confidences, tied to a coordinate space.

pub mod reference;

pub use reference::*;

use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::{AffineMatrix, CoordinateSpace, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub likelihood: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, likelihood: f64) -> Self {
        Self { x, y, likelihood }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// One landmark seen in two sets: `reference` from the set `matched_with` was
/// called on, `data` from the argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub id: LandmarkId,
    pub reference: Point,
    pub data: Point,
}

/// Immutable set of landmarks in one coordinate space.
///
/// Stored in canonical [`LandmarkId`] order. Low-confidence entries are kept;
/// consumers decide with [`LandmarkSet::filtered`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    space: CoordinateSpace,
    landmarks: BTreeMap<LandmarkId, Landmark>,
}

impl LandmarkSet {
    pub fn new(
        space: CoordinateSpace,
        landmarks: impl IntoIterator<Item = (LandmarkId, Landmark)>,
    ) -> Self {
        Self {
            space,
            landmarks: landmarks.into_iter().collect(),
        }
    }

    pub fn empty(space: CoordinateSpace) -> Self {
        Self::new(space, std::iter::empty())
    }

    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn get(&self, id: LandmarkId) -> Option<&Landmark> {
        self.landmarks.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LandmarkId, &Landmark)> + '_ {
        self.landmarks.iter().map(|(id, lm)| (*id, lm))
    }

    pub fn ids(&self) -> Vec<LandmarkId> {
        self.landmarks.keys().copied().collect()
    }

    /// Same landmarks expressed in `target`. Likelihoods are untouched.
    pub fn rescale(&self, target: CoordinateSpace) -> CoreResult<LandmarkSet> {
        let factors = self.space.scale_to(&target)?;
        if !factors.is_uniform() {
            tracing::warn!(
                from = %self.space,
                to = %target,
                sx = factors.sx,
                sy = factors.sy,
                "Rescaling landmarks across differing aspect ratios"
            );
        }
        Ok(Self {
            space: target,
            landmarks: self
                .landmarks
                .iter()
                .map(|(id, lm)| {
                    (
                        *id,
                        Landmark::new(lm.x * factors.sx, lm.y * factors.sy, lm.likelihood),
                    )
                })
                .collect(),
        })
    }

    /// Landmarks with `likelihood >= min_likelihood` and finite coordinates.
    pub fn filtered(&self, min_likelihood: f64) -> LandmarkSet {
        Self {
            space: self.space,
            landmarks: self
                .landmarks
                .iter()
                .filter(|(_, lm)| {
                    lm.likelihood.is_finite()
                        && lm.likelihood >= min_likelihood
                        && lm.point().is_finite()
                })
                .map(|(id, lm)| (*id, *lm))
                .collect(),
        }
    }

    /// Landmarks present in both sets, in canonical order.
    pub fn matched_with(&self, other: &LandmarkSet) -> Vec<Correspondence> {
        self.landmarks
            .iter()
            .filter_map(|(id, lm)| {
                other.landmarks.get(id).map(|theirs| Correspondence {
                    id: *id,
                    reference: lm.point(),
                    data: theirs.point(),
                })
            })
            .collect()
    }

    /// Map every landmark through `transform`, keeping likelihoods.
    pub fn transformed(&self, transform: &AffineMatrix, target: CoordinateSpace) -> LandmarkSet {
        Self {
            space: target,
            landmarks: self
                .landmarks
                .iter()
                .map(|(id, lm)| {
                    let p = transform.apply(lm.point());
                    (*id, Landmark::new(p.x, p.y, lm.likelihood))
                })
                .collect(),
        }
    }

    pub(crate) fn ensure_space(&self, expected: CoordinateSpace) -> CoreResult<()> {
        if self.space != expected {
            return Err(MesoscalerError::SpaceMismatch {
                expected: expected.to_string(),
                got: self.space.to_string(),
            });
        }
        Ok(())
    }
}

/// Landmark record as exchanged with predictors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub likelihood: f64,
}

impl LandmarkSet {
    /// Build a set from named records.
    ///
    /// Names outside the vocabulary, repeated names and likelihoods outside
    /// `[0, 1]` are predictor errors.
    pub fn from_records(space: CoordinateSpace, records: &[LandmarkRecord]) -> CoreResult<Self> {
        let mut landmarks = BTreeMap::new();
        for record in records {
            let id: LandmarkId = record
                .name
                .parse()
                .map_err(|e: UnknownLandmark| MesoscalerError::Predictor(e.to_string()))?;
            if !(0.0..=1.0).contains(&record.likelihood) {
                return Err(MesoscalerError::Predictor(format!(
                    "landmark '{}' has likelihood {} outside [0, 1]",
                    record.name, record.likelihood
                )));
            }
            let landmark = Landmark::new(record.x, record.y, record.likelihood);
            if landmarks.insert(id, landmark).is_some() {
                return Err(MesoscalerError::Predictor(format!(
                    "landmark '{}' reported more than once",
                    id
                )));
            }
        }
        Ok(Self { space, landmarks })
    }
}
