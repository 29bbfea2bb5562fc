//! Affine alignment of reference landmarks onto predicted landmarks.
//!
//! The fit is ordinary least squares over all confident correspondences, both
//! hemispheres jointly. Reference points are first normalized (centroid at the
//! origin, mean distance `sqrt(2)`) so that the conditioning check below does
//! not depend on image scale.

use super::ransac::{self, RansacConfig, MINIMAL_SAMPLE};
use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::{AffineMatrix, Point};
use crate::landmarks::{Correspondence, LandmarkId, LandmarkSet};
use instant::Instant;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_MIN_LIKELIHOOD: f64 = 0.9999;
pub const DEFAULT_DEGENERACY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FitStrategy {
    LeastSquares,
    /// Consensus search over minimal samples, then a least-squares refit on the inliers.
    Ransac(RansacConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Data landmarks below this likelihood are ignored.
    pub min_likelihood: f64,
    /// Minimum spread score of the normalized reference points.
    pub degeneracy_tolerance: f64,
    pub strategy: FitStrategy,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_likelihood: DEFAULT_MIN_LIKELIHOOD,
            degeneracy_tolerance: DEFAULT_DEGENERACY_TOLERANCE,
            strategy: FitStrategy::LeastSquares,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.min_likelihood) {
            errors.push("alignment.min_likelihood must be within [0, 1]".to_string());
        }
        if self.degeneracy_tolerance.is_nan() || self.degeneracy_tolerance <= 0.0 {
            errors.push("alignment.degeneracy_tolerance must be positive".to_string());
        }
        if let FitStrategy::Ransac(ransac) = &self.strategy {
            if let Err(mut ransac_errors) = ransac.validate() {
                errors.append(&mut ransac_errors);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Fitted alignment plus diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentEstimate {
    /// Reference to data, working space.
    pub alignment: AffineMatrix,
    pub rms_residual: f64,
    /// Landmarks that contributed to the final fit, canonical order.
    pub used: Vec<LandmarkId>,
    /// Spread score of the fitted reference points.
    pub conditioning: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AlignmentEstimator {
    config: EstimatorConfig,
}

impl AlignmentEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Estimate the affine map taking `reference` landmarks onto `data` landmarks.
    ///
    /// Both sets must share a coordinate space. Landmarks below the
    /// likelihood threshold are dropped from either side before matching.
    pub fn estimate(
        &self,
        reference: &LandmarkSet,
        data: &LandmarkSet,
    ) -> CoreResult<AlignmentEstimate> {
        let start = Instant::now();
        data.ensure_space(reference.space())?;

        let min_likelihood = self.config.min_likelihood;
        let correspondences = reference
            .filtered(min_likelihood)
            .matched_with(&data.filtered(min_likelihood));
        if correspondences.len() < MINIMAL_SAMPLE {
            return Err(MesoscalerError::InsufficientLandmarks {
                needed: MINIMAL_SAMPLE,
                got: correspondences.len(),
            });
        }

        let tolerance = self.config.degeneracy_tolerance;
        let fitted: Vec<Correspondence> = match &self.config.strategy {
            FitStrategy::LeastSquares => correspondences,
            FitStrategy::Ransac(ransac_config) => {
                let consensus = ransac::find_inliers(&correspondences, ransac_config, |sample| {
                    fit_least_squares(sample, tolerance).map(|fit| fit.alignment)
                })?;
                if consensus.inliers.len() < correspondences.len() {
                    warn!(
                        inliers = consensus.inliers.len(),
                        total = correspondences.len(),
                        "Discarding outlier landmarks"
                    );
                }
                consensus
                    .inliers
                    .iter()
                    .map(|&i| correspondences[i])
                    .collect()
            }
        };

        let fit = fit_least_squares(&fitted, tolerance)?;
        let rms_residual = rms_residual(&fit.alignment, &fitted);

        debug!(
            landmarks = fitted.len(),
            rms_residual,
            conditioning = fit.conditioning,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Estimated alignment"
        );

        Ok(AlignmentEstimate {
            alignment: fit.alignment,
            rms_residual,
            used: fitted.iter().map(|c| c.id).collect(),
            conditioning: fit.conditioning,
        })
    }
}

pub(crate) struct LeastSquaresFit {
    pub alignment: AffineMatrix,
    pub conditioning: f64,
}

/// Ordinary least-squares affine fit of `reference -> data`.
pub(crate) fn fit_least_squares(
    correspondences: &[Correspondence],
    tolerance: f64,
) -> CoreResult<LeastSquaresFit> {
    let n = correspondences.len();
    if n < MINIMAL_SAMPLE {
        return Err(MesoscalerError::InsufficientLandmarks {
            needed: MINIMAL_SAMPLE,
            got: n,
        });
    }

    let (center, scale) = normalization(correspondences.iter().map(|c| c.reference));
    if !scale.is_finite() {
        return Err(MesoscalerError::DegenerateConfiguration {
            score: 0.0,
            tolerance,
        });
    }

    let mut normal = Matrix3::<f64>::zeros();
    let mut rhs_x = Vector3::<f64>::zeros();
    let mut rhs_y = Vector3::<f64>::zeros();
    for c in correspondences {
        let row = Vector3::new(
            (c.reference.x - center.x) * scale,
            (c.reference.y - center.y) * scale,
            1.0,
        );
        normal += row * row.transpose();
        rhs_x += row * c.data.x;
        rhs_y += row * c.data.y;
    }

    let conditioning = normal.determinant() / (n as f64).powi(3);
    if !conditioning.is_finite() || conditioning < tolerance {
        return Err(MesoscalerError::DegenerateConfiguration {
            score: conditioning,
            tolerance,
        });
    }

    let lu = normal.lu();
    let (Some(px), Some(py)) = (lu.solve(&rhs_x), lu.solve(&rhs_y)) else {
        return Err(MesoscalerError::DegenerateConfiguration {
            score: conditioning,
            tolerance,
        });
    };

    // Undo normalization: d = A'·s·(r - c) + t'
    let (a, b) = (px[0] * scale, px[1] * scale);
    let (d, e) = (py[0] * scale, py[1] * scale);
    let alignment = AffineMatrix::new([
        [a, b, px[2] - a * center.x - b * center.y],
        [d, e, py[2] - d * center.x - e * center.y],
    ]);

    Ok(LeastSquaresFit {
        alignment,
        conditioning,
    })
}

/// Centroid and the scale giving the points a mean distance of `sqrt(2)` from it.
fn normalization(points: impl Iterator<Item = Point> + Clone) -> (Point, f64) {
    let n = points.clone().count() as f64;
    let (sx, sy) = points.clone().fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
    let center = Point::new(sx / n, sy / n);
    let mean_distance = points.map(|p| p.distance(&center)).sum::<f64>() / n;
    (center, std::f64::consts::SQRT_2 / mean_distance)
}

fn rms_residual(alignment: &AffineMatrix, correspondences: &[Correspondence]) -> f64 {
    let sum: f64 = correspondences
        .iter()
        .map(|c| alignment.apply(c.reference).distance(&c.data).powi(2))
        .sum();
    (sum / correspondences.len() as f64).sqrt()
}
