use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::AffineMatrix;
use crate::landmarks::Correspondence;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Points needed to determine an affine transform.
pub const MINIMAL_SAMPLE: usize = 3;

/// Configuration for robust affine estimation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RansacConfig {
    pub max_iterations: usize,
    /// Reprojection distance in working-space pixels.
    pub inlier_threshold: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            inlier_threshold: 4.0,
            min_inliers: MINIMAL_SAMPLE,
            seed: 0,
        }
    }
}

impl RansacConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.max_iterations == 0 {
            errors.push("ransac.max_iterations must be greater than 0".to_string());
        }
        if self.inlier_threshold.is_nan() || self.inlier_threshold <= 0.0 {
            errors.push("ransac.inlier_threshold must be positive".to_string());
        }
        if self.min_inliers < MINIMAL_SAMPLE {
            errors.push(format!("ransac.min_inliers must be at least {}", MINIMAL_SAMPLE));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Consensus found by [`find_inliers`].
#[derive(Clone, Debug)]
pub struct RansacResult {
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

/// Search minimal samples for the transform most correspondences agree on.
///
/// `fit` estimates a transform from a sample; samples it rejects are skipped.
/// The same seed always yields the same consensus set.
pub fn find_inliers<F>(
    correspondences: &[Correspondence],
    config: &RansacConfig,
    fit: F,
) -> CoreResult<RansacResult>
where
    F: Fn(&[Correspondence]) -> CoreResult<AffineMatrix>,
{
    let total = correspondences.len();
    if total < MINIMAL_SAMPLE {
        return Err(MesoscalerError::InsufficientLandmarks {
            needed: MINIMAL_SAMPLE,
            got: total,
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Vec<usize> = Vec::new();
    let mut best_error = f64::INFINITY;
    let mut iterations = 0;
    let mut sample = Vec::with_capacity(MINIMAL_SAMPLE);

    for _ in 0..config.max_iterations {
        iterations += 1;
        sample.clear();
        sample.extend(
            index::sample(&mut rng, total, MINIMAL_SAMPLE)
                .into_iter()
                .map(|i| correspondences[i]),
        );

        let Ok(candidate) = fit(&sample) else {
            continue;
        };

        let (inliers, error) = score(correspondences, &candidate, config.inlier_threshold);
        if inliers.len() > best.len() || (inliers.len() == best.len() && error < best_error) {
            best = inliers;
            best_error = error;
            if best.len() == total {
                break;
            }
        }
    }

    debug!(
        inliers = best.len(),
        total,
        iterations,
        "RANSAC consensus search finished"
    );

    if best.len() < config.min_inliers.max(MINIMAL_SAMPLE) {
        return Err(MesoscalerError::InsufficientLandmarks {
            needed: config.min_inliers.max(MINIMAL_SAMPLE),
            got: best.len(),
        });
    }

    Ok(RansacResult {
        inliers: best,
        iterations,
    })
}

fn score(
    correspondences: &[Correspondence],
    transform: &AffineMatrix,
    threshold: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut error = 0.0;
    for (i, c) in correspondences.iter().enumerate() {
        let distance = transform.apply(c.reference).distance(&c.data);
        if distance < threshold {
            inliers.push(i);
            error += distance;
        }
    }
    (inliers, error)
}
