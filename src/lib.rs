//! Registration of a mesoscale mouse-brain atlas onto widefield images.
//!
//! Predicted anatomical landmarks drive an affine alignment of a reference
//! atlas; the atlas regions are then projected into every image at native
//! resolution and packaged together with the intermediate artifacts.

pub mod algorithms;
pub mod atlas;
pub mod config;
pub mod data;
pub mod error;
pub mod geometry;
pub mod landmarks;
pub mod logging;
pub mod packaging;
pub mod pipeline;
pub mod predictor;
pub mod rois;

pub use algorithms::{AlignmentEstimate, AlignmentEstimator, RoiProjector};
pub use atlas::ReferenceAtlas;
pub use error::{CoreResult, MesoscalerError};
pub use geometry::{AffineMatrix, CoordinateSpace, Point};
pub use landmarks::{Landmark, LandmarkId, LandmarkSet};
pub use rois::{RoiMask, RoiMetadata, RoiSet, Side};

pub type Result<T> = anyhow::Result<T>;
