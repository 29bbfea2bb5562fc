// Landmark-driven alignment and ROI projection
pub mod estimator;
pub mod projector;
pub mod ransac;

pub use estimator::*;
pub use projector::*;
pub use ransac::{RansacConfig, RansacResult};
