use crate::algorithms::AlignmentEstimate;
use crate::geometry::CoordinateSpace;
use crate::landmarks::LandmarkSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// One collected source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Filesystem-safe artifact key.
    pub key: String,
    /// Unique display name, possibly with parent directories.
    pub name: String,
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Set for pages of a multi-page TIFF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<Frame>,
}

/// Position of a page inside a multi-page source; `index` counts from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub index: u32,
    pub total: u32,
}

impl Frame {
    /// `<name>_frame<NN>`, zero padded to at least two digits.
    pub fn image_name(&self, name: &str) -> String {
        let digits = self.total.to_string().len().max(2);
        format!("{}_frame{:0width$}", name, self.index, width = digits)
    }
}

impl ImageRecord {
    pub fn native(&self) -> CoordinateSpace {
        CoordinateSpace::new(self.width, self.height)
    }
}

/// Output of the alignment stage for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentArtifact {
    pub estimate: AlignmentEstimate,
    /// Reference landmarks carried into the image by the alignment.
    pub aligned_landmarks: LandmarkSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Completed => "completed",
            StageState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedImage {
    pub key: String,
    pub kind: String,
    pub message: String,
}

/// Per-image bookkeeping for one stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub state: StageState,
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedImage>,
    pub duration_ms: f64,
}

impl StageReport {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            state: StageState::Pending,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0.0,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTime {
    pub stage_name: String,
    pub duration_ms: f64,
}

/// What a whole pipeline run did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub pipeline: String,
    pub correlation_id: Uuid,
    pub stages: Vec<StageReport>,
    pub stage_timings: Vec<StageTime>,
}

impl RunSummary {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Keys that failed in any stage, with the first failure for each.
    pub fn failed_images(&self) -> Vec<&FailedImage> {
        let mut seen = std::collections::HashSet::new();
        self.stages
            .iter()
            .flat_map(|s| s.failed.iter())
            .filter(|f| seen.insert(f.key.clone()))
            .collect()
    }
}
