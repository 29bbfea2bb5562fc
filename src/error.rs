//! Error taxonomy for the alignment and projection core.
//!
//! Every variant except [`MesoscalerError::Predictor`] and
//! [`MesoscalerError::Io`] describes a problem with a single source image.
//! The orchestrator records those, skips the image and keeps going; the two
//! fatal kinds abort the run.

use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, MesoscalerError>;

#[derive(Debug, Error)]
pub enum MesoscalerError {
    #[error("invalid coordinate space {width}x{height}: dimensions must be positive")]
    InvalidSpace { width: u32, height: u32 },

    #[error("coordinate spaces differ: {expected} vs {got}")]
    SpaceMismatch { expected: String, got: String },

    #[error("insufficient landmarks: need at least {needed} correspondences, got {got}")]
    InsufficientLandmarks { needed: usize, got: usize },

    #[error(
        "degenerate landmark configuration: spread {score:.3e} below tolerance {tolerance:.1e} (points are near-collinear)"
    )]
    DegenerateConfiguration { score: f64, tolerance: f64 },

    #[error("invalid alignment: transform is singular (determinant {determinant:.3e})")]
    InvalidAlignment { determinant: f64 },

    #[error("incomplete result for '{image}': missing {}", missing.join(", "))]
    IncompleteResult { image: String, missing: Vec<String> },

    #[error("mask '{name}' is {got_width}x{got_height}, expected {expected_width}x{expected_height}")]
    MaskShape {
        name: String,
        expected_width: u32,
        expected_height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("malformed artifact '{key}': {reason}")]
    MalformedArtifact { key: String, reason: String },

    #[error("failed to decode image '{path}': {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("landmark predictor failed: {0}")]
    Predictor(String),

    #[error("artifact store I/O failed at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl MesoscalerError {
    /// Fatal errors abort the whole run instead of skipping one image.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Predictor(_) | Self::Io { .. })
    }

    /// Short machine-friendly name used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSpace { .. } => "InvalidSpace",
            Self::SpaceMismatch { .. } => "SpaceMismatch",
            Self::InsufficientLandmarks { .. } => "InsufficientLandmarks",
            Self::DegenerateConfiguration { .. } => "DegenerateConfiguration",
            Self::InvalidAlignment { .. } => "InvalidAlignment",
            Self::IncompleteResult { .. } => "IncompleteResult",
            Self::MaskShape { .. } => "MaskShape",
            Self::MalformedArtifact { .. } => "MalformedArtifact",
            Self::Image { .. } => "Image",
            Self::Predictor(_) => "Predictor",
            Self::Io { .. } => "Io",
        }
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn malformed(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedArtifact {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Decide whether an orchestration error should abort the run.
///
/// Anything that is not one of ours is treated as fatal.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<MesoscalerError>()
        .map(MesoscalerError::is_fatal)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(MesoscalerError::Predictor("gone".into()).is_fatal());
        assert!(!MesoscalerError::InsufficientLandmarks { needed: 3, got: 1 }.is_fatal());

        let per_image: anyhow::Error = MesoscalerError::InvalidAlignment { determinant: 0.0 }.into();
        assert!(!is_fatal(&per_image));

        let foreign = anyhow::anyhow!("something else");
        assert!(is_fatal(&foreign));
    }

    #[test]
    fn test_incomplete_result_message() {
        let err = MesoscalerError::IncompleteResult {
            image: "mouse01.png".into(),
            missing: vec!["alignment".into(), "rois".into()],
        };
        assert_eq!(
            err.to_string(),
            "incomplete result for 'mouse01.png': missing alignment, rois"
        );
        assert_eq!(err.kind(), "IncompleteResult");
    }
}
