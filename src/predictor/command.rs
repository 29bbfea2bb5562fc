use super::{LandmarkPredictor, PredictionPayload, PredictionRequest};
use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::CoordinateSpace;
use crate::landmarks::LandmarkSet;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

/// Runs an external detector once per image.
///
/// Invocation: `<program> <args..> --model <model_path> --image <png>`; the
/// program prints the landmarks as JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandPredictor {
    program: String,
    model_path: PathBuf,
    args: Vec<String>,
}

impl CommandPredictor {
    /// Fails when the model directory is missing.
    pub fn new(program: impl Into<String>, model_path: impl Into<PathBuf>, args: Vec<String>) -> CoreResult<Self> {
        let model_path = model_path.into();
        if !model_path.is_dir() {
            return Err(MesoscalerError::Predictor(format!(
                "model directory {} does not exist",
                model_path.display()
            )));
        }
        let program = program.into();
        info!(program = %program, model = %model_path.display(), "Using command landmark predictor");
        Ok(Self {
            program,
            model_path,
            args,
        })
    }
}

impl LandmarkPredictor for CommandPredictor {
    fn predict(&self, request: &PredictionRequest<'_>) -> CoreResult<LandmarkSet> {
        let scratch = tempfile::Builder::new()
            .prefix("mesoscaler-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| MesoscalerError::io(std::env::temp_dir(), e))?;
        request
            .image
            .save_with_format(scratch.path(), image::ImageFormat::Png)
            .map_err(|e| MesoscalerError::Predictor(format!("failed to stage image: {}", e)))?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--model")
            .arg(&self.model_path)
            .arg("--image")
            .arg(scratch.path())
            .output()
            .map_err(|e| MesoscalerError::Predictor(format!("failed to run '{}': {}", self.program, e)))?;

        if !output.status.success() {
            return Err(MesoscalerError::Predictor(format!(
                "'{}' exited with {} for {}: {}",
                self.program,
                output.status,
                request.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let payload: PredictionPayload = serde_json::from_slice(&output.stdout)
            .map_err(|e| MesoscalerError::Predictor(format!("unparseable predictor output: {}", e)))?;
        let set = LandmarkSet::from_records(CoordinateSpace::working(), &payload.into_records())?;
        debug!(image = %request.key, landmarks = set.len(), "Predicted landmarks");
        Ok(set)
    }

    fn predictor_name(&self) -> &str {
        "command"
    }
}
