//! Landmark prediction boundary.
//!
//! Detection itself happens outside this crate. Implementations receive a
//! 512x512 working image and return landmark names from the atlas vocabulary
//! with `x`, `y` in working-space pixels and a likelihood in `[0, 1]`.

pub mod command;
pub mod table;

pub use command::CommandPredictor;
pub use table::TablePredictor;

use crate::error::{CoreResult, MesoscalerError};
use crate::landmarks::{LandmarkRecord, LandmarkSet};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One image handed to a predictor.
pub struct PredictionRequest<'a> {
    pub key: &'a str,
    pub name: &'a str,
    pub image: &'a RgbImage,
}

/// Blocking landmark detector. Errors are fatal for the run.
pub trait LandmarkPredictor: Send + Sync {
    fn predict(&self, request: &PredictionRequest<'_>) -> CoreResult<LandmarkSet>;

    fn predictor_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorKind {
    Command,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub kind: PredictorKind,
    /// Model directory handed to the external command.
    pub model_path: Option<PathBuf>,
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Precomputed landmarks for the table predictor.
    pub table_path: Option<PathBuf>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            kind: PredictorKind::Command,
            model_path: None,
            command: None,
            args: Vec::new(),
            table_path: None,
        }
    }
}

impl PredictorConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        match self.kind {
            PredictorKind::Command => {
                if self.command.as_deref().map_or(true, str::is_empty) {
                    errors.push("predictor.command is required for the command predictor".to_string());
                }
                if self.model_path.is_none() {
                    errors.push("predictor.model_path is required for the command predictor".to_string());
                }
            }
            PredictorKind::Table => {
                if self.table_path.is_none() {
                    errors.push("predictor.table_path is required for the table predictor".to_string());
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Instantiate the configured predictor.
    pub fn build(&self) -> CoreResult<Box<dyn LandmarkPredictor>> {
        let missing = |field: &str| MesoscalerError::Predictor(format!("predictor.{} is not configured", field));
        match self.kind {
            PredictorKind::Command => {
                let program = self.command.clone().ok_or_else(|| missing("command"))?;
                let model = self.model_path.clone().ok_or_else(|| missing("model_path"))?;
                Ok(Box::new(CommandPredictor::new(program, model, self.args.clone())?))
            }
            PredictorKind::Table => {
                let table = self.table_path.as_ref().ok_or_else(|| missing("table_path"))?;
                Ok(Box::new(TablePredictor::from_file(table)?))
            }
        }
    }
}

/// Predictor output, either a bare list or wrapped in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum PredictionPayload {
    List(Vec<LandmarkRecord>),
    Wrapped { landmarks: Vec<LandmarkRecord> },
}

impl PredictionPayload {
    pub(crate) fn into_records(self) -> Vec<LandmarkRecord> {
        match self {
            PredictionPayload::List(records) => records,
            PredictionPayload::Wrapped { landmarks } => landmarks,
        }
    }
}
