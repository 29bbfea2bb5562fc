use super::{LandmarkPredictor, PredictionPayload, PredictionRequest};
use crate::error::{CoreResult, MesoscalerError};
use crate::geometry::CoordinateSpace;
use crate::landmarks::{LandmarkRecord, LandmarkSet};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Serves landmarks predicted ahead of time, looked up by image name.
#[derive(Debug, Clone, Default)]
pub struct TablePredictor {
    table: HashMap<String, Vec<LandmarkRecord>>,
}

impl TablePredictor {
    pub fn new(table: HashMap<String, Vec<LandmarkRecord>>) -> Self {
        Self { table }
    }

    /// JSON object mapping image names to landmark lists.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MesoscalerError::Predictor(format!("cannot read landmark table {}: {}", path.display(), e))
        })?;
        let raw: HashMap<String, PredictionPayload> = serde_json::from_str(&content)
            .map_err(|e| MesoscalerError::Predictor(format!("malformed landmark table: {}", e)))?;
        Ok(Self::new(
            raw.into_iter().map(|(name, payload)| (name, payload.into_records())).collect(),
        ))
    }
}

impl LandmarkPredictor for TablePredictor {
    fn predict(&self, request: &PredictionRequest<'_>) -> CoreResult<LandmarkSet> {
        let records = self
            .table
            .get(request.name)
            .or_else(|| self.table.get(request.key));
        match records {
            Some(records) => LandmarkSet::from_records(CoordinateSpace::working(), records),
            None => {
                warn!(image = %request.name, "No landmarks in table");
                Ok(LandmarkSet::empty(CoordinateSpace::working()))
            }
        }
    }

    fn predictor_name(&self) -> &str {
        "table"
    }
}
