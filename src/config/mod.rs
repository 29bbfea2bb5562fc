use crate::algorithms::{AlignmentEstimator, EstimatorConfig, ProjectorConfig, RoiProjector};
use crate::atlas::ReferenceAtlas;
use crate::data::DEFAULT_IMAGE_SUFFIXES;
use crate::logging::LoggingConfig;
use crate::packaging::ResultPackager;
use crate::pipeline::{
    AlignmentStage, CollectionStage, PackagingStage, Pipeline, PipelineBuilder, PredictionStage,
    RoiStage, RunLayout,
};
use crate::predictor::{LandmarkPredictor, PredictorConfig};
use crate::Result;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub alignment: EstimatorConfig,
    pub projection: ProjectorConfig,
    /// Only needed when the prediction stage runs.
    pub predictor: Option<PredictorConfig>,
    pub atlas: AtlasConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads for per-image work
    pub workers: usize,
    pub input_dir: Option<PathBuf>,
    /// Root of the artifact stores
    pub output_dir: PathBuf,
    pub image_suffixes: Vec<String>,
    /// Recompute artifacts that already exist
    pub overwrite: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            input_dir: None,
            output_dir: PathBuf::from("mesoscaler_output"),
            image_suffixes: DEFAULT_IMAGE_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            overwrite: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Directory with `atlas.json`; the built-in atlas when unset.
    pub path: Option<PathBuf>,
}

impl AtlasConfig {
    pub fn load(&self) -> Result<ReferenceAtlas> {
        match &self.path {
            Some(dir) => ReferenceAtlas::load_dir(dir),
            None => Ok(ReferenceAtlas::builtin().clone()),
        }
    }
}

/// Pipeline steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Collect,
    Predict,
    Align,
    Rois,
    Package,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Collect,
        StageKind::Predict,
        StageKind::Align,
        StageKind::Rois,
        StageKind::Package,
    ];
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.pipeline.workers == 0 {
            errors.push("pipeline.workers must be positive".to_string());
        }

        if self.pipeline.image_suffixes.is_empty() {
            errors.push("pipeline.image_suffixes must not be empty".to_string());
        }
        for suffix in &self.pipeline.image_suffixes {
            if !suffix.starts_with('.') {
                errors.push(format!("pipeline.image_suffixes entry '{}' must start with '.'", suffix));
            }
        }

        for section in [
            self.alignment.validate(),
            self.projection.validate(),
            self.predictor.as_ref().map_or(Ok(()), PredictorConfig::validate),
        ] {
            if let Err(mut section_errors) = section {
                errors.append(&mut section_errors);
            }
        }

        if let Err(e) = self.logging.validate() {
            errors.push(format!("logging: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Assemble the requested stages, building the configured predictor.
    pub fn build_pipeline(&self, stages: &[StageKind]) -> Result<Pipeline> {
        let predictor = if stages.contains(&StageKind::Predict) {
            let config = self
                .predictor
                .as_ref()
                .ok_or_else(|| anyhow!("no [predictor] section configured"))?;
            Some(config.build()?)
        } else {
            None
        };
        self.build_pipeline_with(stages, predictor)
    }

    /// Assemble the requested stages around an already constructed predictor.
    pub fn build_pipeline_with(
        &self,
        stages: &[StageKind],
        predictor: Option<Box<dyn LandmarkPredictor>>,
    ) -> Result<Pipeline> {
        let mut stages = stages.to_vec();
        stages.sort();
        stages.dedup();

        let needs_atlas = stages
            .iter()
            .any(|s| matches!(s, StageKind::Align | StageKind::Rois));
        let atlas = if needs_atlas {
            Some(Arc::new(self.atlas.load()?))
        } else {
            None
        };
        let mut predictor = predictor;

        let name = stages
            .iter()
            .map(|s| format!("{:?}", s).to_lowercase())
            .collect::<Vec<_>>()
            .join("+");
        let mut builder = PipelineBuilder::new(name)
            .workers(self.pipeline.workers)
            .overwrite(self.pipeline.overwrite);

        for stage in stages {
            builder = match stage {
                StageKind::Collect => {
                    let input_dir = self
                        .pipeline
                        .input_dir
                        .clone()
                        .ok_or_else(|| anyhow!("pipeline.input_dir is required for collection"))?;
                    builder.add_stage(CollectionStage::new(
                        input_dir,
                        self.pipeline.image_suffixes.clone(),
                    ))
                }
                StageKind::Predict => {
                    let predictor = predictor
                        .take()
                        .ok_or_else(|| anyhow!("prediction requested without a predictor"))?;
                    builder.add_stage(PredictionStage::new(predictor))
                }
                StageKind::Align => builder.add_stage(AlignmentStage::new(
                    atlas_ref(&atlas)?,
                    AlignmentEstimator::new(self.alignment.clone()),
                    RoiProjector::new(self.projection.clone()),
                )),
                StageKind::Rois => builder.add_stage(RoiStage::new(
                    atlas_ref(&atlas)?,
                    RoiProjector::new(self.projection.clone()),
                )),
                StageKind::Package => builder.add_stage(PackagingStage::new(ResultPackager::default())),
            };
        }

        Ok(builder.build(RunLayout::new(&self.pipeline.output_dir)))
    }
}

fn atlas_ref(atlas: &Option<Arc<ReferenceAtlas>>) -> Result<Arc<ReferenceAtlas>> {
    atlas.clone().ok_or_else(|| anyhow!("reference atlas was not loaded"))
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Json,
    Toml,
}

pub fn load_config_or_default(config_path: Option<&Path>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    eprintln!("Configuration validation errors:");
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                    eprintln!("Using default configuration instead.");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                eprintln!("Failed to load config from '{}': {:#}", path.display(), e);
                eprintln!("Using default configuration.");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
