//! Logging configuration
//!
//! Per-component log levels and output destinations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for everything without a component override
    pub global_level: String,

    /// Human-readable output on stderr
    pub console_output: bool,

    /// Daily rolling JSON logs are written here when set
    pub log_directory: Option<PathBuf>,

    /// Add source file and line to every event
    pub include_file_location: bool,

    /// Estimation, RANSAC and ROI projection
    pub algorithm_level: String,

    /// Stage orchestration and artifact stores
    pub pipeline_level: String,

    /// External landmark predictors
    pub predictor_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::with_levels("info", "info", "info", "info")
    }
}

impl LoggingConfig {
    fn with_levels(global: &str, algorithm: &str, pipeline: &str, predictor: &str) -> Self {
        Self {
            global_level: global.to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            algorithm_level: algorithm.to_string(),
            pipeline_level: pipeline.to_string(),
            predictor_level: predictor.to_string(),
        }
    }

    /// Per-image detail on the console plus a JSON trail next to the run
    pub fn development() -> Self {
        Self {
            log_directory: Some(PathBuf::from("mesoscaler_logs")),
            include_file_location: true,
            ..Self::with_levels("debug", "trace", "debug", "debug")
        }
    }

    /// Unattended batch runs: stage summaries only, everything in files
    pub fn production() -> Self {
        Self {
            console_output: false,
            log_directory: Some(PathBuf::from("mesoscaler_logs")),
            ..Self::with_levels("warn", "warn", "info", "info")
        }
    }

    fn levels(&self) -> [(&'static str, &str); 4] {
        [
            ("global_level", &self.global_level),
            ("algorithm_level", &self.algorithm_level),
            ("pipeline_level", &self.pipeline_level),
            ("predictor_level", &self.predictor_level),
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some((field, level)) = self
            .levels()
            .into_iter()
            .find(|(_, level)| !VALID_LEVELS.contains(level))
        {
            return Err(format!(
                "{} '{}' is not one of {:?}",
                field, level, VALID_LEVELS
            ));
        }

        let missing_parent = self
            .log_directory
            .as_deref()
            .and_then(|dir| dir.parent())
            .filter(|p| !p.as_os_str().is_empty() && !p.exists());
        if let Some(parent) = missing_parent {
            return Err(format!("log_directory parent {} does not exist", parent.display()));
        }

        Ok(())
    }

    /// Level applied to one of the crate's modules
    pub fn component_level(&self, module: &str) -> &str {
        match module {
            "algorithms" => &self.algorithm_level,
            "pipeline" => &self.pipeline_level,
            "predictor" => &self.predictor_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for the crate and its components.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        std::iter::once(format!("{}={}", krate, self.global_level))
            .chain(
                ["algorithms", "pipeline", "predictor"]
                    .iter()
                    .map(|m| format!("{}::{}={}", krate, m, self.component_level(m))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let dev = LoggingConfig::development();
        assert_eq!(dev.algorithm_level, "trace");
        assert!(dev.include_file_location);

        let prod = LoggingConfig::production();
        assert!(!prod.console_output);
        assert_eq!(prod.component_level("pipeline"), "info");
        assert_eq!(prod.component_level("geometry"), "warn");
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let mut logging = LoggingConfig::default();
        assert!(logging.validate().is_ok());
        logging.predictor_level = "loud".to_string();
        assert!(logging.validate().unwrap_err().starts_with("predictor_level"));
    }

    #[test]
    fn test_directives_cover_components() {
        assert_eq!(
            LoggingConfig::development().filter_directives(),
            "mesoscaler=debug,mesoscaler::algorithms=trace,mesoscaler::pipeline=debug,mesoscaler::predictor=debug"
        );
    }
}
