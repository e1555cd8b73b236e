//! Serving configuration
//!
//! Deserializable with defaults for every field so binaries can layer
//! environment overrides on top of an empty source.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How batch items are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// One item after another on a single blocking task
    #[default]
    Sequential,
    /// Each item on tokio's blocking pool, reassembled in input order
    Parallel,
}

impl std::str::FromStr for BatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(BatchMode::Sequential),
            "parallel" => Ok(BatchMode::Parallel),
            other => Err(format!("unknown batch mode: {}", other)),
        }
    }
}

/// Artifact pair and version of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Estimator file, relative to `model_dir` unless absolute
    pub file: String,
    /// Scaler file; identity scaling when absent
    #[serde(default)]
    pub scaler_file: Option<String>,
    pub version: String,
}

impl ModelConfig {
    pub fn milk_yield() -> Self {
        Self {
            file: "milk_yield_rf_v2.json".to_string(),
            scaler_file: Some("milk_yield_scaler_v2.json".to_string()),
            version: "v2.0.0".to_string(),
        }
    }

    pub fn mastitis() -> Self {
        Self {
            file: "mastitis_rf_v1.json".to_string(),
            scaler_file: Some("mastitis_scaler_v1.json".to_string()),
            version: "mastitis_rf_v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingConfig {
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "ModelConfig::milk_yield")]
    pub yield_model: ModelConfig,

    #[serde(default = "ModelConfig::mastitis")]
    pub mastitis_model: ModelConfig,

    #[serde(default)]
    pub batch_mode: BatchMode,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            yield_model: ModelConfig::milk_yield(),
            mastitis_model: ModelConfig::mastitis(),
            batch_mode: BatchMode::default(),
        }
    }
}

impl ServingConfig {
    /// Resolve a configured file name against `model_dir`
    pub fn resolve(&self, file: &str) -> PathBuf {
        let path = PathBuf::from(file);
        if path.is_absolute() {
            path
        } else {
            self.model_dir.join(path)
        }
    }
}
