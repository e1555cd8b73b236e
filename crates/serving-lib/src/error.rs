//! Error taxonomy for the serving core
//!
//! Request-level failures are reported through [`PredictionError`]; loading
//! model artifacts at startup reports [`ArtifactError`], which is folded into
//! `PredictionError::ModelUnavailable` once requests start arriving.

use std::path::PathBuf;
use thiserror::Error;

/// A request field failed validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("field {field} is out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("field {field} is invalid: {reason}")]
    InvalidFormat { field: &'static str, reason: String },
}

impl ValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField { field }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. } => field,
        }
    }
}

/// Errors surfaced by prediction operations
#[derive(Debug, Clone, Error)]
pub enum PredictionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl PredictionError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PredictionError::Validation(_) => "VALIDATION_ERROR",
            PredictionError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            PredictionError::Inference(_) => "INFERENCE_ERROR",
            PredictionError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    pub fn inference(message: impl Into<String>) -> Self {
        PredictionError::Inference(message.into())
    }
}

/// Errors raised while loading a model artifact from storage
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse artifact {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("invalid artifact structure: {0}")]
    Invalid(String),

    #[error("failed to load ONNX model: {0}")]
    Onnx(String),
}

pub type ServingResult<T> = Result<T, PredictionError>;
