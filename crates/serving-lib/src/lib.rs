//! Prediction serving core for dairy herd analytics
//!
//! This crate provides the core functionality for:
//! - Feature encoding and scaling of sensor readings
//! - Tree ensemble and ONNX inference with confidence scoring
//! - Rule-based somatic cell count classification
//! - Single and batch prediction orchestration
//! - Model health checks and observability

pub mod artifact;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;

#[cfg(test)]
pub(crate) mod testing;

pub use artifact::{ArtifactPaths, LoadState, LoadedModel, ModelArtifact, ModelRegistry};
pub use config::{BatchMode, ModelConfig, ServingConfig};
pub use error::{ArtifactError, PredictionError, ServingResult, ValidationError};
pub use health::{HealthChecks, HealthReport, HealthStatus, ModelHealthReporter, ModelInfo};
pub use models::*;
pub use observability::{ServingMetrics, StructuredLogger};
pub use predictor::{PredictionService, SampleTestReport};
