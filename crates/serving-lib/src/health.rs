//! Model health reporting
//!
//! Runs a synthetic round-trip through the encoder, scaler and estimator of a
//! model and reports each stage independently. Reporting never fails; every
//! problem shows up as a failed check and a `degraded` status.

use crate::artifact::{LoadState, LoadedModel, ModelRegistry};
use crate::error::ServingResult;
use crate::models::{round_to, MastitisRequest, MilkYieldRequest, ModelKind};
use crate::observability::StructuredLogger;
use crate::predictor::FeatureSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Overall model status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChecks {
    pub model_file_exists: bool,
    /// True when no scaler is configured
    pub scaler_file_exists: bool,
    pub model_load_success: bool,
    pub prediction_test_success: bool,
    /// The one-time startup load has run
    pub cache_loaded: bool,
}

impl HealthChecks {
    fn all_passed(&self) -> bool {
        self.model_file_exists
            && self.scaler_file_exists
            && self.model_load_success
            && self.prediction_test_success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub version: String,
    pub cached: bool,
    pub available: bool,
    /// `standard` or `identity`
    pub scaler: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: f64,
    pub checks: HealthChecks,
    pub model_info: ModelInfo,
}

/// Produces health reports for the models in a registry
#[derive(Clone)]
pub struct ModelHealthReporter {
    registry: Arc<ModelRegistry>,
    logger: StructuredLogger,
}

impl ModelHealthReporter {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            logger: StructuredLogger::new("dairy-ai"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Report on one model; `None` for kinds without a learned model
    pub fn check(&self, kind: ModelKind) -> Option<HealthReport> {
        let model = self.registry.get(kind)?;
        let report = check_model(model);
        self.logger
            .log_health(kind, report.status.as_str(), report.response_time_ms);
        Some(report)
    }
}

/// Synthetic prediction with the canned sample for `kind`
fn synthetic_prediction(model: &LoadedModel) -> ServingResult<()> {
    let artifact = model.artifact()?;
    let features = match model.kind {
        ModelKind::Mastitis => MastitisRequest::health_sample().encode()?,
        _ => MilkYieldRequest::health_sample().encode()?,
    };
    artifact.infer(&features).map(|_| ())
}

fn check_model(model: &LoadedModel) -> HealthReport {
    let start = Instant::now();

    let model_file_exists = model.paths.model_exists();
    let scaler_file_exists = model.paths.scaler_exists();
    let model_load_success = model.is_available();

    let prediction_test_success = model_load_success
        && match panic::catch_unwind(AssertUnwindSafe(|| synthetic_prediction(model))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(kind = %model.kind, error = %e, "Synthetic prediction failed");
                false
            }
            Err(_) => {
                warn!(kind = %model.kind, "Synthetic prediction panicked");
                false
            }
        };

    let checks = HealthChecks {
        model_file_exists,
        scaler_file_exists,
        model_load_success,
        prediction_test_success,
        cache_loaded: true,
    };

    let (status, message) = if checks.all_passed() {
        (HealthStatus::Healthy, "AI prediction service is operating normally")
    } else if !model_file_exists || !scaler_file_exists {
        (HealthStatus::Degraded, "Model artifact files are missing")
    } else {
        (
            HealthStatus::Degraded,
            "Model files exist but loading or the test prediction failed",
        )
    };

    let scaler = match &model.state {
        LoadState::Loaded(artifact) => artifact.capabilities().scaler,
        LoadState::Failed(_) if model.paths.scaler.is_none() => "identity",
        LoadState::Failed(_) => "standard",
    };

    HealthReport {
        status,
        message: message.to_string(),
        timestamp: Utc::now(),
        response_time_ms: round_to(start.elapsed().as_secs_f64() * 1000.0, 2),
        checks,
        model_info: ModelInfo {
            version: model.version.clone(),
            cached: true,
            available: model_load_success,
            scaler: scaler.to_string(),
        },
    }
}
