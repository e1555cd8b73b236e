//! Observability infrastructure for the prediction service
//!
//! Provides:
//! - Prometheus metrics (prediction latency, outcomes, batch size, model availability)
//! - Structured JSON logging with tracing

use crate::models::ModelKind;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0];

/// Global metrics instance (registered once). `None` if registration failed.
static GLOBAL_METRICS: OnceLock<Option<ServingMetricsInner>> = OnceLock::new();

struct ServingMetricsInner {
    registry: Registry,
    prediction_latency_seconds: HistogramVec,
    predictions_total: IntCounterVec,
    prediction_failures_total: IntCounterVec,
    batch_size: HistogramVec,
    model_available: IntGaugeVec,
}

impl ServingMetricsInner {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let prediction_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dairy_ai_prediction_latency_seconds",
                "Time spent encoding, scaling and running inference",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["kind"],
        )?;
        let predictions_total = IntCounterVec::new(
            Opts::new("dairy_ai_predictions_total", "Successful predictions"),
            &["kind"],
        )?;
        let prediction_failures_total = IntCounterVec::new(
            Opts::new("dairy_ai_prediction_failures_total", "Failed predictions"),
            &["kind", "code"],
        )?;
        let batch_size = HistogramVec::new(
            HistogramOpts::new("dairy_ai_batch_size", "Number of items per batch request")
                .buckets(BATCH_SIZE_BUCKETS.to_vec()),
            &["kind"],
        )?;
        let model_available = IntGaugeVec::new(
            Opts::new("dairy_ai_model_available", "1 if the model artifact loaded"),
            &["kind", "version"],
        )?;

        registry.register(Box::new(prediction_latency_seconds.clone()))?;
        registry.register(Box::new(predictions_total.clone()))?;
        registry.register(Box::new(prediction_failures_total.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(model_available.clone()))?;

        Ok(Self {
            registry,
            prediction_latency_seconds,
            predictions_total,
            prediction_failures_total,
            batch_size,
            model_available,
        })
    }
}

/// Metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ServingMetrics {
    _private: (),
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServingMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match ServingMetricsInner::new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                error!(error = %e, "Failed to register metrics, continuing without them");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&ServingMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_prediction_latency(&self, kind: ModelKind, duration_secs: f64) {
        if let Some(m) = self.inner() {
            m.prediction_latency_seconds
                .with_label_values(&[kind.as_str()])
                .observe(duration_secs);
        }
    }

    pub fn inc_predictions(&self, kind: ModelKind) {
        if let Some(m) = self.inner() {
            m.predictions_total.with_label_values(&[kind.as_str()]).inc();
        }
    }

    pub fn inc_failures(&self, kind: ModelKind, code: &str) {
        if let Some(m) = self.inner() {
            m.prediction_failures_total
                .with_label_values(&[kind.as_str(), code])
                .inc();
        }
    }

    pub fn observe_batch_size(&self, kind: ModelKind, size: usize) {
        if let Some(m) = self.inner() {
            m.batch_size
                .with_label_values(&[kind.as_str()])
                .observe(size as f64);
        }
    }

    pub fn set_model_available(&self, kind: ModelKind, version: &str, available: bool) {
        if let Some(m) = self.inner() {
            m.model_available
                .with_label_values(&[kind.as_str(), version])
                .set(i64::from(available));
        }
    }

    /// Render every metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let Some(m) = self.inner() else {
            return Ok(String::new());
        };
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&m.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for service events
///
/// Provides consistent JSON-formatted logging for predictions,
/// batches, model loads and health checks.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Log a completed prediction
    pub fn log_prediction(
        &self,
        kind: ModelKind,
        prediction_id: &str,
        cow_id: Option<&str>,
        outcome: &str,
        confidence: f64,
        processing_time_ms: f64,
    ) {
        info!(
            event = "prediction_completed",
            service = %self.service,
            kind = %kind,
            prediction_id = %prediction_id,
            cow_id = ?cow_id,
            outcome = %outcome,
            confidence = confidence,
            processing_time_ms = processing_time_ms,
            "Prediction completed"
        );
    }

    /// Log a rejected or failed prediction
    pub fn log_prediction_failure(
        &self,
        kind: ModelKind,
        cow_id: Option<&str>,
        error_code: &str,
        error: &str,
    ) {
        warn!(
            event = "prediction_failed",
            service = %self.service,
            kind = %kind,
            cow_id = ?cow_id,
            error_code = %error_code,
            error = %error,
            "Prediction failed"
        );
    }

    /// Log a completed batch
    pub fn log_batch(
        &self,
        kind: ModelKind,
        batch_id: &str,
        total: usize,
        succeeded: usize,
        failed: usize,
        total_processing_time_ms: f64,
    ) {
        info!(
            event = "batch_completed",
            service = %self.service,
            kind = %kind,
            batch_id = %batch_id,
            total = total,
            succeeded = succeeded,
            failed = failed,
            total_processing_time_ms = total_processing_time_ms,
            "Batch prediction completed"
        );
    }

    /// Log the outcome of loading a model artifact
    pub fn log_model_load(&self, kind: ModelKind, version: &str, result: Result<&str, &str>) {
        match result {
            Ok(scaler) => info!(
                event = "model_loaded",
                service = %self.service,
                kind = %kind,
                model_version = %version,
                scaler = %scaler,
                "Model artifact loaded"
            ),
            Err(reason) => error!(
                event = "model_load_failed",
                service = %self.service,
                kind = %kind,
                model_version = %version,
                reason = %reason,
                "Model artifact failed to load, requests will be rejected"
            ),
        }
    }

    /// Log a model health check
    pub fn log_health(&self, kind: ModelKind, status: &str, response_time_ms: f64) {
        if status == "healthy" {
            info!(
                event = "model_health",
                service = %self.service,
                kind = %kind,
                status = %status,
                response_time_ms = response_time_ms,
                "Model health check passed"
            );
        } else {
            warn!(
                event = "model_health",
                service = %self.service,
                kind = %kind,
                status = %status,
                response_time_ms = response_time_ms,
                "Model health check degraded"
            );
        }
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, yield_available: bool, mastitis_available: bool) {
        info!(
            event = "service_started",
            service = %self.service,
            service_version = %version,
            yield_model_available = yield_available,
            mastitis_model_available = mastitis_available,
            "Prediction service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Prediction service shutting down"
        );
    }
}
