//! Prediction orchestration
//!
//! Runs single predictions (encode, scale, infer, score) and batches of them
//! with per-item failure isolation. Loaded artifacts are shared read-only, so
//! the predict path takes no locks.

use super::confidence::ConfidenceEstimator;
use super::features::{malformed_entry, FeatureSource};
use super::rules::{ClassificationCriteria, CriteriaListing};
use super::strategy::{ClassificationStrategy, ModelClassifier, RuleBasedClassifier};
use crate::artifact::ModelRegistry;
use crate::config::BatchMode;
use crate::error::{PredictionError, ServingResult};
use crate::models::{
    round_to, BatchFailure, BatchInput, BatchItem, BatchRequest, BatchResult, FeatureVector, MastitisPrediction,
    MastitisRequest, MilkYieldRequest, ModelKind, SccInputFeatures, SccPrediction, SccRequest,
    Timed, YieldPrediction,
};
use crate::observability::{ServingMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

/// Reported as `prediction_method` on SCC batches
pub const SCC_BATCH_METHOD: &str = "somatic_cell_count_batch";

type PredictFn<R, T> = fn(&PredictionService, &R) -> ServingResult<T>;

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Outcome of running the canned sample through the yield model
#[derive(Debug, Clone, Serialize)]
pub struct SampleTestReport {
    pub test_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_input: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_milk_yield: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub test_timestamp: DateTime<Utc>,
}

impl SampleTestReport {
    pub fn is_success(&self) -> bool {
        self.test_status == "success"
    }
}

/// Prediction service over a loaded model registry
pub struct PredictionService {
    registry: Arc<ModelRegistry>,
    scc: RuleBasedClassifier,
    confidence: ConfidenceEstimator,
    batch_mode: BatchMode,
    metrics: ServingMetrics,
    logger: StructuredLogger,
}

impl PredictionService {
    /// Build the service; fails only if the SCC criteria table is malformed
    pub fn new(registry: Arc<ModelRegistry>, batch_mode: BatchMode) -> ServingResult<Self> {
        let criteria = ClassificationCriteria::somatic_cell_count()?;
        let metrics = ServingMetrics::new();
        for model in [registry.yield_model(), registry.mastitis_model()] {
            metrics.set_model_available(model.kind, &model.version, model.is_available());
        }
        Ok(Self {
            registry,
            scc: RuleBasedClassifier::new(Arc::new(criteria)),
            confidence: ConfidenceEstimator::new(),
            batch_mode,
            metrics,
            logger: StructuredLogger::new("dairy-ai"),
        })
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn batch_mode(&self) -> BatchMode {
        self.batch_mode
    }

    pub fn criteria(&self) -> &ClassificationCriteria {
        self.scc.criteria()
    }

    pub fn criteria_listing(&self) -> CriteriaListing {
        self.scc.criteria().listing()
    }

    fn record_failure(&self, kind: ModelKind, cow_id: Option<&str>, err: &PredictionError) {
        self.metrics.inc_failures(kind, err.code());
        self.logger
            .log_prediction_failure(kind, cow_id, err.code(), &err.to_string());
    }

    fn record_success(&self, kind: ModelKind, elapsed_ms: f64) {
        self.metrics.inc_predictions(kind);
        self.metrics.observe_prediction_latency(kind, elapsed_ms / 1000.0);
    }

    /// Predict daily milk yield for one cow
    pub fn predict_yield(&self, request: &MilkYieldRequest) -> ServingResult<YieldPrediction> {
        let kind = ModelKind::Yield;
        let start = Instant::now();
        let outcome = (|| -> ServingResult<_> {
            let features = request.encode()?;
            let artifact = self.registry.yield_model().artifact()?;
            let output = artifact.infer(&features)?;
            let confidence = self.confidence.estimate(&output);
            Ok((features, output.point_estimate(), confidence, artifact.version().to_string()))
        })();
        let processing_time_ms = elapsed_ms(start);

        let (features, estimate, confidence, model_version) = outcome.map_err(|e| {
            self.record_failure(kind, request.subject_id(), &e);
            e
        })?;
        self.record_success(kind, processing_time_ms);

        let prediction = YieldPrediction {
            prediction_id: Uuid::new_v4().to_string(),
            cow_id: request.cow_id.clone(),
            predicted_milk_yield: round_to(estimate, 2),
            confidence: confidence.rounded(),
            confidence_raw: confidence.value(),
            input_features: features,
            model_version,
            prediction_time: Utc::now(),
            processing_time_ms: round_to(processing_time_ms, 2),
        };
        self.logger.log_prediction(
            kind,
            &prediction.prediction_id,
            request.subject_id(),
            &format!("{:.2}L", prediction.predicted_milk_yield),
            prediction.confidence,
            prediction.processing_time_ms,
        );
        Ok(prediction)
    }

    /// Classify mastitis risk from sensor features with the learned model
    pub fn predict_mastitis(&self, request: &MastitisRequest) -> ServingResult<MastitisPrediction> {
        let kind = ModelKind::Mastitis;
        let start = Instant::now();
        let outcome = (|| -> ServingResult<_> {
            let features = request.encode()?;
            let artifact = self.registry.mastitis_model().artifact()?;
            let classifier = ModelClassifier::mastitis(Arc::clone(artifact));
            let classification = classifier.classify(&features)?;
            Ok((features, classification, artifact.version().to_string()))
        })();
        let processing_time_ms = elapsed_ms(start);

        let (features, classification, model_version) = outcome.map_err(|e| {
            self.record_failure(kind, request.subject_id(), &e);
            e
        })?;
        self.record_success(kind, processing_time_ms);

        let prediction = MastitisPrediction {
            prediction_id: Uuid::new_v4().to_string(),
            cow_id: request.cow_id.clone(),
            prediction_class: classification.class,
            prediction_class_label: classification.label,
            confidence: classification.confidence.rounded(),
            confidence_raw: classification.confidence.value(),
            input_features: features,
            model_version,
            prediction_time: Utc::now(),
            processing_time_ms: round_to(processing_time_ms, 2),
        };
        self.logger.log_prediction(
            kind,
            &prediction.prediction_id,
            request.subject_id(),
            &prediction.prediction_class_label,
            prediction.confidence,
            prediction.processing_time_ms,
        );
        Ok(prediction)
    }

    /// Classify mastitis risk from somatic cell count thresholds
    pub fn predict_scc(&self, request: &SccRequest) -> ServingResult<SccPrediction> {
        let kind = ModelKind::Scc;
        let start = Instant::now();
        let outcome = (|| -> ServingResult<_> {
            let features = request.encode()?;
            let count = features.values()[0];
            let classification = self.scc.classify(&count)?;
            Ok((count, classification))
        })();
        let processing_time_ms = elapsed_ms(start);

        let (count, classification) = outcome.map_err(|e| {
            self.record_failure(kind, request.subject_id(), &e);
            e
        })?;
        self.record_success(kind, processing_time_ms);

        let prediction = SccPrediction {
            prediction_id: Uuid::new_v4().to_string(),
            cow_id: request.cow_id.clone(),
            prediction_method: self.scc.method(),
            prediction_class: classification.class,
            prediction_class_label: classification.label,
            confidence: classification.confidence.rounded(),
            description: classification.description.unwrap_or_default(),
            recommendation: classification.recommendation.unwrap_or_default(),
            input_features: SccInputFeatures {
                somatic_cell_count: count,
                unit: self.scc.criteria().unit(),
            },
            classification_criteria: self.scc.criteria().summary(),
            prediction_time: Utc::now(),
            processing_time_ms: round_to(processing_time_ms, 2),
        };
        self.logger.log_prediction(
            kind,
            &prediction.prediction_id,
            request.subject_id(),
            &prediction.prediction_class_label,
            prediction.confidence,
            prediction.processing_time_ms,
        );
        Ok(prediction)
    }

    pub async fn predict_yield_batch(
        self: &Arc<Self>,
        batch: BatchRequest<MilkYieldRequest>,
    ) -> BatchResult<YieldPrediction> {
        self.run_batch(ModelKind::Yield, batch, Self::predict_yield, None)
            .await
    }

    pub async fn predict_mastitis_batch(
        self: &Arc<Self>,
        batch: BatchRequest<MastitisRequest>,
    ) -> BatchResult<MastitisPrediction> {
        self.run_batch(ModelKind::Mastitis, batch, Self::predict_mastitis, None)
            .await
    }

    pub async fn predict_scc_batch(
        self: &Arc<Self>,
        batch: BatchRequest<SccRequest>,
    ) -> BatchResult<SccPrediction> {
        self.run_batch(ModelKind::Scc, batch, Self::predict_scc, Some(SCC_BATCH_METHOD))
            .await
    }

    async fn run_batch<R, T>(
        self: &Arc<Self>,
        kind: ModelKind,
        batch: BatchRequest<R>,
        predict: PredictFn<R, T>,
        prediction_method: Option<&'static str>,
    ) -> BatchResult<T>
    where
        R: FeatureSource + Send + 'static,
        T: Timed + Send + 'static,
    {
        let batch_id = Uuid::new_v4().to_string();
        let total = batch.predictions.len();
        self.metrics.observe_batch_size(kind, total);
        debug!(batch_id = %batch_id, kind = %kind, total, mode = ?self.batch_mode, "Starting batch");

        let predictions: Vec<BatchItem<T>> = match self.batch_mode {
            BatchMode::Sequential => {
                let cow_ids: Vec<Option<String>> = batch
                    .predictions
                    .iter()
                    .map(|item| item.subject_id().map(str::to_string))
                    .collect();
                let items = batch.predictions;
                let service = Arc::clone(self);
                let handle = tokio::task::spawn_blocking(move || {
                    items
                        .iter()
                        .map(|item| run_item(&service, item, predict))
                        .collect::<Vec<_>>()
                });
                match handle.await {
                    Ok(predictions) => predictions,
                    Err(e) => {
                        error!(batch_id = %batch_id, error = %e, "Batch task failed");
                        let err = PredictionError::inference(format!("batch task failed: {}", e));
                        cow_ids
                            .into_iter()
                            .map(|cow_id| BatchItem::Failure(BatchFailure::new(cow_id, &err, 0.0)))
                            .collect()
                    }
                }
            }
            BatchMode::Parallel => {
                let handles: Vec<_> = batch
                    .predictions
                    .into_iter()
                    .map(|item| {
                        let cow_id = item.subject_id().map(str::to_string);
                        let service = Arc::clone(self);
                        let handle =
                            tokio::task::spawn_blocking(move || run_item(&service, &item, predict));
                        (cow_id, handle)
                    })
                    .collect();

                let mut predictions = Vec::with_capacity(handles.len());
                for (cow_id, handle) in handles {
                    let item = match handle.await {
                        Ok(item) => item,
                        Err(e) => {
                            error!(batch_id = %batch_id, error = %e, "Batch item task failed");
                            let err = PredictionError::inference(format!("batch task failed: {}", e));
                            BatchItem::Failure(BatchFailure::new(cow_id, &err, 0.0))
                        }
                    };
                    predictions.push(item);
                }
                predictions
            }
        };

        let successful = predictions.iter().filter(|p| p.is_success()).count();
        let total_ms: f64 = predictions.iter().map(|p| p.processing_time_ms()).sum();
        let average_ms = if total == 0 { 0.0 } else { total_ms / total as f64 };

        let result = BatchResult {
            batch_id,
            batch_name: batch.batch_name,
            prediction_method,
            total_predictions: total,
            successful_predictions: successful,
            failed_predictions: total - successful,
            predictions,
            batch_created_at: Utc::now(),
            total_processing_time_ms: round_to(total_ms, 2),
            average_processing_time_ms: round_to(average_ms, 2),
        };
        self.logger.log_batch(
            kind,
            &result.batch_id,
            result.total_predictions,
            result.successful_predictions,
            result.failed_predictions,
            result.total_processing_time_ms,
        );
        result
    }

    /// Run the canned sample through the yield path; never fails
    pub fn sample_test(&self) -> SampleTestReport {
        let request = MilkYieldRequest::test_sample();
        match self.predict_yield(&request) {
            Ok(prediction) => SampleTestReport {
                test_status: "success",
                sample_input: Some(prediction.input_features),
                predicted_milk_yield: Some(prediction.predicted_milk_yield),
                confidence: Some(prediction.confidence),
                processing_time_ms: Some(prediction.processing_time_ms),
                error: None,
                test_timestamp: Utc::now(),
            },
            Err(e) => SampleTestReport {
                test_status: "failed",
                sample_input: None,
                predicted_milk_yield: None,
                confidence: None,
                processing_time_ms: None,
                error: Some(e.to_string()),
                test_timestamp: Utc::now(),
            },
        }
    }
}

/// Predict one batch entry; errors and panics become failure entries
fn run_item<R: FeatureSource, T>(
    service: &PredictionService,
    item: &BatchInput<R>,
    predict: PredictFn<R, T>,
) -> BatchItem<T> {
    let start = Instant::now();
    let request = match item {
        BatchInput::Parsed(request) => request,
        BatchInput::Malformed { cow_id, raw, reason } => {
            let err = PredictionError::from(malformed_entry(R::KIND, raw, reason));
            service.record_failure(R::KIND, cow_id.as_deref(), &err);
            return BatchItem::Failure(BatchFailure::new(cow_id.clone(), &err, elapsed_ms(start)));
        }
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| predict(service, request)))
        .unwrap_or_else(|_| Err(PredictionError::inference("prediction panicked")));
    match result {
        Ok(prediction) => BatchItem::Success(prediction),
        Err(e) => BatchItem::Failure(BatchFailure::new(
            request.subject_id().map(str::to_string),
            &e,
            elapsed_ms(start),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn service(mode: BatchMode) -> Arc<PredictionService> {
        Arc::new(PredictionService::new(Arc::new(testing::registry()), mode).unwrap())
    }

    #[test]
    fn test_predict_yield() {
        let service = service(BatchMode::Sequential);
        let prediction = service
            .predict_yield(&MilkYieldRequest::health_sample())
            .unwrap();

        assert_eq!(prediction.cow_id.as_deref(), Some("health_check"));
        assert!((prediction.predicted_milk_yield - 20.67).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&prediction.confidence));
        assert_eq!(prediction.model_version, "v2.0.0");
        assert_eq!(prediction.input_features.get("temperature"), Some(38.5));
        assert!(Uuid::parse_str(&prediction.prediction_id).is_ok());
    }

    #[test]
    fn test_validation_error_names_field() {
        let service = service(BatchMode::Sequential);
        let request = MilkYieldRequest {
            fat_percentage: None,
            ..MilkYieldRequest::health_sample()
        };
        match service.predict_yield(&request).unwrap_err() {
            PredictionError::Validation(v) => assert_eq!(v.field(), "fat_percentage"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unavailable_model_fails_fast() {
        let service = Arc::new(
            PredictionService::new(Arc::new(testing::unavailable_registry()), BatchMode::Sequential)
                .unwrap(),
        );
        let err = service
            .predict_yield(&MilkYieldRequest::health_sample())
            .unwrap_err();
        assert_eq!(err.code(), "MODEL_UNAVAILABLE");

        // SCC needs no model
        let request = SccRequest {
            somatic_cell_count: Some(90.0),
            ..Default::default()
        };
        assert_eq!(service.predict_scc(&request).unwrap().prediction_class, 0);
    }

    #[test]
    fn test_predict_mastitis() {
        let service = service(BatchMode::Sequential);
        let prediction = service
            .predict_mastitis(&MastitisRequest::health_sample())
            .unwrap();
        assert_eq!(prediction.prediction_class, 0);
        assert_eq!(prediction.prediction_class_label, "정상");
        assert_eq!(prediction.confidence, 70.0);
        assert_eq!(prediction.model_version, "mastitis_rf_v1");

        let inflamed = MastitisRequest {
            conductivity: Some(7.0),
            milk_yield: Some(30.0),
            ..MastitisRequest::health_sample()
        };
        let prediction = service.predict_mastitis(&inflamed).unwrap();
        assert_eq!(prediction.prediction_class, 2);
    }

    #[test]
    fn test_predict_scc() {
        let service = service(BatchMode::Sequential);
        let request = SccRequest {
            cow_id: Some("cow-7".to_string()),
            somatic_cell_count: Some(150.0),
            ..Default::default()
        };
        let prediction = service.predict_scc(&request).unwrap();
        assert_eq!(prediction.prediction_method, "somatic_cell_count");
        assert_eq!(prediction.prediction_class, 1);
        assert_eq!(prediction.prediction_class_label, "주의");
        assert_eq!(prediction.confidence, 95.0);
        assert_eq!(prediction.input_features.unit, "개/ml");

        let json = serde_json::to_value(&prediction).unwrap();
        assert_eq!(json["input_features"]["체세포수"], 150.0);
        assert_eq!(json["classification_criteria"]["정상"], "≤ 100개/ml");
    }

    #[tokio::test]
    async fn test_batch_with_one_failure() {
        for mode in [BatchMode::Sequential, BatchMode::Parallel] {
            let service = service(mode);
            let batch = BatchRequest::new(vec![
                MilkYieldRequest::health_sample(),
                MilkYieldRequest {
                    cow_id: Some("cow-2".to_string()),
                    conductivity: None,
                    ..MilkYieldRequest::health_sample()
                },
            ])
            .with_name("morning");
            let result = service.predict_yield_batch(batch).await;

            assert_eq!(result.total_predictions, 2);
            assert_eq!(result.successful_predictions, 1);
            assert_eq!(result.failed_predictions, 1);
            assert!(result.predictions[0].is_success());
            let failure = result.predictions[1].failure().unwrap();
            assert_eq!(failure.cow_id.as_deref(), Some("cow-2"));
            assert!(failure.error_message.contains("conductivity"));
            assert_eq!(failure.error_code, "VALIDATION_ERROR");
            assert_eq!(result.batch_name.as_deref(), Some("morning"));
        }
    }

    #[tokio::test]
    async fn test_malformed_entry_fails_alone() {
        for mode in [BatchMode::Sequential, BatchMode::Parallel] {
            let service = service(mode);
            let body = serde_json::json!({
                "predictions": [
                    {"cow_id": "cow-1", "milk_yield": 25.0, "conductivity": 6.0,
                     "fat_percentage": 3.8, "protein_percentage": 3.2, "lactation_number": 2},
                    {"cow_id": "cow-2", "milk_yield": 25.0, "conductivity": 6.0,
                     "fat_percentage": 3.8, "protein_percentage": 3.2, "lactation_number": "second"}
                ]
            });
            let batch: BatchRequest<MastitisRequest> = serde_json::from_value(body).unwrap();
            let result = service.predict_mastitis_batch(batch).await;

            assert_eq!(result.total_predictions, 2);
            assert_eq!(result.successful_predictions, 1);
            assert_eq!(result.failed_predictions, 1);
            assert!(result.predictions[0].is_success());
            let failure = result.predictions[1].failure().unwrap();
            assert_eq!(failure.cow_id.as_deref(), Some("cow-2"));
            assert_eq!(failure.error_code, "VALIDATION_ERROR");
            assert!(failure.error_message.contains("lactation_number"));
        }
    }

    #[tokio::test]
    async fn test_batch_preserves_order_in_parallel() {
        let service = service(BatchMode::Parallel);
        let predictions: Vec<SccRequest> = (0..20)
            .map(|i| SccRequest {
                cow_id: Some(format!("cow-{}", i)),
                somatic_cell_count: Some(if i % 5 == 4 { -1.0 } else { (i * 30) as f64 }),
                ..Default::default()
            })
            .collect();
        let result = service
            .predict_scc_batch(BatchRequest::new(predictions))
            .await;

        assert_eq!(result.total_predictions, 20);
        assert_eq!(
            result.successful_predictions + result.failed_predictions,
            result.predictions.len()
        );
        assert_eq!(result.failed_predictions, 4);
        assert_eq!(result.prediction_method, Some("somatic_cell_count_batch"));
        for (i, item) in result.predictions.iter().enumerate() {
            let cow_id = match item {
                BatchItem::Success(p) => p.cow_id.clone(),
                BatchItem::Failure(f) => f.cow_id.clone(),
            };
            assert_eq!(cow_id, Some(format!("cow-{}", i)));
        }
    }

    #[tokio::test]
    async fn test_batch_latency_is_sum_of_items() {
        let service = service(BatchMode::Sequential);
        let batch = BatchRequest::new(vec![
            MastitisRequest::health_sample(),
            MastitisRequest::default(),
            MastitisRequest::health_sample(),
        ]);
        let result = service.predict_mastitis_batch(batch).await;
        let sum: f64 = result.predictions.iter().map(|p| p.processing_time_ms()).sum();
        assert!((result.total_processing_time_ms - round_to(sum, 2)).abs() < 0.011);
        assert!(
            (result.average_processing_time_ms - round_to(sum / 3.0, 2)).abs() < 0.011
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let service = service(BatchMode::Parallel);
        let result = service.predict_yield_batch(BatchRequest::new(vec![])).await;
        assert_eq!(result.total_predictions, 0);
        assert_eq!(result.successful_predictions, 0);
        assert_eq!(result.failed_predictions, 0);
        assert_eq!(result.total_processing_time_ms, 0.0);
        assert_eq!(result.average_processing_time_ms, 0.0);
    }

    #[test]
    fn test_sample_test() {
        let report = service(BatchMode::Sequential).sample_test();
        assert!(report.is_success());
        assert!((report.predicted_milk_yield.unwrap() - 21.33).abs() < 1e-9);
        assert_eq!(
            report.sample_input.as_ref().unwrap().get("conductivity"),
            Some(7.7)
        );

        let unavailable = PredictionService::new(
            Arc::new(testing::unavailable_registry()),
            BatchMode::Sequential,
        )
        .unwrap();
        let report = unavailable.sample_test();
        assert_eq!(report.test_status, "failed");
        assert!(report.error.unwrap().contains("model unavailable"));
    }

    #[test]
    fn test_run_item_isolates_panics() {
        fn explode(_: &PredictionService, _: &SccRequest) -> ServingResult<SccPrediction> {
            panic!("boom")
        }
        let service = service(BatchMode::Sequential);
        let request = SccRequest {
            cow_id: Some("cow-9".to_string()),
            ..Default::default()
        };
        let item = run_item(&service, &BatchInput::Parsed(request), explode);
        let failure = item.failure().unwrap();
        assert_eq!(failure.error_code, "INFERENCE_ERROR");
        assert_eq!(failure.cow_id.as_deref(), Some("cow-9"));
    }
}
