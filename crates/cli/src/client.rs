//! API client for the Dairy AI prediction service

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Non-success response from the API
#[derive(Debug, thiserror::Error)]
#[error("API error ({status}) {code}: {message}")]
pub struct ApiFailure {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub field: Option<String>,
}

/// API client for the prediction service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::decode(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let failure = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => ApiFailure {
                    status: status.as_u16(),
                    code: err.error_code,
                    message: err.error_message,
                    field: err.error_details.and_then(|d| d.field),
                },
                Err(_) => ApiFailure {
                    status: status.as_u16(),
                    code: "UNKNOWN".to_string(),
                    message: body,
                    field: None,
                },
            };
            return Err(failure.into());
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YieldPrediction {
    pub prediction_id: String,
    pub cow_id: Option<String>,
    pub predicted_milk_yield: f64,
    pub confidence: f64,
    pub input_features: Map<String, Value>,
    pub model_version: String,
    pub prediction_time: DateTime<Utc>,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastitisPrediction {
    pub prediction_id: String,
    pub cow_id: Option<String>,
    pub prediction_class: u8,
    pub prediction_class_label: String,
    pub confidence: f64,
    pub input_features: Map<String, Value>,
    pub model_version: String,
    pub prediction_time: DateTime<Utc>,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SccPrediction {
    pub prediction_id: String,
    pub cow_id: Option<String>,
    pub prediction_method: String,
    pub prediction_class: u8,
    pub prediction_class_label: String,
    pub confidence: f64,
    pub description: String,
    pub recommendation: String,
    pub input_features: Map<String, Value>,
    pub classification_criteria: Map<String, Value>,
    pub prediction_time: DateTime<Utc>,
    pub processing_time_ms: f64,
}

/// One batch entry; either a prediction or a failure record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub cow_id: Option<String>,
    #[serde(default)]
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_milk_yield: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_class: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_class_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_method: Option<String>,
    pub total_predictions: usize,
    pub successful_predictions: usize,
    pub failed_predictions: usize,
    pub predictions: Vec<BatchEntry>,
    pub batch_created_at: DateTime<Utc>,
    pub total_processing_time_ms: f64,
    pub average_processing_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub model_file_exists: bool,
    pub scaler_file_exists: bool,
    pub model_load_success: bool,
    pub prediction_test_success: bool,
    pub cache_loaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub version: String,
    pub cached: bool,
    pub available: bool,
    pub scaler: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: f64,
    pub checks: HealthChecks,
    pub model_info: ModelInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionEntry {
    pub class: u8,
    pub range: String,
    pub description: String,
    pub color: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaListing {
    pub classification_method: String,
    pub unit: String,
    pub criteria: Map<String, Value>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

impl CriteriaListing {
    /// Criteria entries ordered by class; entries that fail to parse are skipped
    pub fn entries(&self) -> Vec<(String, CriterionEntry)> {
        let mut entries: Vec<(String, CriterionEntry)> = self
            .criteria
            .iter()
            .filter_map(|(name, value)| {
                serde_json::from_value(value.clone())
                    .ok()
                    .map(|entry| (name.clone(), entry))
            })
            .collect();
        entries.sort_by_key(|(_, entry)| entry.class);
        entries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleTestReport {
    pub test_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_input: Option<Map<String, Value>>,
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

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetails {
    pub field: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub error_message: String,
    pub error_details: Option<ErrorDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    const YIELD_BODY: &str = r#"{
        "prediction_id": "7d7f3c1e-2f7e-4a8e-9d55-0f0b8c1f1a11",
        "cow_id": "cow-1",
        "predicted_milk_yield": 20.67,
        "confidence": 97.7,
        "input_features": {"착유횟수": 2.0},
        "model_version": "v2.0.0",
        "prediction_time": "2026-03-01T06:00:00Z",
        "processing_time_ms": 0.42
    }"#;

    #[tokio::test]
    async fn test_post_decodes_prediction() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ai/milk-yield/predict")
            .match_body(Matcher::PartialJson(json!({"cow_id": "cow-1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(YIELD_BODY)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let prediction: YieldPrediction = client
            .post("ai/milk-yield/predict", &json!({"cow_id": "cow-1"}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(prediction.predicted_milk_yield, 20.67);
        assert_eq!(prediction.model_version, "v2.0.0");
        assert_eq!(prediction.cow_id.as_deref(), Some("cow-1"));
    }

    #[tokio::test]
    async fn test_error_body_becomes_api_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/ai/mastitis/predict")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error_code": "VALIDATION_ERROR",
                    "error_message": "missing field: conductivity",
                    "error_details": {"field": "conductivity"}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .post::<MastitisPrediction, _>("ai/mastitis/predict", &json!({}))
            .await
            .unwrap_err();

        let failure = err.downcast_ref::<ApiFailure>().unwrap();
        assert_eq!(failure.status, 422);
        assert_eq!(failure.code, "VALIDATION_ERROR");
        assert_eq!(failure.field.as_deref(), Some("conductivity"));
    }

    #[tokio::test]
    async fn test_plain_error_body_is_kept() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ai/mastitis/scc/criteria")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .get::<CriteriaListing>("ai/mastitis/scc/criteria")
            .await
            .unwrap_err();

        let failure = err.downcast_ref::<ApiFailure>().unwrap();
        assert_eq!(failure.code, "UNKNOWN");
        assert_eq!(failure.message, "bad gateway");
    }

    #[tokio::test]
    async fn test_health_query_and_batch_entries() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ai/model-health")
            .match_query(Matcher::UrlEncoded("model".into(), "mastitis".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status": "degraded", "message": "mastitis model unavailable",
                    "timestamp": "2026-03-01T06:00:00Z", "response_time_ms": 1.2,
                    "checks": {"model_file_exists": false, "scaler_file_exists": false,
                               "model_load_success": false, "prediction_test_success": false,
                               "cache_loaded": true},
                    "model_info": {"version": "mastitis_rf_v1", "cached": false,
                                   "available": false, "scaler": "standard"}}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/ai/mastitis/scc/batch-predict")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"batch_id": "b-1", "prediction_method": "somatic_cell_count_batch",
                    "total_predictions": 2, "successful_predictions": 1, "failed_predictions": 1,
                    "predictions": [
                        {"cow_id": "a", "prediction_class": 0, "prediction_class_label": "정상",
                         "confidence": 95.0, "processing_time_ms": 0.1},
                        {"cow_id": "b", "error": true, "error_code": "VALIDATION_ERROR",
                         "error_message": "somatic_cell_count must be >= 0",
                         "processing_time_ms": 0.05}
                    ],
                    "batch_created_at": "2026-03-01T06:00:00Z",
                    "total_processing_time_ms": 0.15, "average_processing_time_ms": 0.08}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let report: HealthReport = client.get("ai/model-health?model=mastitis").await.unwrap();
        assert_eq!(report.status, "degraded");
        assert!(report.checks.cache_loaded);
        assert!(!report.model_info.available);

        let batch: BatchResponse = client
            .post("ai/mastitis/scc/batch-predict", &json!({"predictions": []}))
            .await
            .unwrap();
        assert_eq!(batch.failed_predictions, 1);
        assert!(!batch.predictions[0].error);
        assert!(batch.predictions[1].error);
        assert!(batch.batch_name.is_none());
    }

    #[test]
    fn test_criteria_entries_sorted_by_class() {
        let listing: CriteriaListing = serde_json::from_value(json!({
            "classification_method": "somatic_cell_count",
            "unit": "개/ml",
            "criteria": {
                "정상": {"class": 0, "range": "≤ 100", "description": "a", "color": "green", "action": "x"},
                "주의": {"class": 1, "range": "101-300", "description": "b", "color": "yellow", "action": "y"},
                "염증_가능성": {"class": 2, "range": "> 300", "description": "c", "color": "red", "action": "z"},
                "broken": {"class": "high"}
            }
        }))
        .unwrap();

        let entries = listing.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, "정상");
        assert_eq!(entries[2].0, "염증_가능성");
        assert!(listing.notes.is_empty());
    }
}
