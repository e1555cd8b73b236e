//! HTTP API for predictions, model health and Prometheus metrics

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serving_lib::{
    BatchRequest, MastitisRequest, MilkYieldRequest, ModelHealthReporter, ModelKind,
    PredictionError, PredictionService, SccRequest, ServingMetrics, ValidationError,
};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PredictionService>,
    pub health: ModelHealthReporter,
    pub metrics: ServingMetrics,
}

impl AppState {
    pub fn new(service: Arc<PredictionService>, health: ModelHealthReporter, metrics: ServingMetrics) -> Self {
        Self {
            service,
            health,
            metrics,
        }
    }
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
struct ErrorBody {
    error_code: &'static str,
    error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<serde_json::Value>,
}

/// Prediction error rendered as an HTTP response
pub struct ApiError(PredictionError);

impl From<PredictionError> for ApiError {
    fn from(err: PredictionError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(PredictionError::Validation(ValidationError::InvalidFormat {
            field: "body",
            reason: rejection.body_text(),
        }))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PredictionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PredictionError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PredictionError::Inference(_) | PredictionError::Configuration(_) => {
                error!(error = %self.0, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let error_details = match &self.0 {
            PredictionError::Validation(v) => Some(json!({ "field": v.field() })),
            _ => None,
        };
        let body = ErrorBody {
            error_code: self.0.code(),
            error_message: self.0.to_string(),
            error_details,
        };
        (status, Json(body)).into_response()
    }
}

/// `Json` extractor whose rejections use the API error body
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

async fn predict_milk_yield(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<MilkYieldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.predict_yield(&request)?))
}

async fn batch_predict_milk_yield(
    State(state): State<Arc<AppState>>,
    ApiJson(batch): ApiJson<BatchRequest<MilkYieldRequest>>,
) -> impl IntoResponse {
    Json(state.service.predict_yield_batch(batch).await)
}

async fn test_milk_yield(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.sample_test())
}

async fn predict_mastitis(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<MastitisRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.predict_mastitis(&request)?))
}

async fn batch_predict_mastitis(
    State(state): State<Arc<AppState>>,
    ApiJson(batch): ApiJson<BatchRequest<MastitisRequest>>,
) -> impl IntoResponse {
    Json(state.service.predict_mastitis_batch(batch).await)
}

async fn predict_scc(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<SccRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.predict_scc(&request)?))
}

async fn batch_predict_scc(
    State(state): State<Arc<AppState>>,
    ApiJson(batch): ApiJson<BatchRequest<SccRequest>>,
) -> impl IntoResponse {
    Json(state.service.predict_scc_batch(batch).await)
}

async fn scc_criteria(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.criteria_listing())
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    model: Option<String>,
}

/// Model health report; 200 even when degraded
async fn model_health(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HealthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = |reason: String| {
        PredictionError::Validation(ValidationError::InvalidFormat {
            field: "model",
            reason,
        })
    };
    let kind = match query.model.as_deref() {
        None => ModelKind::Yield,
        Some(raw) => raw.parse::<ModelKind>().map_err(invalid)?,
    };
    let report = state
        .health
        .check(kind)
        .ok_or_else(|| invalid(format!("{} has no learned model", kind)))?;
    Ok(Json(report))
}

/// Liveness; the process is up even if models are not
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.service.registry();
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "models": {
            "yield": registry.yield_model().is_available(),
            "mastitis": registry.mastitis_model().is_available(),
        }
    }))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", prometheus::TEXT_FORMAT)],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ai/milk-yield/predict", post(predict_milk_yield))
        .route("/ai/milk-yield/batch-predict", post(batch_predict_milk_yield))
        .route("/ai/milk-yield/test", get(test_milk_yield))
        .route("/ai/mastitis/predict", post(predict_mastitis))
        .route("/ai/mastitis/batch-predict", post(batch_predict_mastitis))
        .route("/ai/mastitis/scc/predict", post(predict_scc))
        .route("/ai/mastitis/scc/batch-predict", post(batch_predict_scc))
        .route("/ai/mastitis/scc/criteria", get(scc_criteria))
        .route("/ai/model-health", get(model_health))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
