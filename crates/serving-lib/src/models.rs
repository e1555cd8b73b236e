//! Core data models for the prediction service

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Model families served by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Milk yield regression (8 features)
    Yield,
    /// Mastitis risk classification (5 features)
    Mastitis,
    /// Somatic cell count thresholds, no learned model
    Scc,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Yield => "yield",
            ModelKind::Mastitis => "mastitis",
            ModelKind::Scc => "scc",
        }
    }

    /// Ordered feature layout the scaler and estimator were fitted with
    pub fn fields(&self) -> &'static [FeatureField] {
        match self {
            ModelKind::Yield => &YIELD_FIELDS,
            ModelKind::Mastitis => &MASTITIS_FIELDS,
            ModelKind::Scc => &SCC_FIELDS,
        }
    }

    pub fn arity(&self) -> usize {
        self.fields().len()
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yield" | "milk_yield" | "milk-yield" => Ok(ModelKind::Yield),
            "mastitis" => Ok(ModelKind::Mastitis),
            "scc" | "somatic_cell_count" => Ok(ModelKind::Scc),
            other => Err(format!("unknown model kind: {}", other)),
        }
    }
}

/// One named slot of a feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureField {
    /// Request field name
    pub name: &'static str,
    /// Human-readable label echoed back in `input_features`
    pub label: &'static str,
}

const fn field(name: &'static str, label: &'static str) -> FeatureField {
    FeatureField { name, label }
}

pub const YIELD_FIELDS: [FeatureField; 8] = [
    field("milking_frequency", "착유횟수"),
    field("conductivity", "전도율"),
    field("temperature", "온도"),
    field("fat_percentage", "유지방비율"),
    field("protein_percentage", "유단백비율"),
    field("concentrate_intake", "농후사료섭취량"),
    field("milking_month", "착유기측정월"),
    field("milking_day_of_week", "착유기측정요일"),
];

pub const MASTITIS_FIELDS: [FeatureField; 5] = [
    field("milk_yield", "착유량"),
    field("conductivity", "전도율"),
    field("fat_percentage", "유지방비율"),
    field("protein_percentage", "유단백비율"),
    field("lactation_number", "산차수"),
];

pub const SCC_FIELDS: [FeatureField; 1] = [field("somatic_cell_count", "체세포수")];

/// Ordered numeric model input
///
/// Serializes as a label -> value map in feature order so responses can echo
/// the resolved input.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    kind: ModelKind,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Callers must pass values in `kind.fields()` order
    pub(crate) fn new(kind: ModelKind, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), kind.arity());
        Self { kind, values }
    }

    /// Same layout, new values (used by the scaler)
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        Self {
            kind: self.kind,
            values,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.kind
            .fields()
            .iter()
            .position(|f| f.name == name)
            .and_then(|idx| self.values.get(idx).copied())
    }

    /// (label, value) pairs in model order
    pub fn labeled(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.kind
            .fields()
            .iter()
            .zip(self.values.iter())
            .map(|(f, v)| (f.label, *v))
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (label, value) in self.labeled() {
            map.serialize_entry(label, &value)?;
        }
        map.end()
    }
}

/// Milk yield prediction request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MilkYieldRequest {
    pub cow_id: Option<String>,
    /// Whole number of milkings per day; accepted as any JSON number
    pub milking_frequency: Option<f64>,
    pub conductivity: Option<f64>,
    pub temperature: Option<f64>,
    pub fat_percentage: Option<f64>,
    pub protein_percentage: Option<f64>,
    pub concentrate_intake: Option<f64>,
    pub milking_month: Option<f64>,
    /// 0 = Monday .. 6 = Sunday
    pub milking_day_of_week: Option<f64>,
    /// YYYY-MM-DD
    pub prediction_date: Option<String>,
    pub notes: Option<String>,
}

/// Feature-based mastitis prediction request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MastitisRequest {
    pub cow_id: Option<String>,
    pub milk_yield: Option<f64>,
    pub conductivity: Option<f64>,
    pub fat_percentage: Option<f64>,
    pub protein_percentage: Option<f64>,
    pub lactation_number: Option<f64>,
    pub prediction_date: Option<String>,
    pub notes: Option<String>,
}

/// Somatic cell count based mastitis request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SccRequest {
    pub cow_id: Option<String>,
    /// Cells per ml
    pub somatic_cell_count: Option<f64>,
    pub prediction_date: Option<String>,
    pub notes: Option<String>,
}

/// One batch entry as received
///
/// Entries are decoded one at a time so a malformed entry fails on its own
/// instead of rejecting the whole batch body.
#[derive(Debug, Clone)]
pub enum BatchInput<T> {
    Parsed(T),
    Malformed {
        cow_id: Option<String>,
        raw: serde_json::Value,
        reason: String,
    },
}

impl<T> From<T> for BatchInput<T> {
    fn from(request: T) -> Self {
        BatchInput::Parsed(request)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for BatchInput<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        match T::deserialize(&raw) {
            Ok(request) => Ok(BatchInput::Parsed(request)),
            Err(e) => Ok(BatchInput::Malformed {
                cow_id: raw.get("cow_id").and_then(|v| v.as_str()).map(str::to_string),
                reason: e.to_string(),
                raw,
            }),
        }
    }
}

/// Ordered batch of independent requests
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct BatchRequest<T> {
    pub predictions: Vec<BatchInput<T>>,
    #[serde(default)]
    pub batch_name: Option<String>,
}

impl<T> BatchRequest<T> {
    pub fn new(predictions: Vec<T>) -> Self {
        Self {
            predictions: predictions.into_iter().map(BatchInput::Parsed).collect(),
            batch_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.batch_name = Some(name.into());
        self
    }
}

/// Results that carry their own measured processing time
pub trait Timed {
    fn processing_time_ms(&self) -> f64;
}

/// Milk yield prediction result
#[derive(Debug, Clone, Serialize)]
pub struct YieldPrediction {
    pub prediction_id: String,
    pub cow_id: Option<String>,
    /// Liters, two decimals
    pub predicted_milk_yield: f64,
    /// 0-100, one decimal
    pub confidence: f64,
    #[serde(skip)]
    pub confidence_raw: f64,
    pub input_features: FeatureVector,
    pub model_version: String,
    pub prediction_time: DateTime<Utc>,
    pub processing_time_ms: f64,
}

/// Feature-based mastitis prediction result
#[derive(Debug, Clone, Serialize)]
pub struct MastitisPrediction {
    pub prediction_id: String,
    pub cow_id: Option<String>,
    pub prediction_class: u8,
    pub prediction_class_label: String,
    pub confidence: f64,
    #[serde(skip)]
    pub confidence_raw: f64,
    pub input_features: FeatureVector,
    pub model_version: String,
    pub prediction_time: DateTime<Utc>,
    pub processing_time_ms: f64,
}

/// Echo of the SCC input with its unit
#[derive(Debug, Clone, Serialize)]
pub struct SccInputFeatures {
    #[serde(rename = "체세포수")]
    pub somatic_cell_count: f64,
    #[serde(rename = "단위")]
    pub unit: &'static str,
}

/// Rule-based mastitis prediction result
#[derive(Debug, Clone, Serialize)]
pub struct SccPrediction {
    pub prediction_id: String,
    pub cow_id: Option<String>,
    pub prediction_method: &'static str,
    pub prediction_class: u8,
    pub prediction_class_label: String,
    pub confidence: f64,
    pub description: String,
    pub recommendation: String,
    pub input_features: SccInputFeatures,
    pub classification_criteria: crate::predictor::CriteriaSummary,
    pub prediction_time: DateTime<Utc>,
    pub processing_time_ms: f64,
}

impl Timed for YieldPrediction {
    fn processing_time_ms(&self) -> f64 {
        self.processing_time_ms
    }
}

impl Timed for MastitisPrediction {
    fn processing_time_ms(&self) -> f64 {
        self.processing_time_ms
    }
}

impl Timed for SccPrediction {
    fn processing_time_ms(&self) -> f64 {
        self.processing_time_ms
    }
}

/// A batch entry that could not be predicted
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub cow_id: Option<String>,
    pub error: bool,
    pub error_code: &'static str,
    pub error_message: String,
    pub processing_time_ms: f64,
}

impl BatchFailure {
    pub fn new(cow_id: Option<String>, err: &crate::error::PredictionError, elapsed_ms: f64) -> Self {
        Self {
            cow_id,
            error: true,
            error_code: err.code(),
            error_message: err.to_string(),
            processing_time_ms: round_to(elapsed_ms, 2),
        }
    }
}

/// Outcome of one batch entry, in input position
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchItem<T> {
    Success(T),
    Failure(BatchFailure),
}

impl<T: Timed> BatchItem<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItem::Success(_))
    }

    pub fn processing_time_ms(&self) -> f64 {
        match self {
            BatchItem::Success(p) => p.processing_time_ms(),
            BatchItem::Failure(f) => f.processing_time_ms,
        }
    }

    pub fn failure(&self) -> Option<&BatchFailure> {
        match self {
            BatchItem::Success(_) => None,
            BatchItem::Failure(f) => Some(f),
        }
    }
}

/// Aggregate batch response
///
/// `total_processing_time_ms` is the sum of per-item processing times, not the
/// wall-clock span of the batch; the two diverge when items run in parallel.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    pub batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_method: Option<&'static str>,
    pub total_predictions: usize,
    pub successful_predictions: usize,
    pub failed_predictions: usize,
    pub predictions: Vec<BatchItem<T>>,
    pub batch_created_at: DateTime<Utc>,
    pub total_processing_time_ms: f64,
    pub average_processing_time_ms: f64,
}

/// Round half away from zero to `decimals` places
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
