//! Feature encoding for model inference
//!
//! Turns typed requests into the fixed-order vectors the scaler and
//! estimator were fitted with. Missing fields are rejected, never defaulted.

use crate::error::ValidationError;
use crate::models::{
    BatchInput, FeatureVector, MastitisRequest, MilkYieldRequest, ModelKind, SccRequest,
};
use chrono::NaiveDate;
use serde_json::Value;

/// Format accepted for `prediction_date`
pub const PREDICTION_DATE_FORMAT: &str = "%Y-%m-%d";

/// A request that can be encoded into a feature vector
pub trait FeatureSource {
    /// Model family this request is encoded for
    const KIND: ModelKind;

    /// Subject the request is about, echoed in results and failures
    fn subject_id(&self) -> Option<&str>;

    /// Encode into the model's feature order
    fn encode(&self) -> Result<FeatureVector, ValidationError>;
}

fn require<T: Copy>(value: Option<T>, field: &'static str) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField { field })
}

fn bounded(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    expected: &'static str,
) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::InvalidFormat {
            field,
            reason: "must be a finite number".to_string(),
        });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            expected,
        });
    }
    Ok(value)
}

/// Bounded and integral; `2.0` is accepted, `2.5` is not
fn whole(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    expected: &'static str,
) -> Result<f64, ValidationError> {
    let value = bounded(field, value, min, max, expected)?;
    if value.fract() != 0.0 {
        return Err(ValidationError::InvalidFormat {
            field,
            reason: format!("must be a whole number, got {}", value),
        });
    }
    Ok(value)
}

fn non_negative(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    bounded(field, value, 0.0, f64::MAX, ">= 0")
}

fn validate_date(value: Option<&str>) -> Result<(), ValidationError> {
    let Some(raw) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    NaiveDate::parse_from_str(raw, PREDICTION_DATE_FORMAT)
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidFormat {
            field: "prediction_date",
            reason: format!("expected YYYY-MM-DD, got {:?}", raw),
        })
}

impl FeatureSource for MilkYieldRequest {
    const KIND: ModelKind = ModelKind::Yield;

    fn subject_id(&self) -> Option<&str> {
        self.cow_id.as_deref()
    }

    fn encode(&self) -> Result<FeatureVector, ValidationError> {
        let frequency = require(self.milking_frequency, "milking_frequency")?;
        let conductivity = require(self.conductivity, "conductivity")?;
        let temperature = require(self.temperature, "temperature")?;
        let fat = require(self.fat_percentage, "fat_percentage")?;
        let protein = require(self.protein_percentage, "protein_percentage")?;
        let concentrate = require(self.concentrate_intake, "concentrate_intake")?;
        let month = require(self.milking_month, "milking_month")?;
        let day = require(self.milking_day_of_week, "milking_day_of_week")?;

        let values = vec![
            whole("milking_frequency", frequency, 1.0, 4.0, "1..=4")?,
            non_negative("conductivity", conductivity)?,
            bounded("temperature", temperature, -10.0, 50.0, "-10..=50")?,
            bounded("fat_percentage", fat, 0.0, 10.0, "0..=10")?,
            bounded("protein_percentage", protein, 0.0, 10.0, "0..=10")?,
            non_negative("concentrate_intake", concentrate)?,
            whole("milking_month", month, 1.0, 12.0, "1..=12")?,
            whole("milking_day_of_week", day, 0.0, 6.0, "0..=6")?,
        ];
        validate_date(self.prediction_date.as_deref())?;

        Ok(FeatureVector::new(Self::KIND, values))
    }
}

impl FeatureSource for MastitisRequest {
    const KIND: ModelKind = ModelKind::Mastitis;

    fn subject_id(&self) -> Option<&str> {
        self.cow_id.as_deref()
    }

    fn encode(&self) -> Result<FeatureVector, ValidationError> {
        let milk_yield = require(self.milk_yield, "milk_yield")?;
        let conductivity = require(self.conductivity, "conductivity")?;
        let fat = require(self.fat_percentage, "fat_percentage")?;
        let protein = require(self.protein_percentage, "protein_percentage")?;
        let lactation = require(self.lactation_number, "lactation_number")?;

        let values = vec![
            non_negative("milk_yield", milk_yield)?,
            non_negative("conductivity", conductivity)?,
            bounded("fat_percentage", fat, 0.0, 10.0, "0..=10")?,
            bounded("protein_percentage", protein, 0.0, 10.0, "0..=10")?,
            whole("lactation_number", lactation, 1.0, f64::MAX, ">= 1")?,
        ];
        validate_date(self.prediction_date.as_deref())?;

        Ok(FeatureVector::new(Self::KIND, values))
    }
}

impl FeatureSource for SccRequest {
    const KIND: ModelKind = ModelKind::Scc;

    fn subject_id(&self) -> Option<&str> {
        self.cow_id.as_deref()
    }

    fn encode(&self) -> Result<FeatureVector, ValidationError> {
        let count = require(self.somatic_cell_count, "somatic_cell_count")?;
        let values = vec![non_negative("somatic_cell_count", count)?];
        validate_date(self.prediction_date.as_deref())?;
        Ok(FeatureVector::new(Self::KIND, values))
    }
}

const TEXT_FIELDS: [&str; 3] = ["cow_id", "prediction_date", "notes"];

/// Explain why a batch entry could not be decoded, naming the first
/// offending field where one can be identified
pub fn malformed_entry(kind: ModelKind, raw: &Value, reason: &str) -> ValidationError {
    let Some(entry) = raw.as_object() else {
        return ValidationError::InvalidFormat {
            field: "predictions",
            reason: "each entry must be a JSON object".to_string(),
        };
    };

    let present = |name: &str| entry.get(name).filter(|v| !v.is_null());

    let numeric = kind
        .fields()
        .iter()
        .map(|f| f.name)
        .find(|name| present(*name).is_some_and(|v| !v.is_number()));
    if let Some(field) = numeric {
        return ValidationError::InvalidFormat {
            field,
            reason: "must be a number".to_string(),
        };
    }

    let text = TEXT_FIELDS
        .into_iter()
        .find(|name| present(*name).is_some_and(|v| !v.is_string()));
    if let Some(field) = text {
        return ValidationError::InvalidFormat {
            field,
            reason: "must be a string".to_string(),
        };
    }

    ValidationError::InvalidFormat {
        field: "predictions",
        reason: reason.to_string(),
    }
}

impl<T: FeatureSource> BatchInput<T> {
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            BatchInput::Parsed(request) => request.subject_id(),
            BatchInput::Malformed { cow_id, .. } => cow_id.as_deref(),
        }
    }
}

impl MilkYieldRequest {
    /// Canned input used by the model health round-trip
    pub fn health_sample() -> Self {
        Self {
            cow_id: Some("health_check".to_string()),
            milking_frequency: Some(2.0),
            conductivity: Some(7.5),
            temperature: Some(38.5),
            fat_percentage: Some(3.8),
            protein_percentage: Some(3.2),
            concentrate_intake: Some(3.5),
            milking_month: Some(6.0),
            milking_day_of_week: Some(1.0),
            ..Default::default()
        }
    }

    /// Canned input used by the sample test endpoint
    pub fn test_sample() -> Self {
        Self {
            cow_id: Some("test_cow".to_string()),
            conductivity: Some(7.7),
            ..Self::health_sample()
        }
    }
}

impl MastitisRequest {
    /// Canned input used by the model health round-trip
    pub fn health_sample() -> Self {
        Self {
            cow_id: Some("health_check".to_string()),
            milk_yield: Some(25.0),
            conductivity: Some(6.0),
            fat_percentage: Some(3.8),
            protein_percentage: Some(3.2),
            lactation_number: Some(2.0),
            ..Default::default()
        }
    }
}
