//! Single-prediction commands

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use tabled::Tabled;

use crate::client::{ApiClient, MastitisPrediction, SccPrediction, YieldPrediction};
use crate::output::{
    color_class, color_confidence, format_feature, format_ms, print_info, print_json,
    print_success, print_table, OutputFormat,
};

/// Row for input feature tables
#[derive(Tabled)]
pub struct FeatureRow {
    #[tabled(rename = "Feature")]
    pub name: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

pub fn feature_rows(features: &Map<String, Value>) -> Vec<FeatureRow> {
    features
        .iter()
        .map(|(name, value)| FeatureRow {
            name: name.clone(),
            value: format_feature(value),
        })
        .collect()
}

fn require_object(input: &Value) -> Result<()> {
    if !input.is_object() {
        bail!("Prediction input must be a JSON object");
    }
    Ok(())
}

/// Predict milk yield for one cow
pub async fn predict_yield(client: &ApiClient, input: Value, format: OutputFormat) -> Result<()> {
    require_object(&input)?;
    let prediction: YieldPrediction = client.post("ai/milk-yield/predict", &input).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Predicted milk yield: {:.2} L (confidence {})",
                prediction.predicted_milk_yield,
                color_confidence(prediction.confidence)
            ));
            print_table(&feature_rows(&prediction.input_features));
            print_info(&format!(
                "cow {} | model {} | {} | id {}",
                prediction.cow_id.as_deref().unwrap_or("-"),
                prediction.model_version,
                format_ms(prediction.processing_time_ms),
                prediction.prediction_id
            ));
        }
    }

    Ok(())
}

/// Predict mastitis risk from milk measurements
pub async fn predict_mastitis(client: &ApiClient, input: Value, format: OutputFormat) -> Result<()> {
    require_object(&input)?;
    let prediction: MastitisPrediction = client.post("ai/mastitis/predict", &input).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Mastitis class {}: {} (confidence {})",
                prediction.prediction_class,
                color_class(prediction.prediction_class, &prediction.prediction_class_label),
                color_confidence(prediction.confidence)
            ));
            print_table(&feature_rows(&prediction.input_features));
            print_info(&format!(
                "cow {} | model {} | {} | id {}",
                prediction.cow_id.as_deref().unwrap_or("-"),
                prediction.model_version,
                format_ms(prediction.processing_time_ms),
                prediction.prediction_id
            ));
        }
    }

    Ok(())
}

/// Classify a somatic cell count against the rule table
pub async fn predict_scc(
    client: &ApiClient,
    somatic_cell_count: f64,
    cow_id: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut body = json!({ "somatic_cell_count": somatic_cell_count });
    if let Some(cow_id) = cow_id {
        body["cow_id"] = Value::String(cow_id);
    }

    let prediction: SccPrediction = client.post("ai/mastitis/scc/predict", &body).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            print_success(&format!(
                "SCC class {}: {}",
                prediction.prediction_class,
                color_class(prediction.prediction_class, &prediction.prediction_class_label)
            ));
            println!("  {}", prediction.description);
            println!("  Recommendation: {}", prediction.recommendation);
            print_table(&feature_rows(&prediction.classification_criteria));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_rows_keep_labels() {
        let features: Map<String, Value> =
            serde_json::from_str(r#"{"착유횟수": 2.0, "전도율": 7.5}"#).unwrap();
        let rows = feature_rows(&features);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.name == "착유횟수" && r.value == "2"));
        assert!(rows.iter().any(|r| r.name == "전도율" && r.value == "7.5"));
    }

    #[test]
    fn test_require_object() {
        assert!(require_object(&json!({"cow_id": "a"})).is_ok());
        assert!(require_object(&json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn test_predict_scc_sends_cow_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ai/mastitis/scc/predict")
            .match_body(mockito::Matcher::Json(
                json!({"somatic_cell_count": 150.0, "cow_id": "cow-3"}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"prediction_id": "p-1", "cow_id": "cow-3",
                    "prediction_method": "somatic_cell_count", "prediction_class": 1,
                    "prediction_class_label": "주의", "confidence": 95.0,
                    "description": "d", "recommendation": "r",
                    "input_features": {"체세포수": 150.0, "단위": "개/ml"},
                    "classification_criteria": {"정상": "≤ 100개/ml"},
                    "prediction_time": "2026-03-01T06:00:00Z", "processing_time_ms": 0.01}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        predict_scc(&client, 150.0, Some("cow-3".to_string()), OutputFormat::Json)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
