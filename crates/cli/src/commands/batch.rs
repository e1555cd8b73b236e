//! Batch prediction commands

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde_json::{json, Value};
use tabled::Tabled;

use crate::client::{ApiClient, BatchEntry, BatchResponse};
use crate::output::{
    color_class, color_confidence, format_ms, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// Which batch endpoint to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BatchKind {
    Yield,
    Mastitis,
    Scc,
}

impl BatchKind {
    fn path(&self) -> &'static str {
        match self {
            BatchKind::Yield => "ai/milk-yield/batch-predict",
            BatchKind::Mastitis => "ai/mastitis/batch-predict",
            BatchKind::Scc => "ai/mastitis/scc/batch-predict",
        }
    }
}

/// Row for batch result tables
#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Cow")]
    cow_id: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Time")]
    time: String,
}

/// Accepts `{"predictions": [...]}` or a bare array of requests
pub fn build_batch(input: Value, name: Option<String>) -> Result<Value> {
    let mut batch = match input {
        Value::Array(items) => json!({ "predictions": items }),
        Value::Object(map) if map.contains_key("predictions") => Value::Object(map),
        _ => bail!("Batch input must be an array or an object with a \"predictions\" array"),
    };
    if let Some(name) = name {
        batch["batch_name"] = Value::String(name);
    }
    Ok(batch)
}

fn describe(entry: &BatchEntry) -> String {
    if entry.error {
        let message = entry.error_message.as_deref().unwrap_or("failed");
        return format!("error: {}", message);
    }
    if let Some(yield_l) = entry.predicted_milk_yield {
        return format!("{:.2} L", yield_l);
    }
    match (entry.prediction_class, entry.prediction_class_label.as_deref()) {
        (Some(class), Some(label)) => color_class(class, label),
        _ => "-".to_string(),
    }
}

fn rows(result: &BatchResponse) -> Vec<BatchRow> {
    result
        .predictions
        .iter()
        .enumerate()
        .map(|(index, entry)| BatchRow {
            index,
            cow_id: entry.cow_id.clone().unwrap_or_else(|| "-".to_string()),
            result: describe(entry),
            confidence: entry
                .confidence
                .map(color_confidence)
                .unwrap_or_else(|| "-".to_string()),
            time: format_ms(entry.processing_time_ms),
        })
        .collect()
}

/// Submit a batch and show per-item results in input order
pub async fn run_batch(
    client: &ApiClient,
    kind: BatchKind,
    input: Value,
    name: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let batch = build_batch(input, name)?;
    let result: BatchResponse = client.post(kind.path(), &batch).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            print_table(&rows(&result));
            let summary = format!(
                "{}/{} succeeded | total {} | avg {}",
                result.successful_predictions,
                result.total_predictions,
                format_ms(result.total_processing_time_ms),
                format_ms(result.average_processing_time_ms)
            );
            if result.failed_predictions > 0 {
                print_warning(&summary);
            } else {
                print_success(&summary);
            }
        }
    }

    Ok(())
}
