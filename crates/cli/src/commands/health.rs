//! Model health and sample prediction commands

use anyhow::Result;
use clap::ValueEnum;
use tabled::Tabled;

use crate::client::{ApiClient, HealthReport, SampleTestReport};
use crate::commands::predict::feature_rows;
use crate::output::{
    color_check, color_confidence, color_status, format_ms, print_error, print_info, print_json,
    print_success, print_table, print_warning, OutputFormat,
};

/// Models with a health endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum HealthModel {
    #[default]
    Yield,
    Mastitis,
}

impl HealthModel {
    fn as_str(&self) -> &'static str {
        match self {
            HealthModel::Yield => "yield",
            HealthModel::Mastitis => "mastitis",
        }
    }
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Check")]
    name: &'static str,
    #[tabled(rename = "Result")]
    result: String,
}

fn check_rows(report: &HealthReport) -> Vec<CheckRow> {
    let checks = &report.checks;
    vec![
        CheckRow { name: "model_file_exists", result: color_check(checks.model_file_exists) },
        CheckRow { name: "scaler_file_exists", result: color_check(checks.scaler_file_exists) },
        CheckRow { name: "model_load_success", result: color_check(checks.model_load_success) },
        CheckRow {
            name: "prediction_test_success",
            result: color_check(checks.prediction_test_success),
        },
        CheckRow { name: "cache_loaded", result: color_check(checks.cache_loaded) },
    ]
}

/// Show the health report for one model
pub async fn show_health(client: &ApiClient, model: HealthModel, format: OutputFormat) -> Result<()> {
    let path = format!("ai/model-health?model={}", model.as_str());
    let report: HealthReport = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!(
                "{} model: {} ({})",
                model.as_str(),
                color_status(&report.status),
                format_ms(report.response_time_ms)
            );
            print_table(&check_rows(&report));
            print_info(&format!(
                "version {} | scaler {} | available {}",
                report.model_info.version, report.model_info.scaler, report.model_info.available
            ));
            if report.status == "healthy" {
                print_success(&report.message);
            } else {
                print_warning(&report.message);
            }
        }
    }

    Ok(())
}

/// Run the built-in sample yield prediction
pub async fn run_sample(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: SampleTestReport = client.get("ai/milk-yield/test").await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if let Some(input) = &report.sample_input {
                print_table(&feature_rows(input));
            }
            match (report.predicted_milk_yield, &report.error) {
                (Some(yield_l), _) => print_success(&format!(
                    "Sample prediction {}: {:.2} L (confidence {})",
                    color_status(&report.test_status),
                    yield_l,
                    report
                        .confidence
                        .map(color_confidence)
                        .unwrap_or_else(|| "-".to_string())
                )),
                (None, Some(error)) => print_error(&format!(
                    "Sample prediction {}: {}",
                    color_status(&report.test_status),
                    error
                )),
                (None, None) => print_warning(&format!(
                    "Sample prediction {}",
                    color_status(&report.test_status)
                )),
            }
        }
    }

    Ok(())
}
