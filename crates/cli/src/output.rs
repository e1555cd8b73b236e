//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T]) {
    if items.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a 0-100 confidence score
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.1}%", confidence)
}

/// Format a latency in milliseconds
pub fn format_ms(ms: f64) -> String {
    format!("{:.2}ms", ms)
}

/// Format a feature value; integral values lose their fraction
pub fn format_feature(value: &serde_json::Value) -> String {
    match value.as_f64() {
        Some(v) if v.fract() == 0.0 => format!("{}", v as i64),
        Some(v) => format!("{}", v),
        None => value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "success" | "ok" => status.green().to_string(),
        "degraded" => status.yellow().to_string(),
        "failed" | "error" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color a pass/fail check
pub fn color_check(passed: bool) -> String {
    if passed {
        "pass".green().to_string()
    } else {
        "fail".red().to_string()
    }
}

/// Color confidence based on value
pub fn color_confidence(confidence: f64) -> String {
    let formatted = format_confidence(confidence);
    if confidence >= 80.0 {
        formatted.green().to_string()
    } else if confidence >= 60.0 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Color a mastitis class label by severity (0 normal, 1 caution, 2 inflamed)
pub fn color_class(class: u8, label: &str) -> String {
    match class {
        0 => label.green().to_string(),
        1 => label.yellow().to_string(),
        _ => label.red().to_string(),
    }
}

/// Color a named criteria color (green, yellow, red)
pub fn color_named(name: &str, text: &str) -> String {
    match name {
        "green" => text.green().to_string(),
        "yellow" => text.yellow().to_string(),
        "red" => text.red().to_string(),
        _ => text.to_string(),
    }
}
