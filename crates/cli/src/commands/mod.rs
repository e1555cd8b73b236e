//! CLI command implementations

pub mod batch;
pub mod criteria;
pub mod health;
pub mod predict;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Read a JSON document given inline or as a path to a file
pub fn load_input(input: &str) -> Result<Value> {
    let trimmed = input.trim_start();
    let text = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        input.to_string()
    } else {
        let path = Path::new(input);
        if !path.exists() {
            bail!("Input file not found: {}", path.display());
        }
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display()))?
    };

    serde_json::from_str(&text).context("Input is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_inline_json() {
        let value = load_input(r#" {"cow_id": "cow-1"}"#).unwrap();
        assert_eq!(value["cow_id"], "cow-1");
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"somatic_cell_count": 120}}]"#).unwrap();

        let value = load_input(file.path().to_str().unwrap()).unwrap();
        assert_eq!(value[0]["somatic_cell_count"], 120);
    }

    #[test]
    fn test_missing_file_and_bad_json() {
        assert!(load_input("/nonexistent/cows.json").is_err());
        assert!(load_input("{not json").is_err());
    }
}
