//! Shared fixtures for unit tests

use crate::artifact::{ArtifactPaths, LoadedModel, ModelRegistry};
use crate::models::ModelKind;
use crate::predictor::{StandardScaler, TreeEnsemble};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tempfile::TempDir;

pub(crate) const YIELD_ENSEMBLE: &str = include_str!("../fixtures/milk_yield_rf_v2.json");
pub(crate) const YIELD_SCALER: &str = include_str!("../fixtures/milk_yield_scaler_v2.json");
pub(crate) const MASTITIS_ENSEMBLE: &str = include_str!("../fixtures/mastitis_rf_v1.json");
pub(crate) const MASTITIS_SCALER: &str = include_str!("../fixtures/mastitis_scaler_v1.json");
/// Three linear members; member outputs are 10, 9 and 11 times `milking_frequency`
pub(crate) const YIELD_ONNX: &[u8] = include_bytes!("../fixtures/milk_yield_members.onnx");
/// Softmax over `[7, 0, conductivity]`
pub(crate) const MASTITIS_ONNX: &[u8] = include_bytes!("../fixtures/mastitis_softmax.onnx");

pub(crate) fn yield_ensemble() -> TreeEnsemble {
    TreeEnsemble::load(Path::new("milk_yield_rf_v2.json"), YIELD_ENSEMBLE.as_bytes()).unwrap()
}

pub(crate) fn mastitis_ensemble() -> TreeEnsemble {
    TreeEnsemble::load(Path::new("mastitis_rf_v1.json"), MASTITIS_ENSEMBLE.as_bytes()).unwrap()
}

pub(crate) fn mastitis_scaler() -> StandardScaler {
    StandardScaler::load(Path::new("mastitis_scaler_v1.json"), MASTITIS_SCALER.as_bytes()).unwrap()
}

pub(crate) fn write_yield_artifacts(dir: &Path) -> ArtifactPaths {
    let model = dir.join("milk_yield_rf_v2.json");
    let scaler = dir.join("milk_yield_scaler_v2.json");
    fs::write(&model, YIELD_ENSEMBLE).unwrap();
    fs::write(&scaler, YIELD_SCALER).unwrap();
    ArtifactPaths::new(model, Some(scaler))
}

pub(crate) fn write_mastitis_artifacts(dir: &Path) -> ArtifactPaths {
    let model = dir.join("mastitis_rf_v1.json");
    let scaler = dir.join("mastitis_scaler_v1.json");
    fs::write(&model, MASTITIS_ENSEMBLE).unwrap();
    fs::write(&scaler, MASTITIS_SCALER).unwrap();
    ArtifactPaths::new(model, Some(scaler))
}

/// ONNX estimator without a scaler
pub(crate) fn write_onnx_artifact(dir: &Path, name: &str, bytes: &[u8]) -> ArtifactPaths {
    let model = dir.join(name);
    fs::write(&model, bytes).unwrap();
    ArtifactPaths::new(model, None)
}

/// Directory holding both artifact pairs for the life of the test process
fn fixture_dir() -> &'static Path {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        write_yield_artifacts(dir.path());
        write_mastitis_artifacts(dir.path());
        dir
    })
    .path()
}

pub(crate) fn yield_model() -> LoadedModel {
    let dir = fixture_dir();
    LoadedModel::load(
        ModelKind::Yield,
        "v2.0.0",
        ArtifactPaths::new(
            dir.join("milk_yield_rf_v2.json"),
            Some(dir.join("milk_yield_scaler_v2.json")),
        ),
    )
}

pub(crate) fn mastitis_model() -> LoadedModel {
    let dir = fixture_dir();
    LoadedModel::load(
        ModelKind::Mastitis,
        "mastitis_rf_v1",
        ArtifactPaths::new(
            dir.join("mastitis_rf_v1.json"),
            Some(dir.join("mastitis_scaler_v1.json")),
        ),
    )
}

pub(crate) fn registry() -> ModelRegistry {
    ModelRegistry::from_models(yield_model(), mastitis_model())
}

/// Both models configured but never loaded
pub(crate) fn unavailable_registry() -> ModelRegistry {
    let missing = |name: &str| ArtifactPaths::new(Path::new("/nonexistent").join(name), None);
    ModelRegistry::from_models(
        LoadedModel::failed(ModelKind::Yield, "v2.0.0", missing("yield.json"), "artifact not found"),
        LoadedModel::failed(
            ModelKind::Mastitis,
            "mastitis_rf_v1",
            missing("mastitis.json"),
            "artifact not found",
        ),
    )
}
