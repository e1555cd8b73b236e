//! Model artifact loading
//!
//! Artifacts are read once at startup and shared read-only afterwards. A
//! model whose load failed stays registered with the failure reason so that
//! requests fail fast and health checks can report why.

use crate::config::{ModelConfig, ServingConfig};
use crate::error::{ArtifactError, PredictionError, ServingResult};
use crate::models::{FeatureVector, ModelKind};
use crate::observability::StructuredLogger;
use crate::predictor::{
    evaluate, EnsembleModel, EnsembleOutput, OnnxEnsemble, Scaler, StandardScaler, Task,
    TreeEnsemble, MASTITIS_LABELS,
};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension of checksum sidecar files
pub const CHECKSUM_EXTENSION: &str = "sha256";

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Read a file, verifying it against `<file>.sha256` when that sidecar exists
fn read_verified(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    let bytes = fs::read(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => ArtifactError::NotFound(path.to_path_buf()),
        _ => ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let sidecar = checksum_path(path);
    match fs::read_to_string(&sidecar) {
        Ok(contents) => {
            // sha256sum format: "<hex>  <filename>"
            let expected = contents
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            let actual = compute_checksum(&bytes);
            if expected != actual {
                return Err(ArtifactError::ChecksumMismatch {
                    path: path.to_path_buf(),
                    expected,
                    actual,
                });
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ArtifactError::Io {
                path: sidecar,
                source,
            })
        }
    }
    Ok(bytes)
}

fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(CHECKSUM_EXTENSION);
    PathBuf::from(name)
}

/// Task each learned model kind must implement
fn expected_task(kind: ModelKind) -> Option<Task> {
    match kind {
        ModelKind::Yield => Some(Task::Regression),
        ModelKind::Mastitis => Some(Task::Classification {
            n_classes: MASTITIS_LABELS.len(),
        }),
        ModelKind::Scc => None,
    }
}

/// Resolved on-disk locations of one model's files
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub scaler: Option<PathBuf>,
}

impl ArtifactPaths {
    pub fn new(model: impl Into<PathBuf>, scaler: Option<PathBuf>) -> Self {
        Self {
            model: model.into(),
            scaler,
        }
    }

    pub fn from_config(serving: &ServingConfig, model: &ModelConfig) -> Self {
        Self {
            model: serving.resolve(&model.file),
            scaler: model.scaler_file.as_deref().map(|f| serving.resolve(f)),
        }
    }

    /// Present and readable by this process
    pub fn model_exists(&self) -> bool {
        readable_file(&self.model)
    }

    /// True when no scaler is configured
    pub fn scaler_exists(&self) -> bool {
        self.scaler.as_deref().map_or(true, readable_file)
    }
}

fn readable_file(path: &Path) -> bool {
    fs::File::open(path)
        .and_then(|file| file.metadata())
        .is_ok_and(|meta| meta.is_file())
}

/// What a loaded artifact can do, reported by health checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub task: Task,
    pub n_members: usize,
    pub scaler: &'static str,
}

/// Fitted estimator plus its scaler
pub struct ModelArtifact {
    kind: ModelKind,
    version: String,
    estimator: Box<dyn EnsembleModel>,
    scaler: Scaler,
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("task", &self.estimator.task())
            .field("scaler", &self.scaler.name())
            .finish()
    }
}

impl ModelArtifact {
    /// Assemble an artifact, checking that estimator and scaler fit the kind
    pub fn new(
        kind: ModelKind,
        version: impl Into<String>,
        estimator: Box<dyn EnsembleModel>,
        scaler: Scaler,
    ) -> Result<Self, ArtifactError> {
        let Some(task) = expected_task(kind) else {
            return Err(ArtifactError::Invalid(format!("{} has no learned model", kind)));
        };
        if estimator.task() != task {
            return Err(ArtifactError::Invalid(format!(
                "{} model must be {:?}, artifact is {:?}",
                kind,
                task,
                estimator.task()
            )));
        }
        if estimator.n_features() != kind.arity() {
            return Err(ArtifactError::Invalid(format!(
                "{} model expects {} features, artifact takes {}",
                kind,
                kind.arity(),
                estimator.n_features()
            )));
        }
        if let Some(n) = scaler.n_features() {
            if n != kind.arity() {
                return Err(ArtifactError::Invalid(format!(
                    "{} scaler has {} features, expected {}",
                    kind,
                    n,
                    kind.arity()
                )));
            }
        }
        Ok(Self {
            kind,
            version: version.into(),
            estimator,
            scaler,
        })
    }

    /// Load estimator and scaler from disk. `.onnx` files go through tract,
    /// anything else is parsed as a JSON tree ensemble.
    pub fn load(kind: ModelKind, version: &str, paths: &ArtifactPaths) -> Result<Self, ArtifactError> {
        let task = expected_task(kind)
            .ok_or_else(|| ArtifactError::Invalid(format!("{} has no learned model", kind)))?;

        let bytes = read_verified(&paths.model)?;
        let is_onnx = paths
            .model
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        let estimator: Box<dyn EnsembleModel> = if is_onnx {
            Box::new(OnnxEnsemble::load(&bytes, task, kind.arity())?)
        } else {
            Box::new(TreeEnsemble::load(&paths.model, &bytes)?)
        };

        let scaler = match &paths.scaler {
            Some(path) => Scaler::Standard(StandardScaler::load(path, &read_verified(path)?)?),
            None => Scaler::Identity,
        };

        Self::new(kind, version, estimator, scaler)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            task: self.estimator.task(),
            n_members: self.estimator.n_members(),
            scaler: self.scaler.name(),
        }
    }

    /// Scale then evaluate an encoded vector
    pub fn infer(&self, features: &FeatureVector) -> ServingResult<EnsembleOutput> {
        if features.kind() != self.kind {
            return Err(PredictionError::inference(format!(
                "{} features passed to the {} model",
                features.kind(),
                self.kind
            )));
        }
        let scaled = self.scaler.transform(features)?;
        evaluate(self.estimator.as_ref(), scaled.values())
    }
}

/// Outcome of the one-time load
#[derive(Debug, Clone)]
pub enum LoadState {
    Loaded(Arc<ModelArtifact>),
    Failed(String),
}

/// A configured model and the result of loading it
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub kind: ModelKind,
    pub version: String,
    pub paths: ArtifactPaths,
    pub state: LoadState,
}

impl LoadedModel {
    pub fn load(kind: ModelKind, version: &str, paths: ArtifactPaths) -> Self {
        let state = match ModelArtifact::load(kind, version, &paths) {
            Ok(artifact) => LoadState::Loaded(Arc::new(artifact)),
            Err(e) => LoadState::Failed(e.to_string()),
        };
        Self {
            kind,
            version: version.to_string(),
            paths,
            state,
        }
    }

    pub fn from_artifact(artifact: ModelArtifact, paths: ArtifactPaths) -> Self {
        Self {
            kind: artifact.kind(),
            version: artifact.version().to_string(),
            paths,
            state: LoadState::Loaded(Arc::new(artifact)),
        }
    }

    pub fn failed(kind: ModelKind, version: &str, paths: ArtifactPaths, reason: impl Into<String>) -> Self {
        Self {
            kind,
            version: version.to_string(),
            paths,
            state: LoadState::Failed(reason.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, LoadState::Loaded(_))
    }

    /// The loaded artifact, or `ModelUnavailable` with the load failure
    pub fn artifact(&self) -> ServingResult<&Arc<ModelArtifact>> {
        match &self.state {
            LoadState::Loaded(artifact) => Ok(artifact),
            LoadState::Failed(reason) => Err(PredictionError::ModelUnavailable(format!(
                "{} model {}: {}",
                self.kind, self.version, reason
            ))),
        }
    }
}

/// Every learned model the service serves
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    yield_model: LoadedModel,
    mastitis_model: LoadedModel,
}

impl ModelRegistry {
    /// Load all configured artifacts; failures are recorded, not returned
    pub fn load(config: &ServingConfig, logger: &StructuredLogger) -> Self {
        let load = |kind: ModelKind, model: &ModelConfig| {
            let loaded = LoadedModel::load(kind, &model.version, ArtifactPaths::from_config(config, model));
            match &loaded.state {
                LoadState::Loaded(artifact) => {
                    logger.log_model_load(kind, &model.version, Ok(artifact.scaler().name()))
                }
                LoadState::Failed(reason) => logger.log_model_load(kind, &model.version, Err(reason)),
            }
            loaded
        };
        Self {
            yield_model: load(ModelKind::Yield, &config.yield_model),
            mastitis_model: load(ModelKind::Mastitis, &config.mastitis_model),
        }
    }

    pub fn from_models(yield_model: LoadedModel, mastitis_model: LoadedModel) -> Self {
        Self {
            yield_model,
            mastitis_model,
        }
    }

    /// `None` for kinds without a learned model
    pub fn get(&self, kind: ModelKind) -> Option<&LoadedModel> {
        match kind {
            ModelKind::Yield => Some(&self.yield_model),
            ModelKind::Mastitis => Some(&self.mastitis_model),
            ModelKind::Scc => None,
        }
    }

    pub fn yield_model(&self) -> &LoadedModel {
        &self.yield_model
    }

    pub fn mastitis_model(&self) -> &LoadedModel {
        &self.mastitis_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MastitisRequest, MilkYieldRequest};
    use crate::predictor::FeatureSource;
    use crate::testing;
    use tempfile::TempDir;

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum(b"test model weights");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, compute_checksum(b"test model weights"));
        assert_ne!(checksum, compute_checksum(b"other weights"));
    }

    #[test]
    fn test_load_tree_ensemble_with_scaler() {
        let dir = TempDir::new().unwrap();
        let paths = testing::write_yield_artifacts(dir.path());
        let artifact = ModelArtifact::load(ModelKind::Yield, "v2.0.0", &paths).unwrap();

        let caps = artifact.capabilities();
        assert_eq!(caps.task, Task::Regression);
        assert_eq!(caps.n_members, 3);
        assert_eq!(caps.scaler, "standard");
        assert_eq!(artifact.version(), "v2.0.0");
    }

    #[test]
    fn test_missing_model_file() {
        let dir = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(dir.path().join("absent.json"), None);
        assert!(!paths.model_exists());
        assert!(paths.scaler_exists());

        let err = ModelArtifact::load(ModelKind::Yield, "v2.0.0", &paths).unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));

        let loaded = LoadedModel::load(ModelKind::Yield, "v2.0.0", paths);
        assert!(!loaded.is_available());
        let err = loaded.artifact().unwrap_err();
        assert_eq!(err.code(), "MODEL_UNAVAILABLE");
    }

    #[test]
    fn test_model_file_must_be_readable() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("model.json")).unwrap();
        let paths = ArtifactPaths::new(
            dir.path().join("model.json"),
            Some(dir.path().join("model.json")),
        );
        assert!(!paths.model_exists());
        assert!(!paths.scaler_exists());

        let paths = testing::write_yield_artifacts(dir.path());
        assert!(paths.model_exists());
        assert!(paths.scaler_exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_model_file_is_reported_missing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let paths = testing::write_yield_artifacts(dir.path());
        fs::set_permissions(&paths.model, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can still read the file
        let readable = fs::read(&paths.model).is_ok();
        assert_eq!(paths.model_exists(), readable);
        assert_eq!(
            LoadedModel::load(ModelKind::Yield, "v2.0.0", paths).is_available(),
            readable
        );
    }

    #[test]
    fn test_load_onnx_regressor() {
        let dir = TempDir::new().unwrap();
        let paths = testing::write_onnx_artifact(dir.path(), "milk_yield_members.ONNX", testing::YIELD_ONNX);
        let artifact = ModelArtifact::load(ModelKind::Yield, "onnx-v1", &paths).unwrap();

        let caps = artifact.capabilities();
        assert_eq!(caps.task, Task::Regression);
        assert_eq!(caps.n_members, 3);
        assert_eq!(caps.scaler, "identity");

        let features = MilkYieldRequest::health_sample().encode().unwrap();
        match artifact.infer(&features).unwrap() {
            EnsembleOutput::Regression { estimate, members } => {
                assert!((estimate - 20.0).abs() < 1e-6);
                assert_eq!(members.len(), 3);
                assert!((members[0] - 20.0).abs() < 1e-6);
                assert!((members[1] - 18.0).abs() < 1e-6);
                assert!((members[2] - 22.0).abs() < 1e-6);
            }
            other => panic!("expected regression output, got {:?}", other),
        }
    }

    #[test]
    fn test_load_onnx_classifier() {
        let dir = TempDir::new().unwrap();
        let paths = testing::write_onnx_artifact(dir.path(), "mastitis_softmax.onnx", testing::MASTITIS_ONNX);
        let artifact = ModelArtifact::load(ModelKind::Mastitis, "onnx-v1", &paths).unwrap();
        assert_eq!(
            artifact.capabilities().task,
            Task::Classification { n_classes: 3 }
        );

        let healthy = MastitisRequest::health_sample().encode().unwrap();
        match artifact.infer(&healthy).unwrap() {
            EnsembleOutput::Classification { class, probabilities } => {
                assert_eq!(class, 0);
                assert!((probabilities[0] - 0.7306).abs() < 1e-3);
                assert!((probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-5);
            }
            other => panic!("expected classification output, got {:?}", other),
        }

        let inflamed = MastitisRequest {
            conductivity: Some(9.0),
            ..MastitisRequest::health_sample()
        };
        match artifact.infer(&inflamed.encode().unwrap()).unwrap() {
            EnsembleOutput::Classification { class, probabilities } => {
                assert_eq!(class, 2);
                assert!((probabilities[2] - 0.8807).abs() < 1e-3);
            }
            other => panic!("expected classification output, got {:?}", other),
        }
    }

    #[test]
    fn test_onnx_with_wrong_input_width_rejected() {
        let dir = TempDir::new().unwrap();
        let paths = testing::write_onnx_artifact(dir.path(), "mastitis_softmax.onnx", testing::MASTITIS_ONNX);
        let err = ModelArtifact::load(ModelKind::Yield, "onnx-v1", &paths).unwrap_err();
        assert!(matches!(err, ArtifactError::Onnx(_)));

        let loaded = LoadedModel::load(ModelKind::Yield, "onnx-v1", paths);
        assert!(!loaded.is_available());
    }

    #[test]
    fn test_checksum_sidecar_verified() {
        let dir = TempDir::new().unwrap();
        let paths = testing::write_yield_artifacts(dir.path());
        let bytes = fs::read(&paths.model).unwrap();

        fs::write(checksum_path(&paths.model), format!("{}  model.json\n", compute_checksum(&bytes))).unwrap();
        assert!(ModelArtifact::load(ModelKind::Yield, "v2.0.0", &paths).is_ok());

        fs::write(checksum_path(&paths.model), "0000").unwrap();
        let err = ModelArtifact::load(ModelKind::Yield, "v2.0.0", &paths).unwrap_err();
        assert!(matches!(err, ArtifactError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_configured_scaler_failure_makes_model_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut paths = testing::write_yield_artifacts(dir.path());
        paths.scaler = Some(dir.path().join("missing_scaler.json"));
        assert!(!paths.scaler_exists());

        let loaded = LoadedModel::load(ModelKind::Yield, "v2.0.0", paths);
        assert!(matches!(
            loaded.artifact().unwrap_err(),
            PredictionError::ModelUnavailable(_)
        ));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let err = ModelArtifact::new(
            ModelKind::Mastitis,
            "v1",
            Box::new(testing::yield_ensemble()),
            Scaler::Identity,
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Invalid(_)));

        assert!(ModelArtifact::new(
            ModelKind::Scc,
            "v1",
            Box::new(testing::yield_ensemble()),
            Scaler::Identity
        )
        .is_err());
    }

    #[test]
    fn test_registry_records_failures() {
        let dir = TempDir::new().unwrap();
        let config = ServingConfig {
            model_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let registry = ModelRegistry::load(&config, &StructuredLogger::new("test"));
        assert!(!registry.yield_model().is_available());
        assert!(!registry.mastitis_model().is_available());
        assert!(registry.get(ModelKind::Scc).is_none());
    }
}
