//! Feature scaling applied between encoding and inference
//!
//! Scalers are fitted offline; at serving time only the fixed transform runs.

use crate::error::{ArtifactError, PredictionError, ServingResult};
use crate::models::FeatureVector;
use serde::Deserialize;
use std::path::Path;

/// Standardization `(x - mean) / scale`, as exported from a fitted scaler
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RawScaler {
    #[serde(alias = "mean_")]
    mean: Vec<f64>,
    #[serde(alias = "scale_")]
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ArtifactError> {
        if mean.is_empty() {
            return Err(ArtifactError::Invalid("scaler has no features".to_string()));
        }
        if mean.len() != scale.len() {
            return Err(ArtifactError::Invalid(format!(
                "scaler mean has {} entries but scale has {}",
                mean.len(),
                scale.len()
            )));
        }
        if mean.iter().chain(scale.iter()).any(|v| !v.is_finite()) {
            return Err(ArtifactError::Invalid(
                "scaler contains non-finite values".to_string(),
            ));
        }
        // Constant features were fitted with zero variance; leave them unscaled
        let scale = scale
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();
        Ok(Self { mean, scale })
    }

    /// Load a scaler exported as `{"mean": [...], "scale": [...]}`
    pub fn load(path: &Path, bytes: &[u8]) -> Result<Self, ArtifactError> {
        let raw: RawScaler =
            serde_json::from_slice(bytes).map_err(|source| ArtifactError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(raw.mean, raw.scale)
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }
}

/// Transform applied to raw feature vectors before inference
#[derive(Debug, Clone, PartialEq)]
pub enum Scaler {
    /// No scaler configured for this model
    Identity,
    Standard(StandardScaler),
}

impl Scaler {
    pub fn is_identity(&self) -> bool {
        matches!(self, Scaler::Identity)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scaler::Identity => "identity",
            Scaler::Standard(_) => "standard",
        }
    }

    pub fn n_features(&self) -> Option<usize> {
        match self {
            Scaler::Identity => None,
            Scaler::Standard(s) => Some(s.n_features()),
        }
    }

    /// Apply the fitted transform; deterministic for a given scaler
    pub fn transform(&self, features: &FeatureVector) -> ServingResult<FeatureVector> {
        match self {
            Scaler::Identity => Ok(features.clone()),
            Scaler::Standard(scaler) => {
                if features.len() != scaler.n_features() {
                    return Err(PredictionError::inference(format!(
                        "scaler expects {} features, got {}",
                        scaler.n_features(),
                        features.len()
                    )));
                }
                let values = features
                    .values()
                    .iter()
                    .zip(scaler.mean.iter().zip(scaler.scale.iter()))
                    .map(|(x, (mean, scale))| (x - mean) / scale)
                    .collect();
                Ok(features.with_values(values))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelKind;

    fn mastitis_vector() -> FeatureVector {
        FeatureVector::new(ModelKind::Mastitis, vec![25.0, 6.0, 3.8, 3.2, 2.0])
    }

    #[test]
    fn test_identity_passthrough() {
        let vector = mastitis_vector();
        let scaled = Scaler::Identity.transform(&vector).unwrap();
        assert_eq!(scaled, vector);
        assert!(Scaler::Identity.is_identity());
        assert_eq!(Scaler::Identity.name(), "identity");
    }

    #[test]
    fn test_standardization() {
        let scaler = StandardScaler::new(
            vec![20.0, 5.0, 4.0, 3.0, 2.0],
            vec![5.0, 0.5, 0.2, 0.1, 0.0],
        )
        .unwrap();
        let scaled = Scaler::Standard(scaler).transform(&mastitis_vector()).unwrap();
        let values = scaled.values();
        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - 2.0).abs() < 1e-9);
        assert!((values[2] + 1.0).abs() < 1e-9);
        assert!((values[3] - 2.0).abs() < 1e-9);
        // zero scale treated as 1
        assert!((values[4] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_scaling_is_deterministic() {
        let scaler = Scaler::Standard(
            StandardScaler::new(vec![1.0; 5], vec![3.0; 5]).unwrap(),
        );
        let vector = mastitis_vector();
        assert_eq!(
            scaler.transform(&vector).unwrap(),
            scaler.transform(&vector).unwrap()
        );
    }

    #[test]
    fn test_arity_mismatch_is_inference_error() {
        let scaler = Scaler::Standard(StandardScaler::new(vec![0.0; 8], vec![1.0; 8]).unwrap());
        let err = scaler.transform(&mastitis_vector()).unwrap_err();
        assert!(matches!(err, PredictionError::Inference(_)));
    }

    #[test]
    fn test_load_accepts_sklearn_field_names() {
        let path = Path::new("scaler.json");
        let scaler = StandardScaler::load(path, br#"{"mean_": [1.0, 2.0], "scale_": [1.0, 4.0]}"#)
            .unwrap();
        assert_eq!(scaler.n_features(), 2);

        let err = StandardScaler::load(path, br#"{"mean": [1.0], "scale": [1.0, 2.0]}"#)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Invalid(_)));

        let err = StandardScaler::load(path, b"not json").unwrap_err();
        assert!(matches!(err, ArtifactError::Parse { .. }));
    }
}
