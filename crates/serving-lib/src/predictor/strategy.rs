//! Classification strategies
//!
//! Mastitis risk can be classified either from a learned model over the
//! feature vector or from somatic cell count thresholds. Both produce the
//! same [`Classification`].

use super::confidence::{Confidence, ConfidenceEstimator, RULE_CONFIDENCE};
use super::rules::ClassificationCriteria;
use super::EnsembleOutput;
use crate::artifact::ModelArtifact;
use crate::error::{PredictionError, ServingResult};
use crate::models::FeatureVector;
use std::sync::Arc;

/// Class labels of the mastitis model, indexed by class
pub const MASTITIS_LABELS: [&str; 3] = ["정상", "주의", "염증 가능성 + 유방염 의심"];

/// Outcome of a classification
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class: u8,
    pub label: String,
    pub confidence: Confidence,
    /// Only rule-based classification explains itself
    pub description: Option<String>,
    pub recommendation: Option<String>,
}

pub trait ClassificationStrategy: Send + Sync {
    type Input: ?Sized;

    /// Identifier reported as `prediction_method`
    fn method(&self) -> &'static str;

    fn classify(&self, input: &Self::Input) -> ServingResult<Classification>;
}

/// Threshold classification, no learned model
#[derive(Debug, Clone)]
pub struct RuleBasedClassifier {
    criteria: Arc<ClassificationCriteria>,
}

impl RuleBasedClassifier {
    pub fn new(criteria: Arc<ClassificationCriteria>) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &ClassificationCriteria {
        &self.criteria
    }
}

impl ClassificationStrategy for RuleBasedClassifier {
    type Input = f64;

    fn method(&self) -> &'static str {
        self.criteria.method()
    }

    fn classify(&self, value: &f64) -> ServingResult<Classification> {
        let criterion = self.criteria.classify(*value);
        Ok(Classification {
            class: criterion.class,
            label: criterion.label.to_string(),
            confidence: Confidence::new(RULE_CONFIDENCE),
            description: Some(criterion.description.to_string()),
            recommendation: Some(criterion.action.to_string()),
        })
    }
}

/// Classification by a learned ensemble
#[derive(Debug, Clone)]
pub struct ModelClassifier {
    artifact: Arc<ModelArtifact>,
    labels: &'static [&'static str],
    estimator: ConfidenceEstimator,
}

impl ModelClassifier {
    pub fn new(artifact: Arc<ModelArtifact>, labels: &'static [&'static str]) -> Self {
        Self {
            artifact,
            labels,
            estimator: ConfidenceEstimator::new(),
        }
    }

    pub fn mastitis(artifact: Arc<ModelArtifact>) -> Self {
        Self::new(artifact, &MASTITIS_LABELS)
    }
}

impl ClassificationStrategy for ModelClassifier {
    type Input = FeatureVector;

    fn method(&self) -> &'static str {
        "model"
    }

    fn classify(&self, features: &FeatureVector) -> ServingResult<Classification> {
        let output = self.artifact.infer(features)?;
        let EnsembleOutput::Classification { class, .. } = &output else {
            return Err(PredictionError::inference("model is not a classifier"));
        };
        let label = self.labels.get(*class).ok_or_else(|| {
            PredictionError::inference(format!("model predicted unknown class {}", class))
        })?;
        let class = u8::try_from(*class)
            .map_err(|_| PredictionError::inference(format!("class index {} out of range", class)))?;

        Ok(Classification {
            class,
            label: label.to_string(),
            confidence: self.estimator.estimate(&output),
            description: None,
            recommendation: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MastitisRequest, ModelKind};
    use crate::predictor::{FeatureSource, Scaler};
    use crate::testing;

    #[test]
    fn test_rule_based_classification() {
        let classifier =
            RuleBasedClassifier::new(Arc::new(ClassificationCriteria::somatic_cell_count().unwrap()));
        assert_eq!(classifier.method(), "somatic_cell_count");

        let result = classifier.classify(&150.0).unwrap();
        assert_eq!(result.class, 1);
        assert_eq!(result.label, "주의");
        assert_eq!(result.confidence.value(), 95.0);
        assert_eq!(result.recommendation.as_deref(), Some("위생 관리 강화 및 모니터링"));
    }

    #[test]
    fn test_model_classification() {
        let artifact = ModelArtifact::new(
            ModelKind::Mastitis,
            "mastitis_rf_v1",
            Box::new(testing::mastitis_ensemble()),
            Scaler::Standard(testing::mastitis_scaler()),
        )
        .unwrap();
        let classifier = ModelClassifier::mastitis(Arc::new(artifact));

        let features = MastitisRequest::health_sample().encode().unwrap();
        let result = classifier.classify(&features).unwrap();
        assert_eq!(result.class, 0);
        assert_eq!(result.label, "정상");
        assert!((result.confidence.value() - 70.0).abs() < 1e-9);
        assert!(result.description.is_none());
    }

    #[test]
    fn test_model_classifier_rejects_wrong_kind() {
        let artifact = ModelArtifact::new(
            ModelKind::Mastitis,
            "mastitis_rf_v1",
            Box::new(testing::mastitis_ensemble()),
            Scaler::Identity,
        )
        .unwrap();
        let classifier = ModelClassifier::mastitis(Arc::new(artifact));
        let yield_features = crate::models::MilkYieldRequest::health_sample().encode().unwrap();
        let err = classifier.classify(&yield_features).unwrap_err();
        assert!(matches!(err, PredictionError::Inference(_)));
    }
}
