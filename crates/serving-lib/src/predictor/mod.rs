//! ML prediction engine

mod confidence;
mod ensemble;
mod features;
mod inference;
mod orchestrator;
mod rules;
mod scaler;
mod strategy;

pub use confidence::{
    Confidence, ConfidenceEstimator, CONFIDENCE_FLOOR, DEFAULT_CONFIDENCE,
    RULE_CONFIDENCE,
};
pub use ensemble::{DecisionTree, TreeEnsemble, TreeNode};
pub use features::{malformed_entry, FeatureSource, PREDICTION_DATE_FORMAT};
pub use inference::OnnxEnsemble;
pub use orchestrator::{PredictionService, SampleTestReport};
pub use rules::{
    ClassificationCriteria, CriteriaListing, CriteriaSummary, Criterion, SCC_UNIT,
};
pub use scaler::{Scaler, StandardScaler};
pub use strategy::{
    Classification, ClassificationStrategy, ModelClassifier, RuleBasedClassifier, MASTITIS_LABELS,
};

use crate::error::{PredictionError, ServingResult};

/// What a fitted estimator predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Regression,
    Classification { n_classes: usize },
}

/// Output of one ensemble evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum EnsembleOutput {
    /// Point estimate plus each member's prediction, in member order
    Regression { estimate: f64, members: Vec<f64> },
    /// Selected class plus the per-class probability vector
    Classification {
        class: usize,
        probabilities: Vec<f64>,
    },
}

impl EnsembleOutput {
    /// Point estimate is the mean of member outputs
    pub fn regression(members: Vec<f64>) -> Self {
        let estimate = if members.is_empty() {
            f64::NAN
        } else {
            members.iter().sum::<f64>() / members.len() as f64
        };
        EnsembleOutput::Regression { estimate, members }
    }

    /// Class is the argmax, lowest index on ties
    pub fn classification(probabilities: Vec<f64>) -> ServingResult<Self> {
        let mut class = None;
        for (idx, p) in probabilities.iter().enumerate() {
            match class {
                Some((_, best)) if *p <= best => {}
                _ => class = Some((idx, *p)),
            }
        }
        let (class, _) = class.ok_or_else(|| {
            PredictionError::inference("classifier returned no class probabilities")
        })?;
        Ok(EnsembleOutput::Classification {
            class,
            probabilities,
        })
    }

    /// Regression estimate, or the class index for classifiers
    pub fn point_estimate(&self) -> f64 {
        match self {
            EnsembleOutput::Regression { estimate, .. } => *estimate,
            EnsembleOutput::Classification { class, .. } => *class as f64,
        }
    }

    fn ensure_finite(self) -> ServingResult<Self> {
        let finite = match &self {
            EnsembleOutput::Regression { estimate, members } => {
                estimate.is_finite() && members.iter().all(|m| m.is_finite())
            }
            EnsembleOutput::Classification { probabilities, .. } => {
                probabilities.iter().all(|p| p.is_finite())
            }
        };
        if finite {
            Ok(self)
        } else {
            Err(PredictionError::inference("model produced non-finite output"))
        }
    }
}

/// A fitted ensemble estimator
///
/// Implementations must be side-effect free so a single loaded instance can
/// serve concurrent requests.
pub trait EnsembleModel: Send + Sync {
    fn task(&self) -> Task;

    /// Arity of the input vector
    fn n_features(&self) -> usize;

    /// Number of ensemble members (trees)
    fn n_members(&self) -> usize;

    /// Aggregate prediction together with per-member detail
    fn predict_with_members(&self, features: &[f64]) -> ServingResult<EnsembleOutput>;

    /// Aggregate prediction only
    fn predict(&self, features: &[f64]) -> ServingResult<f64> {
        Ok(self.predict_with_members(features)?.point_estimate())
    }
}

/// Run an estimator and reject non-finite outputs
pub(crate) fn evaluate(model: &dyn EnsembleModel, features: &[f64]) -> ServingResult<EnsembleOutput> {
    model.predict_with_members(features)?.ensure_finite()
}
