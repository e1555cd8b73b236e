//! Confidence scoring for ensemble predictions
//!
//! Regression confidence is derived from how much the ensemble members
//! disagree (coefficient of variation). Classification confidence is the
//! probability assigned to the selected class.

use super::EnsembleOutput;
use crate::models::round_to;
use serde::Serialize;

/// Reported when the spread cannot be measured (fewer than two members)
pub const DEFAULT_CONFIDENCE: f64 = 75.0;

/// Reported when the member mean is too close to zero for a relative spread
pub const CONFIDENCE_FLOOR: f64 = 50.0;

/// Fixed confidence of threshold-based classification
pub const RULE_CONFIDENCE: f64 = 95.0;

/// Means at or below this are treated as zero
const MEAN_EPSILON: f64 = 1e-9;

/// A score in [0, 100]
///
/// The unrounded value is kept for aggregation; responses show `rounded()`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    /// Clamp into [0, 100]; NaN maps to the default
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Confidence(DEFAULT_CONFIDENCE);
        }
        Confidence(value.clamp(0.0, 100.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// One decimal, as displayed
    pub fn rounded(&self) -> f64 {
        round_to(self.0, 1)
    }
}

/// Maps ensemble output to a confidence score
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceEstimator;

impl ConfidenceEstimator {
    pub fn new() -> Self {
        Self
    }

    pub fn estimate(&self, output: &EnsembleOutput) -> Confidence {
        match output {
            EnsembleOutput::Regression { members, .. } => self.from_members(members),
            EnsembleOutput::Classification {
                class,
                probabilities,
            } => self.from_probabilities(*class, probabilities),
        }
    }

    /// `100 * (1 - min(cv, 1))` over the member outputs
    pub fn from_members(&self, members: &[f64]) -> Confidence {
        if members.len() < 2 {
            return Confidence::new(DEFAULT_CONFIDENCE);
        }

        let n = members.len() as f64;
        let mean = members.iter().sum::<f64>() / n;
        let variance = members.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 {
            return Confidence::new(100.0);
        }
        if mean <= MEAN_EPSILON {
            return Confidence::new(CONFIDENCE_FLOOR);
        }

        let cv = (std_dev / mean).min(1.0);
        Confidence::new(100.0 * (1.0 - cv))
    }

    /// Probability of the selected class, as a percentage
    pub fn from_probabilities(&self, class: usize, probabilities: &[f64]) -> Confidence {
        match probabilities.get(class) {
            Some(p) => Confidence::new(p * 100.0),
            None => Confidence::new(DEFAULT_CONFIDENCE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreeing_members_are_fully_confident() {
        let estimator = ConfidenceEstimator::new();
        let confidence = estimator.from_members(&[18.2, 18.2, 18.2, 18.2]);
        assert_eq!(confidence.value(), 100.0);

        let zeros = estimator.from_members(&[0.0, 0.0, 0.0]);
        assert_eq!(zeros.value(), 100.0);
    }

    #[test]
    fn test_single_member_uses_default() {
        let estimator = ConfidenceEstimator::new();
        assert_eq!(estimator.from_members(&[12.0]).value(), DEFAULT_CONFIDENCE);
        assert_eq!(estimator.from_members(&[]).value(), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_coefficient_of_variation() {
        let estimator = ConfidenceEstimator::new();
        // mean 20, population std 2 => cv 0.1
        let confidence = estimator.from_members(&[18.0, 22.0, 18.0, 22.0]);
        assert!((confidence.value() - 90.0).abs() < 1e-9);
        assert_eq!(confidence.rounded(), 90.0);
    }

    #[test]
    fn test_zero_mean_with_spread_hits_floor() {
        let estimator = ConfidenceEstimator::new();
        assert_eq!(estimator.from_members(&[-1.0, 1.0]).value(), CONFIDENCE_FLOOR);
        assert_eq!(estimator.from_members(&[-5.0, -3.0]).value(), CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_confidence_always_in_bounds() {
        let estimator = ConfidenceEstimator::new();
        let cases: [&[f64]; 4] = [
            &[0.1, 50.0, 200.0],
            &[1e-6, 1e6],
            &[3.0, 3.1],
            &[100.0, 0.0, 0.0, 0.0],
        ];
        for members in cases {
            let c = estimator.from_members(members).value();
            assert!((0.0..=100.0).contains(&c), "{:?} gave {}", members, c);
        }
        assert_eq!(Confidence::new(140.0).value(), 100.0);
        assert_eq!(Confidence::new(-3.0).value(), 0.0);
        assert_eq!(Confidence::new(f64::NAN).value(), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_classification_confidence() {
        let estimator = ConfidenceEstimator::new();
        let output = EnsembleOutput::classification(vec![0.1, 0.72, 0.18]).unwrap();
        assert!((estimator.estimate(&output).value() - 72.0).abs() < 1e-9);
        assert_eq!(
            estimator.from_probabilities(0, &[]).value(),
            DEFAULT_CONFIDENCE
        );
    }
}
