//! ONNX inference using tract
//!
//! Ensembles exported to ONNX are evaluated with tract-onnx. Regressors must
//! expose the per-member predictions as their first output so the spread can
//! be scored; classifiers expose class probabilities as their last output.

use super::{EnsembleModel, EnsembleOutput, Task};
use crate::error::{ArtifactError, PredictionError, ServingResult};
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Inference latency above which a warning is logged
const MAX_INFERENCE_MS: u128 = 50;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX-exported ensemble evaluated with tract
pub struct OnnxEnsemble {
    model: TractModel,
    task: Task,
    n_features: usize,
    n_members: usize,
}

impl std::fmt::Debug for OnnxEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEnsemble")
            .field("task", &self.task)
            .field("n_features", &self.n_features)
            .field("n_members", &self.n_members)
            .finish()
    }
}

impl OnnxEnsemble {
    /// Load and optimize a model from bytes, then probe it once with a zero
    /// vector to learn the output layout.
    pub fn load(model_bytes: &[u8], task: Task, n_features: usize) -> Result<Self, ArtifactError> {
        let model = Self::load_model(model_bytes, n_features)?;
        let mut ensemble = Self {
            model,
            task,
            n_features,
            n_members: 0,
        };

        let probe = ensemble
            .run(&vec![0.0; n_features])
            .map_err(|e| ArtifactError::Onnx(format!("probe inference failed: {}", e)))?;
        ensemble.n_members = match task {
            Task::Regression => probe.len(),
            Task::Classification { n_classes } => {
                if probe.len() != n_classes {
                    return Err(ArtifactError::Invalid(format!(
                        "classifier outputs {} probabilities, expected {}",
                        probe.len(),
                        n_classes
                    )));
                }
                // Member outputs are not exposed for classifiers
                1
            }
        };
        if ensemble.n_members == 0 {
            return Err(ArtifactError::Invalid("model produced an empty output".to_string()));
        }
        Ok(ensemble)
    }

    fn load_model(model_bytes: &[u8], n_features: usize) -> Result<TractModel, ArtifactError> {
        let onnx = |stage: &str, e: TractError| ArtifactError::Onnx(format!("{}: {}", stage, e));
        tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .map_err(|e| onnx("failed to parse model", e))?
            .with_input_fact(0, f32::fact([1, n_features]).into())
            .map_err(|e| onnx("failed to set input shape", e))?
            .into_optimized()
            .map_err(|e| onnx("failed to optimize model", e))?
            .into_runnable()
            .map_err(|e| onnx("failed to create runnable model", e))
    }

    fn features_to_tensor(&self, features: &[f64]) -> TractResult<Tensor> {
        let data: Vec<f32> = features.iter().map(|v| *v as f32).collect();
        Ok(tract_ndarray::Array2::from_shape_vec((1, self.n_features), data)?.into())
    }

    /// Run the plan and flatten the relevant output to f64
    fn run(&self, features: &[f64]) -> TractResult<Vec<f64>> {
        let input = self.features_to_tensor(features)?;
        let outputs = self.model.run(tvec!(input.into()))?;
        let output = match self.task {
            Task::Regression => outputs.first(),
            Task::Classification { .. } => outputs.last(),
        }
        .ok_or_else(|| anyhow::anyhow!("no output from model"))?;

        let output = output.cast_to::<f32>()?;
        let view = output.to_array_view::<f32>()?;
        Ok(view.iter().map(|v| *v as f64).collect())
    }
}

impl EnsembleModel for OnnxEnsemble {
    fn task(&self) -> Task {
        self.task
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_members(&self) -> usize {
        self.n_members
    }

    fn predict_with_members(&self, features: &[f64]) -> ServingResult<EnsembleOutput> {
        if features.len() != self.n_features {
            return Err(PredictionError::inference(format!(
                "model expects {} features, got {}",
                self.n_features,
                features.len()
            )));
        }

        let start = Instant::now();
        let values = self
            .run(features)
            .map_err(|e| PredictionError::inference(e.to_string()))?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "Inference exceeded {}ms target", MAX_INFERENCE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros() as u64, "Inference completed");
        }

        match self.task {
            Task::Regression => Ok(EnsembleOutput::regression(values)),
            Task::Classification { .. } => EnsembleOutput::classification(values),
        }
    }
}
