//! Tree ensemble evaluation
//!
//! Random-forest style artifacts exported as JSON: a list of binary decision
//! trees whose nodes are stored in a flat array. Split nodes send a sample to
//! `left` when `x[feature] <= threshold`. Leaves hold a single value for
//! regression or a class distribution for classification.

use super::{EnsembleModel, EnsembleOutput, Task};
use crate::error::{ArtifactError, PredictionError, ServingResult};
use serde::Deserialize;
use std::path::Path;

/// Node of a decision tree
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

impl TreeNode {
    pub fn split(feature: usize, threshold: f64, left: usize, right: usize) -> Self {
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        }
    }

    pub fn leaf(value: Vec<f64>) -> Self {
        TreeNode::Leaf { value }
    }
}

/// One ensemble member
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Walk from the root to a leaf. Validation guarantees child indices only
    /// move forward, so the walk terminates.
    fn leaf_for(&self, features: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn validate(&self, tree_idx: usize, task: Task, n_features: usize) -> Result<(), ArtifactError> {
        let invalid = |msg: String| ArtifactError::Invalid(format!("tree {}: {}", tree_idx, msg));

        if self.nodes.is_empty() {
            return Err(invalid("tree has no nodes".to_string()));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(invalid(format!(
                            "node {} splits on feature {} of {}",
                            idx, feature, n_features
                        )));
                    }
                    if !threshold.is_finite() {
                        return Err(invalid(format!("node {} has a non-finite threshold", idx)));
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(invalid(format!(
                                "node {} has invalid child index {}",
                                idx, child
                            )));
                        }
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.iter().any(|v| !v.is_finite()) {
                        return Err(invalid(format!("leaf {} has non-finite values", idx)));
                    }
                    match task {
                        Task::Regression if value.len() != 1 => {
                            return Err(invalid(format!(
                                "regression leaf {} has {} values",
                                idx,
                                value.len()
                            )));
                        }
                        Task::Classification { n_classes } => {
                            if value.len() != n_classes {
                                return Err(invalid(format!(
                                    "leaf {} has {} class weights, expected {}",
                                    idx,
                                    value.len(),
                                    n_classes
                                )));
                            }
                            if value.iter().any(|v| *v < 0.0) || value.iter().sum::<f64>() <= 0.0 {
                                return Err(invalid(format!(
                                    "leaf {} has an invalid class distribution",
                                    idx
                                )));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawTask {
    Regression,
    Classification,
}

#[derive(Debug, Deserialize)]
struct RawEnsemble {
    task: RawTask,
    n_features: usize,
    #[serde(default)]
    n_classes: Option<usize>,
    trees: Vec<DecisionTree>,
}

/// Fitted tree ensemble evaluated natively
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    task: Task,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl TreeEnsemble {
    pub fn new(task: Task, n_features: usize, trees: Vec<DecisionTree>) -> Result<Self, ArtifactError> {
        if trees.is_empty() {
            return Err(ArtifactError::Invalid("ensemble has no trees".to_string()));
        }
        if n_features == 0 {
            return Err(ArtifactError::Invalid("ensemble has no features".to_string()));
        }
        if let Task::Classification { n_classes } = task {
            if n_classes < 2 {
                return Err(ArtifactError::Invalid(format!(
                    "classifier needs at least 2 classes, got {}",
                    n_classes
                )));
            }
        }
        for (idx, tree) in trees.iter().enumerate() {
            tree.validate(idx, task, n_features)?;
        }
        Ok(Self {
            task,
            n_features,
            trees,
        })
    }

    /// Parse and validate a JSON ensemble artifact
    pub fn load(path: &Path, bytes: &[u8]) -> Result<Self, ArtifactError> {
        let raw: RawEnsemble =
            serde_json::from_slice(bytes).map_err(|source| ArtifactError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let task = match raw.task {
            RawTask::Regression => Task::Regression,
            RawTask::Classification => Task::Classification {
                n_classes: raw.n_classes.ok_or_else(|| {
                    ArtifactError::Invalid("classifier is missing n_classes".to_string())
                })?,
            },
        };
        Self::new(task, raw.n_features, raw.trees)
    }
}

impl EnsembleModel for TreeEnsemble {
    fn task(&self) -> Task {
        self.task
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_members(&self) -> usize {
        self.trees.len()
    }

    fn predict_with_members(&self, features: &[f64]) -> ServingResult<EnsembleOutput> {
        if features.len() != self.n_features {
            return Err(PredictionError::inference(format!(
                "model expects {} features, got {}",
                self.n_features,
                features.len()
            )));
        }

        match self.task {
            Task::Regression => {
                let members: Vec<f64> = self.trees.iter().map(|t| t.leaf_for(features)[0]).collect();
                Ok(EnsembleOutput::regression(members))
            }
            Task::Classification { n_classes } => {
                let mut probabilities = vec![0.0; n_classes];
                for tree in &self.trees {
                    let leaf = tree.leaf_for(features);
                    let total: f64 = leaf.iter().sum();
                    for (p, weight) in probabilities.iter_mut().zip(leaf) {
                        *p += weight / total;
                    }
                }
                let members = self.trees.len() as f64;
                probabilities.iter_mut().for_each(|p| *p /= members);
                EnsembleOutput::classification(probabilities)
            }
        }
    }
}
