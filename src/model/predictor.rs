//! Predictors - trained classifiers deserialized from an artifact bundle

use serde::{Deserialize, Serialize};

use super::PredictError;

/// Binary classifier with label and probability capabilities
pub trait Predictor: Send + Sync + std::fmt::Debug {
    /// Predicted class label (`0` or `1`)
    fn predict(&self, features: &[f64]) -> Result<usize, PredictError> {
        let proba = self.predict_proba(features)?;
        Ok(if proba[1] >= proba[0] { 1 } else { 0 })
    }

    /// Class distribution `[p_negative, p_positive]`
    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 2], PredictError>;

    /// Expected input width
    fn n_features(&self) -> usize;

    /// Short kind tag, e.g. `"logistic_regression"`
    fn kind(&self) -> &'static str;
}

fn check_width(expected: usize, features: &[f64]) -> Result<(), PredictError> {
    if features.len() != expected {
        return Err(PredictError::DimensionMismatch {
            expected,
            actual: features.len(),
        });
    }
    Ok(())
}

fn distribution(positive: f64) -> Result<[f64; 2], PredictError> {
    if !positive.is_finite() {
        return Err(PredictError::NonFinite);
    }
    let p = positive.clamp(0.0, 1.0);
    Ok([1.0 - p, p])
}

// ============================================================================
// SERIALIZED FORM
// ============================================================================

/// Serialized predictor as stored under the bundle's `model` key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredictorSpec {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
}

impl PredictorSpec {
    pub fn into_predictor(self) -> Box<dyn Predictor> {
        match self {
            PredictorSpec::LogisticRegression(m) => Box::new(m),
            PredictorSpec::RandomForest(m) => Box::new(m),
        }
    }
}

// ============================================================================
// LOGISTIC REGRESSION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl Predictor for LogisticRegression {
    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 2], PredictError> {
        check_width(self.coefficients.len(), features)?;

        let z: f64 = self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>();

        distribution(1.0 / (1.0 + (-z).exp()))
    }

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn kind(&self) -> &'static str {
        "logistic_regression"
    }
}

// ============================================================================
// RANDOM FOREST
// ============================================================================

/// Tree node: a split when `feature` is set, otherwise a leaf carrying the
/// positive-class probability in `value`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default)]
    pub feature: Option<usize>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub left: usize,
    #[serde(default)]
    pub right: usize,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Walk from the root; `x <= threshold` goes left
    fn leaf_value(&self, features: &[f64]) -> Result<f64, PredictError> {
        let mut index = 0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes
        for _ in 0..=self.nodes.len() {
            let node = self.nodes.get(index).ok_or(PredictError::MalformedTree(index))?;
            match node.feature {
                None => return Ok(node.value),
                Some(f) => {
                    let x = *features.get(f).ok_or(PredictError::MalformedTree(index))?;
                    index = if x <= node.threshold { node.left } else { node.right };
                }
            }
        }
        Err(PredictError::MalformedTree(index))
    }

    fn max_feature(&self) -> Option<usize> {
        self.nodes.iter().filter_map(|n| n.feature).max()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    /// Input width; 0 when the artifact omits it and the bundle supplies it
    #[serde(default)]
    pub n_features: usize,
    pub trees: Vec<DecisionTree>,
}

impl Predictor for RandomForest {
    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 2], PredictError> {
        check_width(self.n_features, features)?;
        if self.trees.is_empty() {
            return Err(PredictError::EmptyEnsemble);
        }

        let mut total = 0.0;
        for tree in &self.trees {
            total += tree.leaf_value(features)?;
        }
        distribution(total / self.trees.len() as f64)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn kind(&self) -> &'static str {
        "random_forest"
    }
}

impl RandomForest {
    /// Whether every split references a feature inside the declared width
    pub fn splits_in_range(&self) -> bool {
        self.trees
            .iter()
            .filter_map(DecisionTree::max_feature)
            .all(|f| f < self.n_features)
    }
}
