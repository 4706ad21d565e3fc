//! Preprocessing - feature scaler and optional feature selector

use serde::{Deserialize, Serialize};

use super::PredictError;

/// Serialized scaler stored under the bundle's `scaler` key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scaler {
    /// `(x - mean) / scale`
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// `(x - min) / (max - min)`
    MinMax { min_vals: Vec<f64>, max_vals: Vec<f64> },
    Identity,
}

impl Scaler {
    /// Expected input width; `None` accepts any width
    pub fn width(&self) -> Option<usize> {
        match self {
            Scaler::Standard { mean, .. } => Some(mean.len()),
            Scaler::MinMax { min_vals, .. } => Some(min_vals.len()),
            Scaler::Identity => None,
        }
    }

    /// Whether the parameter vectors agree with each other
    pub fn is_consistent(&self) -> bool {
        match self {
            Scaler::Standard { mean, scale } => mean.len() == scale.len(),
            Scaler::MinMax { min_vals, max_vals } => min_vals.len() == max_vals.len(),
            Scaler::Identity => true,
        }
    }

    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>, PredictError> {
        if let Some(expected) = self.width() {
            if expected != features.len() {
                return Err(PredictError::DimensionMismatch {
                    expected,
                    actual: features.len(),
                });
            }
        }

        let out: Vec<f64> = match self {
            Scaler::Standard { mean, scale } => features
                .iter()
                .zip(mean.iter().zip(scale))
                .map(|(x, (m, s))| {
                    // Zero-variance columns are centred only
                    let s = if s.abs() < 1e-12 { 1.0 } else { *s };
                    (x - m) / s
                })
                .collect(),
            Scaler::MinMax { min_vals, max_vals } => features
                .iter()
                .zip(min_vals.iter().zip(max_vals))
                .map(|(x, (lo, hi))| {
                    let range = (hi - lo).max(1e-8);
                    (x - lo) / range
                })
                .collect(),
            Scaler::Identity => features.to_vec(),
        };

        if out.iter().any(|v| !v.is_finite()) {
            return Err(PredictError::NonFinite);
        }
        Ok(out)
    }
}

/// Column mask stored under the bundle's optional `feature_selector` key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelector {
    pub support: Vec<bool>,
}

impl FeatureSelector {
    /// Number of columns kept
    pub fn output_width(&self) -> usize {
        self.support.iter().filter(|s| **s).count()
    }

    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>, PredictError> {
        if self.support.len() != features.len() {
            return Err(PredictError::DimensionMismatch {
                expected: self.support.len(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .zip(&self.support)
            .filter(|(_, keep)| **keep)
            .map(|(x, _)| *x)
            .collect())
    }
}
