//! Feature Safety Guard
//!
//! Converts arbitrary raw record values into a fixed-order, finite feature
//! vector and reports how much of it was genuinely present.
//!
//! ## Rules
//! 1. The predictor never sees NaN or infinite values.
//! 2. Coercion failures degrade to the configured default and are logged.
//! 3. A value equal to the numeric default does not count as present, so a
//!    defaulted value cannot masquerade as signal. A real value that happens
//!    to equal the default is undercounted as a consequence.

use std::collections::HashMap;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FeatureGuardConfig;

/// Symmetric bound used by [`InfPolicy::Clamp`]
pub const CLAMP_BOUND: f64 = 1e6;

/// String literals treated as missing
pub const NULL_LITERALS: &[&str] = &["", "nan", "none", "null"];

// ============================================================================
// POLICIES
// ============================================================================

/// Handling of not-a-number values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NanPolicy {
    /// Replace with the stored per-feature median (default if none)
    Impute,
    Zero,
    /// Replace with the numeric default
    Drop,
}

impl FromStr for NanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "impute" => Ok(NanPolicy::Impute),
            "zero" => Ok(NanPolicy::Zero),
            "drop" => Ok(NanPolicy::Drop),
            other => Err(format!("unknown NaN policy: {other}")),
        }
    }
}

/// Handling of infinite values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfPolicy {
    /// Clamp to `±CLAMP_BOUND`
    Clamp,
    Zero,
    /// Replace with the numeric default
    Drop,
}

impl FromStr for InfPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(InfPolicy::Clamp),
            "zero" => Ok(InfPolicy::Zero),
            "drop" => Ok(InfPolicy::Drop),
            other => Err(format!("unknown infinity policy: {other}")),
        }
    }
}

// ============================================================================
// RAW VALUES
// ============================================================================

/// A raw, untrusted feature value.
///
/// `serde_json::Value` cannot carry NaN or infinities, while derived
/// features can, so the guard works on this wider type.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFeature {
    Null,
    Number(f64),
    Bool(bool),
    Text(String),
    /// Arrays/objects and anything else without a scalar meaning
    Other(String),
}

impl From<&Value> for RawFeature {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => RawFeature::Null,
            Value::Bool(b) => RawFeature::Bool(*b),
            Value::Number(n) => n.as_f64().map(RawFeature::Number).unwrap_or(RawFeature::Null),
            Value::String(s) => RawFeature::Text(s.clone()),
            other => RawFeature::Other(other.to_string()),
        }
    }
}

impl From<Option<&Value>> for RawFeature {
    fn from(value: Option<&Value>) -> Self {
        value.map(RawFeature::from).unwrap_or(RawFeature::Null)
    }
}

impl From<f64> for RawFeature {
    fn from(value: f64) -> Self {
        RawFeature::Number(value)
    }
}

impl From<&str> for RawFeature {
    fn from(value: &str) -> Self {
        RawFeature::Text(value.to_string())
    }
}

fn is_null_literal(s: &str) -> bool {
    let lowered = s.trim().to_ascii_lowercase();
    NULL_LITERALS.contains(&lowered.as_str())
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// Safe feature vector aligned 1:1 with the model's feature names
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
    /// Fraction of entries genuinely present, in `[0, 1]`
    pub coverage_ratio: f64,
}

/// Diagnostics for a raw feature vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDiagnostics {
    pub total: usize,
    pub nan_count: usize,
    pub inf_count: usize,
    pub null_count: usize,
    pub valid_count: usize,
    pub coverage_ratio: f64,
    pub meets_threshold: bool,
    pub valid: bool,
}

// ============================================================================
// GUARD
// ============================================================================

/// Shared, thread-safe feature coercion component
#[derive(Debug)]
pub struct FeatureGuard {
    config: FeatureGuardConfig,
    medians: RwLock<HashMap<String, f64>>,
    coverage: RwLock<HashMap<String, f64>>,
}

impl FeatureGuard {
    pub fn new(config: FeatureGuardConfig) -> Self {
        Self {
            config,
            medians: RwLock::new(HashMap::new()),
            coverage: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FeatureGuardConfig {
        &self.config
    }

    pub fn default_numeric(&self) -> f64 {
        self.config.default_numeric
    }

    /// Replace the guard's own medians, used by [`NanPolicy::Impute`] when
    /// no model-specific medians are passed in
    pub fn set_feature_medians(&self, medians: HashMap<String, f64>) {
        *self.medians.write() = medians;
    }

    /// Last coverage ratio computed per feature name
    pub fn coverage_snapshot(&self) -> HashMap<String, f64> {
        self.coverage.read().clone()
    }

    /// Coerce a raw value into a finite number.
    pub fn safe_numeric_value(&self, value: &RawFeature, name: &str) -> f64 {
        self.numeric(value, name, &self.medians.read())
    }

    fn numeric(&self, value: &RawFeature, name: &str, medians: &HashMap<String, f64>) -> f64 {
        match value {
            RawFeature::Null => self.config.default_numeric,
            RawFeature::Number(x) => self.sanitize(*x, name, medians),
            RawFeature::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            RawFeature::Text(s) => match s.trim().parse::<f64>() {
                Ok(x) => self.sanitize(x, name, medians),
                Err(_) => {
                    if !is_null_literal(s) {
                        tracing::debug!(feature = name, value = %s, "Non-numeric feature value, using default");
                    }
                    self.config.default_numeric
                }
            },
            RawFeature::Other(s) => {
                tracing::warn!(feature = name, value = %s, "Unconvertible feature value, using default");
                self.config.default_numeric
            }
        }
    }

    /// Apply the NaN/infinity policies to a float
    fn sanitize(&self, x: f64, name: &str, medians: &HashMap<String, f64>) -> f64 {
        if x.is_nan() {
            return match self.config.nan_policy {
                NanPolicy::Impute => medians
                    .get(name)
                    .copied()
                    .filter(|m| m.is_finite())
                    .unwrap_or(self.config.default_numeric),
                NanPolicy::Zero => 0.0,
                NanPolicy::Drop => self.config.default_numeric,
            };
        }

        if x.is_infinite() {
            return match self.config.inf_policy {
                InfPolicy::Clamp => x.clamp(-CLAMP_BOUND, CLAMP_BOUND),
                InfPolicy::Zero => 0.0,
                InfPolicy::Drop => self.config.default_numeric,
            };
        }

        x
    }

    /// Coerce a raw value into a trimmed category label.
    pub fn safe_categorical_value(&self, value: &RawFeature, _name: &str) -> String {
        let text = match value {
            RawFeature::Null => return self.config.default_categorical.clone(),
            RawFeature::Number(x) if x.is_nan() => return self.config.default_categorical.clone(),
            RawFeature::Number(x) => x.to_string(),
            RawFeature::Bool(b) => b.to_string(),
            RawFeature::Text(s) | RawFeature::Other(s) => s.trim().to_string(),
        };

        if is_null_literal(&text) {
            self.config.default_categorical.clone()
        } else {
            text
        }
    }

    /// Whether a single raw value counts as genuinely present
    pub fn is_present(&self, value: &RawFeature) -> bool {
        match value {
            RawFeature::Null => false,
            RawFeature::Number(x) => x.is_finite() && *x != self.config.default_numeric,
            RawFeature::Bool(b) => (if *b { 1.0 } else { 0.0 }) != self.config.default_numeric,
            RawFeature::Text(s) | RawFeature::Other(s) => !is_null_literal(s),
        }
    }

    /// Fraction of `values` genuinely present; stored under `name`.
    pub fn calculate_feature_coverage(&self, values: &[RawFeature], name: &str) -> f64 {
        let ratio = if values.is_empty() {
            0.0
        } else {
            let present = values.iter().filter(|v| self.is_present(v)).count();
            present as f64 / values.len() as f64
        };

        self.coverage.write().insert(name.to_string(), ratio);
        ratio
    }

    /// Build a safe vector aligned with `names`, padding or truncating.
    pub fn safe_feature_vector(&self, values: &[RawFeature], names: &[String]) -> FeatureVector {
        self.safe_feature_vector_with_medians(values, names, &self.medians.read())
    }

    /// Like [`safe_feature_vector`](Self::safe_feature_vector), imputing NaN
    /// from `medians` instead of the guard's own table.
    pub fn safe_feature_vector_with_medians(
        &self,
        values: &[RawFeature],
        names: &[String],
        medians: &HashMap<String, f64>,
    ) -> FeatureVector {
        if values.len() != names.len() {
            tracing::warn!(
                values = values.len(),
                names = names.len(),
                "Feature count mismatch, aligning to feature names"
            );
        }

        let padding = RawFeature::Number(self.config.default_numeric);
        let mut present = 0usize;
        let safe: Vec<f64> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let raw = values.get(i).unwrap_or(&padding);
                if self.is_present(raw) {
                    present += 1;
                }
                self.numeric(raw, name, medians)
            })
            .collect();

        let coverage_ratio = if names.is_empty() {
            0.0
        } else {
            present as f64 / names.len() as f64
        };

        FeatureVector {
            values: safe,
            coverage_ratio,
        }
    }

    /// Diagnose a raw vector without modifying it.
    pub fn validate_feature_vector(&self, values: &[RawFeature], names: &[String]) -> FeatureDiagnostics {
        if values.len() != names.len() {
            tracing::debug!(
                values = values.len(),
                names = names.len(),
                "Validating vector whose length differs from feature names"
            );
        }

        let mut nan_count = 0;
        let mut inf_count = 0;
        let mut null_count = 0;
        let mut valid_count = 0;

        for value in values {
            match value {
                RawFeature::Number(x) if x.is_nan() => nan_count += 1,
                RawFeature::Number(x) if x.is_infinite() => inf_count += 1,
                RawFeature::Null => null_count += 1,
                RawFeature::Text(s) if is_null_literal(s) => null_count += 1,
                _ => {}
            }
            if self.is_present(value) {
                valid_count += 1;
            }
        }

        let coverage_ratio = if values.is_empty() {
            0.0
        } else {
            valid_count as f64 / values.len() as f64
        };
        let meets_threshold = coverage_ratio >= self.config.min_coverage;

        FeatureDiagnostics {
            total: values.len(),
            nan_count,
            inf_count,
            null_count,
            valid_count,
            coverage_ratio,
            meets_threshold,
            valid: meets_threshold && nan_count == 0 && inf_count == 0,
        }
    }
}

impl Default for FeatureGuard {
    fn default() -> Self {
        Self::new(FeatureGuardConfig::default())
    }
}
