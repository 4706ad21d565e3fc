//! Calibration Engine
//!
//! Maps raw classifier probabilities to operationally bounded, calibrated
//! probabilities and derives a confidence score from the full probability
//! distribution. The two signals are independent: calibration decides what
//! probability is acted on, confidence says how far that number is trusted.
//!
//! Every invalid numeric path resolves to [`NEUTRAL`] and is logged, never
//! raised.

pub mod monitor;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;

pub use monitor::CalibrationMonitor;

/// Neutral probability returned for any invalid input
pub const NEUTRAL: f64 = 0.5;

// ============================================================================
// METHODS
// ============================================================================

/// Calibration method applied to raw probabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Logistic squashing of `steepness * (x - center)`
    Sigmoid { steepness: f64, center: f64 },
    /// Linear rescale of `[0, 1]` into `[min, max]`
    Linear { min: f64, max: f64 },
    /// Identity (after validation and clamping)
    None,
}

impl Default for CalibrationMethod {
    fn default() -> Self {
        CalibrationMethod::Sigmoid {
            steepness: 2.0,
            center: 0.5,
        }
    }
}

impl CalibrationMethod {
    /// Resolve a method by name with default parameters.
    ///
    /// Unknown names resolve to [`CalibrationMethod::None`], which returns the
    /// clamped raw value unchanged.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "sigmoid" => Self::default(),
            "linear" => CalibrationMethod::Linear { min: 0.05, max: 0.95 },
            "none" | "identity" => CalibrationMethod::None,
            other => {
                tracing::warn!(method = other, "Unknown calibration method, passing through");
                CalibrationMethod::None
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CalibrationMethod::Sigmoid { .. } => "sigmoid",
            CalibrationMethod::Linear { .. } => "linear",
            CalibrationMethod::None => "none",
        }
    }
}

/// Confidence derivation from a probability distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMethod {
    /// `2 * |max(p) - 0.5|`
    MaxDistance,
    /// `1 - H(p) / H_max`
    Entropy,
    /// `1 - min(1, 4 * var(p))`
    Variance,
}

impl FromStr for ConfidenceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max_distance" => Ok(ConfidenceMethod::MaxDistance),
            "entropy" => Ok(ConfidenceMethod::Entropy),
            "variance" => Ok(ConfidenceMethod::Variance),
            other => Err(format!("unknown confidence method: {other}")),
        }
    }
}

// ============================================================================
// SCALAR FUNCTIONS
// ============================================================================

/// Logistic squashing of `steepness * (x - center)`, clamped to `[0, 1]`.
pub fn sigmoid(x: f64, steepness: f64, center: f64) -> f64 {
    let z = steepness * (x - center);
    if !z.is_finite() {
        tracing::debug!(x, steepness, center, "Sigmoid input not finite, using neutral");
        return NEUTRAL;
    }

    let value = 1.0 / (1.0 + (-z).exp());
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        NEUTRAL
    }
}

/// Calibrate a raw model probability.
///
/// NaN/infinite input yields [`NEUTRAL`]; otherwise the value is clamped to
/// `[0, 1]` before the method is applied.
pub fn calibrate_probability(raw: f64, method: &CalibrationMethod) -> f64 {
    if !raw.is_finite() {
        tracing::warn!(raw, "Invalid raw probability, calibrating to neutral");
        return NEUTRAL;
    }
    let clamped = raw.clamp(0.0, 1.0);

    let calibrated = match *method {
        CalibrationMethod::Sigmoid { steepness, center } => sigmoid(clamped, steepness, center),
        CalibrationMethod::Linear { min, max } => min + clamped * (max - min),
        CalibrationMethod::None => clamped,
    };

    if calibrated.is_finite() {
        calibrated.clamp(0.0, 1.0)
    } else {
        NEUTRAL
    }
}

/// Calibrate a JSON value; non-numbers are neutralised.
pub fn calibrate_value(raw: &serde_json::Value, method: &CalibrationMethod) -> f64 {
    match raw.as_f64() {
        Some(value) => calibrate_probability(value, method),
        None => {
            tracing::warn!(value = %raw, "Non-numeric probability, calibrating to neutral");
            NEUTRAL
        }
    }
}

/// Confidence of a probability distribution.
///
/// Empty, degenerate or invalid distributions yield [`NEUTRAL`].
pub fn calculate_confidence(distribution: &[f64], method: ConfidenceMethod) -> f64 {
    if distribution.is_empty() || distribution.iter().any(|p| !p.is_finite()) {
        tracing::debug!(len = distribution.len(), "Invalid distribution, neutral confidence");
        return NEUTRAL;
    }

    let confidence = match method {
        ConfidenceMethod::MaxDistance => {
            let max = distribution.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            2.0 * (max - 0.5).abs()
        }
        ConfidenceMethod::Entropy => {
            if distribution.len() < 2 || distribution.iter().any(|&p| p < 0.0) {
                return NEUTRAL;
            }
            let total: f64 = distribution.iter().sum();
            if total <= 0.0 {
                return NEUTRAL;
            }
            let entropy: f64 = distribution
                .iter()
                .map(|&p| p / total)
                .filter(|&p| p > 0.0)
                .map(|p| -p * p.ln())
                .sum();
            let max_entropy = (distribution.len() as f64).ln();
            1.0 - entropy / max_entropy
        }
        ConfidenceMethod::Variance => {
            let n = distribution.len() as f64;
            let mean = distribution.iter().sum::<f64>() / n;
            let variance = distribution.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
            1.0 - (4.0 * variance).min(1.0)
        }
    };

    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        NEUTRAL
    }
}

/// Hard clamp into `[min, max]`; NaN/infinite input yields [`NEUTRAL`].
///
/// Inverted bounds are swapped so the result is always inside the band.
/// A non-finite bound falls back to the matching edge of `[0, 1]`.
pub fn apply_probability_bounds(p: f64, min: f64, max: f64) -> f64 {
    let min = if min.is_finite() { min } else { 0.0 };
    let max = if max.is_finite() { max } else { 1.0 };
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if !p.is_finite() {
        return NEUTRAL.clamp(lo, hi);
    }
    p.clamp(lo, hi)
}

// ============================================================================
// BATCH VARIANTS
// ============================================================================

pub fn calibrate_batch(raw: &[f64], method: &CalibrationMethod) -> Vec<f64> {
    raw.iter().map(|&p| calibrate_probability(p, method)).collect()
}

pub fn confidence_batch(distributions: &[Vec<f64>], method: ConfidenceMethod) -> Vec<f64> {
    distributions
        .iter()
        .map(|d| calculate_confidence(d, method))
        .collect()
}

pub fn bounds_batch(probabilities: &[f64], min: f64, max: f64) -> Vec<f64> {
    probabilities
        .iter()
        .map(|&p| apply_probability_bounds(p, min, max))
        .collect()
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Summary of a set of calibrated probabilities, for drift monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStats {
    pub count: usize,
    pub invalid_count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub q25: f64,
    pub q75: f64,
}

/// Statistics over the valid (finite, within `[0, 1]`) subset.
pub fn get_calibration_stats(probabilities: &[f64]) -> CalibrationStats {
    let mut valid: Vec<f64> = probabilities
        .iter()
        .copied()
        .filter(|p| p.is_finite() && (0.0..=1.0).contains(p))
        .collect();
    let invalid_count = probabilities.len() - valid.len();

    if valid.is_empty() {
        return CalibrationStats {
            invalid_count,
            ..Default::default()
        };
    }

    valid.sort_by(|a, b| a.total_cmp(b));
    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let variance = valid.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;

    CalibrationStats {
        count: valid.len(),
        invalid_count,
        mean,
        std: variance.sqrt(),
        min: valid[0],
        max: valid[valid.len() - 1],
        median: quantile(&valid, 0.5),
        q25: quantile(&valid, 0.25),
        q75: quantile(&valid, 0.75),
    }
}

/// Linear-interpolated quantile of sorted, non-empty data
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

// ============================================================================
// ENGINE
// ============================================================================

/// Calibrated output for one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibrated {
    pub probability: f64,
    pub confidence: f64,
    /// The raw value or distribution was invalid and neutralised
    pub neutralized: bool,
}

/// Configured calibration pipeline: calibrate, bound, then score confidence
#[derive(Debug, Clone)]
pub struct CalibrationEngine {
    config: CalibrationConfig,
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrate `raw` and derive confidence from `distribution`.
    pub fn apply(&self, raw: f64, distribution: &[f64]) -> Calibrated {
        let calibrated = calibrate_probability(raw, &self.config.method);
        let probability = apply_probability_bounds(
            calibrated,
            self.config.min_probability,
            self.config.max_probability,
        );
        let confidence = calculate_confidence(distribution, self.config.confidence_method);
        let neutralized =
            !raw.is_finite() || distribution.is_empty() || distribution.iter().any(|p| !p.is_finite());

        Calibrated {
            probability,
            confidence,
            neutralized,
        }
    }
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}
