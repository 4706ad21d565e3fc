//! Artifact Bundle - parsing, verification, hashing and versioning
//!
//! A bundle is immutable once written. Rotation means dropping a newer
//! file next to the old one, never editing a file in place.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::RegistryError;
use crate::model::{FeatureSelector, PredictError, Predictor, PredictorSpec, Scaler};

/// Keys every bundle must carry
pub const REQUIRED_KEYS: &[&str] = &[
    "model",
    "scaler",
    "feature_names",
    "performance",
    "feature_importance",
];

/// Read size used while hashing
pub const HASH_CHUNK_SIZE: usize = 8192;

/// Version timestamp format used when the file name carries no version
pub const VERSION_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

// ============================================================================
// BUNDLE
// ============================================================================

#[derive(Deserialize)]
struct BundleFile {
    model: PredictorSpec,
    scaler: Scaler,
    feature_names: Vec<String>,
    performance: BTreeMap<String, Value>,
    feature_importance: BTreeMap<String, f64>,
    #[serde(default)]
    feature_selector: Option<FeatureSelector>,
    #[serde(default)]
    feature_medians: HashMap<String, f64>,
}

/// Deserialized, verified artifact contents
#[derive(Debug)]
pub struct ArtifactBundle {
    pub predictor: Box<dyn Predictor>,
    pub scaler: Scaler,
    pub feature_names: Vec<String>,
    pub performance: BTreeMap<String, Value>,
    pub feature_importance: BTreeMap<String, f64>,
    pub feature_selector: Option<FeatureSelector>,
    pub feature_medians: HashMap<String, f64>,
}

impl ArtifactBundle {
    /// Read, deserialize and verify a bundle file
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        Self::read_hashed(path).map(|(bundle, _)| bundle)
    }

    /// Read a bundle file once, returning the verified bundle together with
    /// the SHA-256 of exactly the bytes it was parsed from.
    pub fn read_hashed(path: &Path) -> Result<(Self, String), RegistryError> {
        let bytes = std::fs::read(path).map_err(|source| RegistryError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let content_hash = hash_bytes(&bytes);
        let bundle = Self::from_slice(&bytes).map_err(|reason| RegistryError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok((bundle, content_hash))
    }

    /// Deserialize and verify bundle bytes; errors describe the corruption
    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| format!("not a valid bundle document: {e}"))?;

        let object = value
            .as_object()
            .ok_or_else(|| "bundle is not a key/value mapping".to_string())?;
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|k| !object.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required keys: {}", missing.join(", ")));
        }

        let mut file: BundleFile =
            serde_json::from_value(value).map_err(|e| format!("invalid bundle contents: {e}"))?;

        let input_width = file
            .feature_selector
            .as_ref()
            .map(FeatureSelector::output_width)
            .unwrap_or(file.feature_names.len());
        if let PredictorSpec::RandomForest(forest) = &mut file.model {
            if forest.n_features == 0 {
                forest.n_features = input_width;
            }
            if !forest.splits_in_range() {
                return Err("random forest splits on a feature outside its width".to_string());
            }
        }

        let bundle = ArtifactBundle {
            predictor: file.model.into_predictor(),
            scaler: file.scaler,
            feature_names: file.feature_names,
            performance: file.performance,
            feature_importance: file.feature_importance,
            feature_selector: file.feature_selector,
            feature_medians: file.feature_medians,
        };
        bundle.verify()?;
        Ok(bundle)
    }

    /// Structural checks: widths line up and both predictor capabilities
    /// answer a probe on a neutral input.
    pub fn verify(&self) -> Result<(), String> {
        let width = self.feature_names.len();
        if width == 0 {
            return Err("feature_names is empty".to_string());
        }
        if !self.scaler.is_consistent() {
            return Err("scaler parameters disagree in length".to_string());
        }
        if let Some(expected) = self.scaler.width() {
            if expected != width {
                return Err(format!("scaler expects {expected} features, bundle names {width}"));
            }
        }
        if let Some(selector) = &self.feature_selector {
            if selector.support.len() != width {
                return Err(format!(
                    "feature selector covers {} features, bundle names {width}",
                    selector.support.len()
                ));
            }
        }
        if self.input_width() != self.predictor.n_features() {
            return Err(format!(
                "predictor expects {} features, preprocessing yields {}",
                self.predictor.n_features(),
                self.input_width()
            ));
        }

        let probe = self
            .transform(&vec![0.0; width])
            .map_err(|e| format!("preprocessing probe failed: {e}"))?;
        self.predictor
            .predict(&probe)
            .map_err(|e| format!("label prediction unavailable: {e}"))?;
        let proba = self
            .predictor
            .predict_proba(&probe)
            .map_err(|e| format!("probability prediction unavailable: {e}"))?;
        if proba.iter().any(|p| !p.is_finite() || *p < 0.0) || (proba[0] + proba[1] - 1.0).abs() > 1e-6 {
            return Err("probability prediction is not a distribution".to_string());
        }

        Ok(())
    }

    /// Width of the vector handed to the predictor
    pub fn input_width(&self) -> usize {
        self.feature_selector
            .as_ref()
            .map(FeatureSelector::output_width)
            .unwrap_or(self.feature_names.len())
    }

    /// Scale, then select
    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>, PredictError> {
        let scaled = self.scaler.transform(features)?;
        match &self.feature_selector {
            Some(selector) => selector.transform(&scaled),
            None => Ok(scaled),
        }
    }

    /// Full preprocessing + probability prediction for one safe vector
    pub fn predict_distribution(&self, features: &[f64]) -> Result<[f64; 2], PredictError> {
        let prepared = self.transform(features)?;
        self.predictor.predict_proba(&prepared)
    }
}

// ============================================================================
// HASHING & VERSIONING
// ============================================================================

/// SHA-256 of a file, read in fixed-size chunks
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, fed in the same chunk size as files
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(HASH_CHUNK_SIZE) {
        hasher.update(chunk);
    }
    hex::encode(hasher.finalize())
}

/// Version from the file stem with `prefix` stripped, or the modification
/// time when the stem does not carry the prefix.
pub fn derive_version(path: &Path, prefix: &str, modified: SystemTime) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    match stem.strip_prefix(prefix) {
        Some(version) if !prefix.is_empty() && !version.is_empty() => version.to_string(),
        _ => DateTime::<Utc>::from(modified)
            .format(VERSION_TIME_FORMAT)
            .to_string(),
    }
}
