//! Shared fixtures for unit tests

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde_json::{json, Value};

use crate::config::RegistryConfig;
use crate::registry::ModelRegistry;
use crate::store::LeadRecord;

pub const FEATURES: [&str; 4] = ["gpa", "engagement_score", "lead_source_encoded", "gpa_x_engagement"];

/// A valid logistic-regression bundle over [`FEATURES`]
pub fn bundle_json() -> Value {
    json!({
        "model": {
            "type": "logistic_regression",
            "coefficients": [0.8, 0.5, 0.3, 0.2],
            "intercept": -0.4
        },
        "scaler": {
            "type": "standard",
            "mean": [3.0, 50.0, 1.5, 150.0],
            "scale": [0.5, 20.0, 1.0, 80.0]
        },
        "feature_names": FEATURES,
        "performance": {"auc": 0.84, "accuracy": 0.79, "trained_on": "2024-01-15"},
        "feature_importance": {
            "gpa": 0.4,
            "engagement_score": 0.3,
            "lead_source_encoded": 0.2,
            "gpa_x_engagement": 0.1
        },
        "feature_medians": {"gpa": 3.1, "engagement_score": 48.0}
    })
}

/// Write `bundle` as `name` inside `dir`
pub fn write_artifact(dir: &Path, name: &str, bundle: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(bundle).unwrap()).unwrap();
    path
}

/// Backdate a file's modification time
pub fn set_modified_ago(path: &Path, ago: Duration) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - ago).unwrap();
}

pub fn registry_config(dir: &Path, ttl: Duration) -> RegistryConfig {
    RegistryConfig {
        model_dir: dir.to_path_buf(),
        cache_ttl: ttl,
        ..Default::default()
    }
}

pub fn registry_for(dir: &Path) -> ModelRegistry {
    ModelRegistry::new(registry_config(dir, Duration::from_secs(300))).unwrap()
}

/// A lead with every field the fixture model reads
pub fn full_lead(id: &str) -> LeadRecord {
    LeadRecord::from_value(
        id,
        json!({
            "gpa": 3.6,
            "engagement_score": 72,
            "lead_source": "Referral",
            "program_level": "graduate"
        }),
    )
}
