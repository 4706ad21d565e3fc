use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio_test::{assert_err, assert_ok};

use super::{normalize_request, BatchError, BatchPredictor, BatchRequest, RequestError, SCHEMA_VERSION};
use crate::calibration::{CalibrationEngine, CalibrationMonitor};
use crate::config::BatchConfig;
use crate::features::{FeatureGuard, RawFeature};
use crate::store::{InMemoryLeadStore, LeadRecord, LeadStore, StoreError};
use crate::telemetry::{EventType, MemorySink};
use crate::test_support::{bundle_json, full_lead, registry_for, write_artifact, FEATURES};

struct Harness {
    predictor: BatchPredictor,
    guard: Arc<FeatureGuard>,
    events: Arc<MemorySink>,
}

fn harness_with_store(dir: &Path, store: Arc<dyn LeadStore>) -> Harness {
    let guard = Arc::new(FeatureGuard::default());
    let events = Arc::new(MemorySink::default());
    let predictor = BatchPredictor::new(
        Arc::new(registry_for(dir)),
        Arc::clone(&guard),
        CalibrationEngine::default(),
        Arc::new(CalibrationMonitor::default()),
        store,
        events.clone(),
        BatchConfig::default(),
    );
    Harness {
        predictor,
        guard,
        events,
    }
}

fn harness(dir: &Path, records: Vec<LeadRecord>) -> Harness {
    harness_with_store(dir, Arc::new(InMemoryLeadStore::new(records)))
}

fn request(value: Value) -> BatchRequest {
    serde_json::from_value(value).unwrap()
}

struct FailingStore;

#[async_trait]
impl LeadStore for FailingStore {
    async fn fetch_many(&self, _lead_ids: &[String]) -> Result<HashMap<String, LeadRecord>, StoreError> {
        Err(StoreError::Query("connection refused".to_string()))
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

#[test]
fn test_normalize_both_shapes_agree() {
    let bare = normalize_request(request(json!(["a", "b"])), 1000).unwrap();
    let wrapped = normalize_request(request(json!({"lead_ids": ["a", "b"]})), 1000).unwrap();

    assert_eq!(bare, vec!["a", "b"]);
    assert_eq!(bare, wrapped);
}

#[test]
fn test_normalize_unwraps_and_stringifies() {
    let ids = normalize_request(
        request(json!([{"lead_id": "L1"}, {"id": 7}, 42, " L9 ", {"name": "x"}, null])),
        1000,
    )
    .unwrap();

    assert_eq!(ids, vec!["L1", "7", "42", "L9", r#"{"name":"x"}"#, ""]);
}

#[test]
fn test_normalize_rejects_empty_and_oversized() {
    assert_eq!(normalize_request(request(json!([])), 1000), Err(RequestError::Empty));
    assert_eq!(
        normalize_request(request(json!({"lead_ids": []})), 1000),
        Err(RequestError::Empty)
    );

    let oversized: Vec<String> = (0..1001).map(|i| format!("L{i}")).collect();
    assert_eq!(
        normalize_request(request(json!(oversized)), 1000),
        Err(RequestError::TooLarge { count: 1001, max: 1000 })
    );

    let at_limit: Vec<String> = (0..1000).map(|i| format!("L{i}")).collect();
    assert_eq!(normalize_request(request(json!(at_limit)), 1000).unwrap().len(), 1000);
}

#[test]
fn test_unknown_wrapper_does_not_parse() {
    assert!(serde_json::from_value::<BatchRequest>(json!({"ids": ["a"]})).is_err());
    assert!(serde_json::from_value::<BatchRequest>(json!("L1")).is_err());
}

// ============================================================================
// ORCHESTRATION
// ============================================================================

#[tokio::test]
async fn test_partial_batch_one_resolved_one_missing() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_20240301_120000.json", &bundle_json());
    let h = harness(dir.path(), vec![full_lead("L1")]);

    let response = assert_ok!(h.predictor.predict(request(json!(["L1", "L2"]))).await);

    assert_eq!(response.total_processed, 2);
    assert_eq!(response.successful_predictions, 1);
    assert_eq!(response.failed_predictions, 1);
    assert_eq!(response.predictions.len(), 1);
    assert_eq!(response.schema_version, SCHEMA_VERSION);
    assert_eq!(response.model_version, "20240301_120000");
    assert_eq!(response.model_hash.len(), 64);
    assert!(!response.cache_hit);

    let item = &response.predictions[0];
    assert_eq!(item.lead_id, "L1");
    for p in [item.raw_probability, item.calibrated_probability, item.confidence] {
        assert!((0.0..=1.0).contains(&p));
    }
    assert_eq!(item.features_present_ratio, 1.0);
    assert!(item.prediction);

    assert_eq!(response.failures[0].lead_id, "L2");
    assert_eq!(response.failures[0].reason, "lead not found");

    let again = assert_ok!(h.predictor.predict(request(json!({"lead_ids": ["L1"]}))).await);
    assert!(again.cache_hit);
}

#[tokio::test]
async fn test_missing_scaler_is_model_unavailable() {
    let dir = tempdir().unwrap();
    let mut bundle = bundle_json();
    bundle.as_object_mut().unwrap().remove("scaler");
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle);
    let h = harness(dir.path(), vec![full_lead("L1")]);

    let err = assert_err!(h.predictor.predict(request(json!(["L1"]))).await);

    assert!(matches!(err, BatchError::ModelUnavailable(_)));
    assert_eq!(h.events.count(EventType::RequestFailed), 1);
    assert_eq!(h.events.count(EventType::RequestSucceeded), 0);
}

#[tokio::test]
async fn test_invalid_request_rejected_before_model_work() {
    // No artifact at all: a model lookup would fail with ModelUnavailable
    let dir = tempdir().unwrap();
    let h = harness(dir.path(), vec![]);

    let err = assert_err!(h.predictor.predict(request(json!([]))).await);

    assert!(matches!(err, BatchError::InvalidRequest(RequestError::Empty)));
    assert!(!h.predictor.registry().is_loaded());
    assert_eq!(h.events.count(EventType::RequestStarted), 0);
}

#[tokio::test]
async fn test_store_failure_rejects_batch() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let h = harness_with_store(dir.path(), Arc::new(FailingStore));

    let err = assert_err!(h.predictor.predict(request(json!(["L1"]))).await);
    assert!(matches!(err, BatchError::Store(_)));
}

#[tokio::test]
async fn test_per_item_errors_are_isolated() {
    let dir = tempdir().unwrap();
    // Inputs above the split route to a node that does not exist
    let mut bundle = bundle_json();
    bundle["scaler"] = json!({"type": "identity"});
    bundle["model"] = json!({
        "type": "random_forest",
        "n_features": 4,
        "trees": [{"nodes": [
            {"feature": 0, "threshold": 1.0, "left": 1, "right": 7},
            {"value": 0.7}
        ]}]
    });
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle);

    let low = LeadRecord::from_value("low", json!({"gpa": 0.5, "engagement_score": 10}));
    let h = harness(dir.path(), vec![low, full_lead("high")]);

    let response = assert_ok!(h.predictor.predict(request(json!(["low", "high", ""]))).await);

    assert_eq!(response.total_processed, 3);
    assert_eq!(response.successful_predictions, 1);
    assert_eq!(response.failed_predictions, 2);
    assert_eq!(response.predictions[0].lead_id, "low");
    assert!((response.predictions[0].raw_probability - 0.7).abs() < 1e-12);

    let failed: Vec<&str> = response.failures.iter().map(|f| f.lead_id.as_str()).collect();
    assert_eq!(failed, vec!["high", ""]);
    assert!(response.failures[0].reason.contains("malformed tree"));
}

#[tokio::test]
async fn test_duplicates_are_each_processed() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let h = harness(dir.path(), vec![full_lead("L1")]);

    let response = assert_ok!(h.predictor.predict(request(json!(["L1", "L1", "L1"]))).await);

    assert_eq!(response.successful_predictions, 3);
    assert!(response.predictions.iter().all(|p| p == &response.predictions[0]));
}

#[tokio::test]
async fn test_processed_equals_succeeded_plus_failed() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let sparse = LeadRecord::from_value("S", json!({"gpa": "n/a", "engagement_score": null}));
    let h = harness(dir.path(), vec![full_lead("A"), full_lead("B"), sparse]);

    let inputs = [
        json!(["A"]),
        json!(["missing"]),
        json!(["A", "B", "S", "nope", ""]),
        json!({"lead_ids": [{"lead_id": "B"}, 17, "A"]}),
    ];

    for input in inputs {
        let response = assert_ok!(h.predictor.predict(request(input)).await);
        assert_eq!(
            response.total_processed,
            response.successful_predictions + response.failed_predictions
        );
        assert_eq!(response.predictions.len(), response.successful_predictions);
        assert_eq!(response.failures.len(), response.failed_predictions);
    }
}

#[tokio::test]
async fn test_sparse_lead_reports_low_coverage() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let sparse = LeadRecord::from_value("S", json!({"gpa": 3.2}));
    let h = harness(dir.path(), vec![sparse]);

    let response = assert_ok!(h.predictor.predict(request(json!(["S"]))).await);

    assert_eq!(response.successful_predictions, 1);
    assert_eq!(response.predictions[0].features_present_ratio, 0.25);
}

#[tokio::test]
async fn test_events_monitor_and_medians() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let h = harness(dir.path(), vec![full_lead("L1"), full_lead("L2")]);

    assert_ok!(h.predictor.predict(request(json!(["L1", "L2"]))).await);

    for event_type in [
        EventType::RequestStarted,
        EventType::ModelLoaded,
        EventType::FeatureEngineering,
        EventType::Calibration,
        EventType::RequestSucceeded,
    ] {
        assert_eq!(h.events.count(event_type), 1, "{}", event_type.as_str());
    }

    let events = h.events.events();
    let request_id = events[0].request_id;
    assert!(events.iter().all(|e| e.request_id == request_id));

    assert_eq!(h.predictor.monitor().len(), 2);
    assert_eq!(h.guard.coverage_snapshot().len(), FEATURES.len());
    assert_eq!(h.guard.coverage_snapshot()["gpa"], 1.0);

    let calibration = events
        .iter()
        .find(|e| e.event_type == EventType::Calibration)
        .unwrap();
    assert_eq!(calibration.details["neutral_fallbacks"], 0);
    assert_eq!(calibration.details["method"], "sigmoid");
}

#[tokio::test]
async fn test_nan_imputed_from_model_medians() {
    let dir = tempdir().unwrap();
    let mut bundle = bundle_json();
    let object = bundle.as_object_mut().unwrap();
    object.insert("feature_names".to_string(), json!(["gpa", "engagement_score"]));
    object.insert(
        "model".to_string(),
        json!({"type": "logistic_regression", "coefficients": [0.8, 0.5], "intercept": -0.4}),
    );
    object.insert(
        "scaler".to_string(),
        json!({"type": "standard", "mean": [3.0, 50.0], "scale": [0.5, 20.0]}),
    );
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle);

    let missing_gpa = LeadRecord::from_value("NAN", json!({"gpa": "NaN", "engagement_score": 48}));
    let median_gpa = LeadRecord::from_value("MED", json!({"gpa": 3.1, "engagement_score": 48}));
    let h = harness(dir.path(), vec![missing_gpa, median_gpa]);

    let response = assert_ok!(h.predictor.predict(request(json!(["NAN", "MED"]))).await);

    assert_eq!(response.successful_predictions, 2);
    let imputed = &response.predictions[0];
    let reference = &response.predictions[1];
    assert!((imputed.raw_probability - reference.raw_probability).abs() < 1e-12);
    // Imputed values are not counted as present
    assert_eq!(imputed.features_present_ratio, 0.5);

    // Serving a model does not rewrite the shared guard
    assert_eq!(h.guard.safe_numeric_value(&RawFeature::Number(f64::NAN), "gpa"), 0.0);
}
