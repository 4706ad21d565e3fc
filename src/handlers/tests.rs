use std::path::Path;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::tempdir;
use tower::ServiceExt;

use crate::batch::BatchPredictor;
use crate::calibration::{CalibrationEngine, CalibrationMonitor};
use crate::config::BatchConfig;
use crate::features::FeatureGuard;
use crate::store::InMemoryLeadStore;
use crate::telemetry::TracingSink;
use crate::test_support::{bundle_json, full_lead, registry_for, write_artifact};
use crate::{create_router, AppState};

fn app(dir: &Path) -> Router {
    let predictor = BatchPredictor::new(
        Arc::new(registry_for(dir)),
        Arc::new(FeatureGuard::default()),
        CalibrationEngine::default(),
        Arc::new(CalibrationMonitor::default()),
        Arc::new(InMemoryLeadStore::new([full_lead("L1")])),
        Arc::new(TracingSink),
        BatchConfig::default(),
    );
    create_router(AppState::new(predictor))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let dir = tempdir().unwrap();
    let (status, body) = send(&app(dir.path()), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn test_batch_success() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let app = app(dir.path());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/predictions/batch",
        Some(json!({"lead_ids": ["L1", "L2"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schema_version"], "2.0");
    assert_eq!(body["total_processed"], 2);
    assert_eq!(body["successful_predictions"], 1);
    assert_eq!(body["failed_predictions"], 1);
    assert_eq!(body["predictions"][0]["lead_id"], "L1");
    assert_eq!(body["failures"][0]["lead_id"], "L2");
}

#[tokio::test]
async fn test_batch_rejects_empty_and_oversized() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let app = app(dir.path());

    let (status, _) = send(&app, Method::POST, "/api/v1/predictions/batch", Some(json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let ids: Vec<String> = (0..1001).map(|i| format!("L{i}")).collect();
    let (status, body) = send(&app, Method::POST, "/api/v1/predictions/batch", Some(json!(ids))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_batch_rejects_malformed_body() {
    let dir = tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = send(&app, Method::POST, "/api/v1/predictions/batch", Some(json!({"ids": ["L1"]}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("malformed request"));
}

#[tokio::test]
async fn test_batch_missing_scaler_is_service_unavailable() {
    let dir = tempdir().unwrap();
    let mut bundle = bundle_json();
    bundle.as_object_mut().unwrap().remove("scaler");
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle);

    let (status, body) = send(
        &app(dir.path()),
        Method::POST,
        "/api/v1/predictions/batch",
        Some(json!(["L1"])),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Model loading failed");
    assert!(body["detail"].as_str().unwrap().contains("scaler"));
}

#[tokio::test]
async fn test_model_lifecycle_endpoints() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let app = app(dir.path());

    let (_, body) = send(&app, Method::GET, "/api/v1/model/info", None).await;
    assert_eq!(body["status"], "no model loaded");

    let (status, body) = send(&app, Method::POST, "/api/v1/model/reload", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], "v1");

    let (_, body) = send(&app, Method::GET, "/api/v1/model/info", None).await;
    assert_eq!(body["version"], "v1");
    assert_eq!(body["feature_count"], 4);

    let (_, body) = send(&app, Method::GET, "/api/v1/model/list", None).await;
    assert_eq!(body["count"], 1);

    let (_, body) = send(&app, Method::POST, "/api/v1/model/validate", None).await;
    assert_eq!(body["valid"], true);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/v1/model/validate",
        Some(json!({"path": "does_not_exist.json"})),
    )
    .await;
    assert_eq!(body["valid"], false);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/v1/model/validate",
        Some(json!({"path": "lead_scoring_model_v1.json"})),
    )
    .await;
    assert_eq!(body["valid"], true);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/v1/model/validate",
        Some(json!({"path": "../lead_scoring_model_v1.json"})),
    )
    .await;
    assert_eq!(body["valid"], false);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/v1/model/validate",
        Some(json!({"path": "/dev/zero"})),
    )
    .await;
    assert_eq!(body["valid"], false);

    let (status, _) = send(&app, Method::DELETE, "/api/v1/model/cache", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, Method::GET, "/api/v1/model/info", None).await;
    assert_eq!(body["status"], "no model loaded");
}

#[tokio::test]
async fn test_reload_without_artifact_is_service_unavailable() {
    let dir = tempdir().unwrap();
    let (status, body) = send(&app(dir.path()), Method::POST, "/api/v1/model/reload", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], 503);
}

#[tokio::test]
async fn test_calibration_stats_track_served_predictions() {
    let dir = tempdir().unwrap();
    write_artifact(dir.path(), "lead_scoring_model_v1.json", &bundle_json());
    let app = app(dir.path());

    let (_, body) = send(&app, Method::GET, "/api/v1/calibration/stats", None).await;
    assert_eq!(body["window"], 0);

    send(&app, Method::POST, "/api/v1/predictions/batch", Some(json!(["L1", "L1"]))).await;

    let (status, body) = send(&app, Method::GET, "/api/v1/calibration/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["method"], "sigmoid");
    assert_eq!(body["window"], 2);
    assert_eq!(body["stats"]["count"], 2);
}
