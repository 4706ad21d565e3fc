//! Model registry handlers

use std::path::PathBuf;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::registry::ArtifactInfo;
use crate::{AppError, AppResult, AppState};

#[derive(Serialize)]
pub struct ModelListResponse {
    count: usize,
    models: Vec<ArtifactInfo>,
}

#[derive(Serialize)]
pub struct ReloadResponse {
    status: &'static str,
    version: String,
    model_hash: String,
    loaded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidateRequest {
    /// Artifact to check, relative to the model directory. Paths that leave
    /// the directory or do not match the artifact pattern are invalid.
    pub path: Option<PathBuf>,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    path: Option<PathBuf>,
    valid: bool,
}

/// Metadata of the cached model; never triggers a load
pub async fn info(State(state): State<AppState>) -> Response {
    match state.registry.get_model_info() {
        Some(info) => Json(info).into_response(),
        None => Json(json!({ "status": "no model loaded" })).into_response(),
    }
}

/// Every matching artifact on disk, newest first
pub async fn list(State(state): State<AppState>) -> AppResult<Json<ModelListResponse>> {
    let registry = state.registry.clone();
    let models = tokio::task::spawn_blocking(move || registry.list_available_models())
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(Json(ModelListResponse {
        count: models.len(),
        models,
    }))
}

/// Force a reload of the latest artifact
pub async fn reload(State(state): State<AppState>) -> AppResult<Json<ReloadResponse>> {
    let registry = state.registry.clone();
    let model = tokio::task::spawn_blocking(move || registry.load_active(true))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))??;

    tracing::info!(version = %model.version, hash = %model.content_hash, "Model reloaded on request");

    Ok(Json(ReloadResponse {
        status: "reloaded",
        version: model.version.clone(),
        model_hash: model.content_hash.clone(),
        loaded_at: model.loaded_at,
    }))
}

/// Check an artifact without touching the cache
pub async fn validate(
    State(state): State<AppState>,
    body: Option<Json<ValidateRequest>>,
) -> AppResult<Json<ValidateResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let path = request.path;

    let registry = state.registry.clone();
    let target = path.clone();
    let valid = tokio::task::spawn_blocking(move || registry.validate_model_integrity(target.as_deref()))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(Json(ValidateResponse { path, valid }))
}

/// Drop the cached model
pub async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.registry.clear_cache();
    tracing::info!("Model cache cleared on request");
    Json(json!({ "status": "cleared" }))
}
