//! Batch prediction handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::batch::{BatchRequest, BatchResponse};
use crate::{AppResult, AppState};

/// Score a batch of leads
pub async fn batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> AppResult<Json<BatchResponse>> {
    let Json(request) = payload?;
    let response = state.predictor.predict(request).await?;

    tracing::info!(
        version = %response.model_version,
        processed = response.total_processed,
        failed = response.failed_predictions,
        elapsed_ms = response.processing_time_ms,
        "Batch prediction served"
    );

    Ok(Json(response))
}
