//! Calibration monitoring handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::calibration::CalibrationStats;
use crate::AppState;

#[derive(Serialize)]
pub struct CalibrationStatsResponse {
    method: &'static str,
    window: usize,
    stats: CalibrationStats,
}

/// Drift summary over recently served calibrated probabilities
pub async fn stats(State(state): State<AppState>) -> Json<CalibrationStatsResponse> {
    Json(CalibrationStatsResponse {
        method: state.predictor.calibration_method(),
        window: state.monitor.len(),
        stats: state.monitor.stats(),
    })
}
