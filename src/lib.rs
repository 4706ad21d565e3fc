//! Lead Scoring Serving Core
//!
//! Loads a versioned, trained lead-conversion model, turns raw CRM lead
//! records into numerically safe feature vectors, and serves calibrated
//! probabilities with an independent confidence score through a batch API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   BATCH PREDICTION API (Axum)                │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌──────────────┐  ┌────────┐ │
//! │  │  Model    │  │  Feature  │  │ Calibration  │  │ Lead   │ │
//! │  │  Registry │  │  Guard    │  │ Engine       │  │ Store  │ │
//! │  └─────┬─────┘  └─────┬─────┘  └──────┬───────┘  └───┬────┘ │
//! │        └──────────────┴───────┬───────┴──────────────┘      │
//! │                               ▼                             │
//! │                      ┌────────────────┐                     │
//! │                      │ BatchPredictor │ ──► EventSink        │
//! │                      └────────────────┘                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod batch;
pub mod calibration;
pub mod config;
pub mod error;
pub mod features;
pub mod handlers;
pub mod model;
pub mod registry;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

pub use error::{AppError, AppResult};

use batch::BatchPredictor;
use calibration::CalibrationMonitor;
use registry::ModelRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub predictor: Arc<BatchPredictor>,
    pub monitor: Arc<CalibrationMonitor>,
}

impl AppState {
    pub fn new(predictor: BatchPredictor) -> Self {
        Self {
            registry: Arc::clone(predictor.registry()),
            monitor: Arc::clone(predictor.monitor()),
            predictor: Arc::new(predictor),
        }
    }
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    let prediction_routes = Router::new()
        .route("/api/v1/predictions/batch", post(handlers::predictions::batch));

    let model_routes = Router::new()
        .route("/api/v1/model/info", get(handlers::model::info))
        .route("/api/v1/model/list", get(handlers::model::list))
        .route("/api/v1/model/reload", post(handlers::model::reload))
        .route("/api/v1/model/validate", post(handlers::model::validate))
        .route("/api/v1/model/cache", delete(handlers::model::clear_cache))
        .route("/api/v1/calibration/stats", get(handlers::calibration::stats));

    Router::new()
        .route("/health", get(handlers::health::check))
        .merge(prediction_routes)
        .merge(model_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
