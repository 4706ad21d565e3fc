//! Prediction Event Types
//!
//! Timestamped, structured events emitted by the serving core. Transport
//! and storage belong to whichever sink receives them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Categories of serving events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RequestStarted,
    RequestSucceeded,
    RequestFailed,
    /// A model artifact was read from disk and installed
    ModelLoaded,
    /// Per-batch feature coverage summary
    FeatureEngineering,
    /// Per-batch calibration summary
    Calibration,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RequestStarted => "request_started",
            EventType::RequestSucceeded => "request_succeeded",
            EventType::RequestFailed => "request_failed",
            EventType::ModelLoaded => "model_loaded",
            EventType::FeatureEngineering => "feature_engineering",
            EventType::Calibration => "calibration",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// Correlates all events of one batch request
    pub request_id: Uuid,
    pub details: Value,
}

impl PredictionEvent {
    pub fn new(event_type: EventType, request_id: Uuid, details: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            request_id,
            details,
        }
    }

    /// Single-line JSON form
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
