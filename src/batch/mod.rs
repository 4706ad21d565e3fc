//! Batch Prediction Orchestrator
//!
//! Drives one request through
//! `Received → Normalized → ModelReady → Resolving → PerItem(×N) → Assembled`.
//!
//! ## Failure semantics
//! - Malformed, empty or oversized input is rejected before any model work.
//! - Model load failure rejects the whole batch.
//! - Missing records and per-item errors (panics included) only count as
//!   failed items; siblings are unaffected.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::calibration::{get_calibration_stats, CalibrationEngine, CalibrationMonitor};
use crate::config::BatchConfig;
use crate::features::{engineer_features, FeatureGuard, RawFeature};
use crate::registry::{LoadedModel, ModelLease, ModelRegistry, RegistryError};
use crate::store::{LeadRecord, LeadStore, StoreError};
use crate::telemetry::{EventSink, EventType, PredictionEvent};

#[cfg(test)]
mod tests;

/// Response contract version
pub const SCHEMA_VERSION: &str = "2.0";

/// Object keys tried, in order, when a request entry is an object
const IDENTIFIER_KEYS: &[&str] = &["lead_id", "id"];

// ============================================================================
// REQUEST
// ============================================================================

/// Accepted request shapes
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BatchRequest {
    /// `["L1", "L2"]`
    Bare(Vec<Value>),
    /// `{"lead_ids": ["L1", "L2"]}`
    Wrapped { lead_ids: Vec<Value> },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("no lead identifiers provided")]
    Empty,

    #[error("batch of {count} identifiers exceeds the maximum of {max}")]
    TooLarge { count: usize, max: usize },

    #[error("malformed request: {0}")]
    Malformed(String),
}

/// Canonical identifier string for one request entry
fn identifier(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => IDENTIFIER_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .map(identifier)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Collapse both request shapes into an ordered identifier list.
pub fn normalize_request(request: BatchRequest, max_batch_size: usize) -> Result<Vec<String>, RequestError> {
    let entries = match request {
        BatchRequest::Bare(entries) => entries,
        BatchRequest::Wrapped { lead_ids } => lead_ids,
    };

    if entries.is_empty() {
        return Err(RequestError::Empty);
    }
    if entries.len() > max_batch_size {
        return Err(RequestError::TooLarge {
            count: entries.len(),
            max: max_batch_size,
        });
    }

    Ok(entries.iter().map(identifier).collect())
}

// ============================================================================
// RESPONSE
// ============================================================================

/// Scored output for one identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub lead_id: String,
    pub raw_probability: f64,
    pub calibrated_probability: f64,
    pub confidence: f64,
    pub features_present_ratio: f64,
    pub prediction: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub lead_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub model_version: String,
    pub model_hash: String,
    pub total_processed: usize,
    pub successful_predictions: usize,
    pub failed_predictions: usize,
    pub processing_time_ms: f64,
    pub cache_hit: bool,
    pub schema_version: String,
    pub predictions: Vec<PredictionResult>,
    pub failures: Vec<ItemFailure>,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Request-level failures; everything else is reported per item
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),

    #[error("model unavailable: {0}")]
    ModelUnavailable(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("inference worker failed: {0}")]
    Worker(String),
}

// ============================================================================
// PER-ITEM SCORING
// ============================================================================

/// A successful item plus the raw features it was built from
struct Scored {
    result: PredictionResult,
    raw: Vec<RawFeature>,
    /// Calibration fell back to the neutral probability
    neutralized: bool,
}

/// Everything a blocking worker needs to score items
#[derive(Clone)]
struct ScoringContext {
    model: Arc<LoadedModel>,
    guard: Arc<FeatureGuard>,
    engine: CalibrationEngine,
    threshold: f64,
}

impl ScoringContext {
    fn score(&self, lead_id: &str, record: &LeadRecord) -> Result<Scored, String> {
        let names = self.model.feature_names();
        let raw = engineer_features(&self.guard, record, names);
        let vector = self
            .guard
            .safe_feature_vector_with_medians(&raw, names, &self.model.bundle.feature_medians);

        if vector.coverage_ratio < self.guard.config().min_coverage {
            tracing::warn!(
                lead_id,
                coverage = vector.coverage_ratio,
                "Low feature coverage, prediction may be unreliable"
            );
        }

        let distribution = self
            .model
            .bundle
            .predict_distribution(&vector.values)
            .map_err(|e| e.to_string())?;
        let raw_probability = distribution[1];
        let calibrated = self.engine.apply(raw_probability, &distribution);

        Ok(Scored {
            result: PredictionResult {
                lead_id: lead_id.to_string(),
                raw_probability,
                calibrated_probability: calibrated.probability,
                confidence: calibrated.confidence,
                features_present_ratio: vector.coverage_ratio,
                prediction: calibrated.probability >= self.threshold,
            },
            raw,
            neutralized: calibrated.neutralized,
        })
    }

    /// Score one item, containing panics
    fn score_isolated(&self, lead_id: &str, record: Option<&LeadRecord>) -> Result<Scored, String> {
        if lead_id.is_empty() {
            return Err("blank lead identifier".to_string());
        }
        let record = record.ok_or_else(|| "lead not found".to_string())?;

        catch_unwind(AssertUnwindSafe(|| self.score(lead_id, record)))
            .unwrap_or_else(|_| Err("prediction panicked".to_string()))
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct BatchPredictor {
    registry: Arc<ModelRegistry>,
    guard: Arc<FeatureGuard>,
    engine: CalibrationEngine,
    monitor: Arc<CalibrationMonitor>,
    store: Arc<dyn LeadStore>,
    events: Arc<dyn EventSink>,
    workers: Arc<Semaphore>,
    config: BatchConfig,
}

impl BatchPredictor {
    pub fn new(
        registry: Arc<ModelRegistry>,
        guard: Arc<FeatureGuard>,
        engine: CalibrationEngine,
        monitor: Arc<CalibrationMonitor>,
        store: Arc<dyn LeadStore>,
        events: Arc<dyn EventSink>,
        config: BatchConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.inference_workers.max(1)));
        Self {
            registry,
            guard,
            engine,
            monitor,
            store,
            events,
            workers,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<CalibrationMonitor> {
        &self.monitor
    }

    pub fn calibration_method(&self) -> &'static str {
        self.engine.config().method.name()
    }

    fn emit(&self, event_type: EventType, request_id: Uuid, details: Value) {
        self.events.emit(PredictionEvent::new(event_type, request_id, details));
    }

    /// Run a full batch request.
    pub async fn predict(&self, request: BatchRequest) -> Result<BatchResponse, BatchError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();

        let result = self.run(request, request_id, started).await;

        match &result {
            Ok(response) => self.emit(
                EventType::RequestSucceeded,
                request_id,
                json!({
                    "total_processed": response.total_processed,
                    "successful_predictions": response.successful_predictions,
                    "failed_predictions": response.failed_predictions,
                    "processing_time_ms": response.processing_time_ms,
                    "cache_hit": response.cache_hit,
                    "model_version": response.model_version,
                }),
            ),
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Batch prediction rejected");
                self.emit(EventType::RequestFailed, request_id, json!({ "error": e.to_string() }));
            }
        }

        result
    }

    async fn run(&self, request: BatchRequest, request_id: Uuid, started: Instant) -> Result<BatchResponse, BatchError> {
        // Normalized
        let lead_ids = normalize_request(request, self.config.max_batch_size)?;
        self.emit(EventType::RequestStarted, request_id, json!({ "batch_size": lead_ids.len() }));

        // ModelReady
        let lease = self.acquire_model(request_id).await?;
        let model = Arc::clone(&lease.model);

        // Resolving
        let lookup: Vec<String> = lead_ids
            .iter()
            .filter(|id| !id.is_empty())
            .collect::<HashSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        let records = Arc::new(self.store.fetch_many(&lookup).await?);

        tracing::debug!(
            request_id = %request_id,
            requested = lead_ids.len(),
            resolved = records.len(),
            "Lead records resolved"
        );

        // PerItem
        let context = ScoringContext {
            model: Arc::clone(&model),
            guard: Arc::clone(&self.guard),
            engine: self.engine.clone(),
            threshold: self.config.prediction_threshold,
        };
        let outcomes = self.score_all(context, lead_ids, records).await?;

        // Assembled
        let mut predictions = Vec::new();
        let mut failures = Vec::new();
        let mut raw_rows = Vec::new();
        let mut neutral_fallbacks = 0usize;

        for (lead_id, outcome) in outcomes {
            match outcome {
                Ok(scored) => {
                    predictions.push(scored.result);
                    raw_rows.push(scored.raw);
                    neutral_fallbacks += usize::from(scored.neutralized);
                }
                Err(reason) => {
                    tracing::debug!(lead_id = %lead_id, reason = %reason, "Item failed");
                    failures.push(ItemFailure { lead_id, reason });
                }
            }
        }

        self.report_coverage(request_id, model.feature_names(), &raw_rows, &predictions);
        self.report_calibration(request_id, &predictions, neutral_fallbacks);

        let successful = predictions.len();
        let failed = failures.len();

        Ok(BatchResponse {
            model_version: model.version.clone(),
            model_hash: model.content_hash.clone(),
            total_processed: successful + failed,
            successful_predictions: successful,
            failed_predictions: failed,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            cache_hit: lease.cache_hit,
            schema_version: SCHEMA_VERSION.to_string(),
            predictions,
            failures,
        })
    }

    /// Obtain the active model off the async executor
    async fn acquire_model(&self, request_id: Uuid) -> Result<ModelLease, BatchError> {
        let registry = Arc::clone(&self.registry);
        let lease = tokio::task::spawn_blocking(move || registry.acquire(false))
            .await
            .map_err(|e| BatchError::Worker(e.to_string()))??;

        if !lease.cache_hit {
            self.emit(
                EventType::ModelLoaded,
                request_id,
                json!({
                    "version": lease.model.version,
                    "model_hash": lease.model.content_hash,
                    "artifact_path": lease.model.artifact_path.display().to_string(),
                }),
            );
        }

        Ok(lease)
    }

    /// Score every identifier in request order, split across bounded workers.
    async fn score_all(
        &self,
        context: ScoringContext,
        lead_ids: Vec<String>,
        records: Arc<HashMap<String, LeadRecord>>,
    ) -> Result<Vec<(String, Result<Scored, String>)>, BatchError> {
        let chunk_size = lead_ids.len().div_ceil(self.config.inference_workers.max(1)).max(1);
        let mut handles = Vec::new();

        for chunk in lead_ids.chunks(chunk_size) {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|e| BatchError::Worker(e.to_string()))?;
            let chunk = chunk.to_vec();
            let context = context.clone();
            let records = Arc::clone(&records);

            handles.push(tokio::task::spawn_blocking(move || {
                let scored: Vec<_> = chunk
                    .into_iter()
                    .map(|lead_id| {
                        let outcome = context.score_isolated(&lead_id, records.get(&lead_id));
                        (lead_id, outcome)
                    })
                    .collect();
                drop(permit);
                scored
            }));
        }

        let mut outcomes = Vec::with_capacity(lead_ids.len());
        for handle in handles {
            outcomes.extend(handle.await.map_err(|e| BatchError::Worker(e.to_string()))?);
        }
        Ok(outcomes)
    }

    /// Per-feature coverage across the batch's scored items
    fn report_coverage(
        &self,
        request_id: Uuid,
        names: &[String],
        raw_rows: &[Vec<RawFeature>],
        predictions: &[PredictionResult],
    ) {
        if raw_rows.is_empty() {
            return;
        }

        let feature_coverage: serde_json::Map<String, Value> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let column: Vec<RawFeature> = raw_rows
                    .iter()
                    .map(|row| row.get(i).cloned().unwrap_or(RawFeature::Null))
                    .collect();
                (name.clone(), json!(self.guard.calculate_feature_coverage(&column, name)))
            })
            .collect();

        let min_coverage = self.guard.config().min_coverage;
        let low_coverage = predictions
            .iter()
            .filter(|p| p.features_present_ratio < min_coverage)
            .count();
        let mean_coverage =
            predictions.iter().map(|p| p.features_present_ratio).sum::<f64>() / predictions.len() as f64;

        self.emit(
            EventType::FeatureEngineering,
            request_id,
            json!({
                "items": predictions.len(),
                "mean_coverage": mean_coverage,
                "low_coverage_items": low_coverage,
                "feature_coverage": feature_coverage,
            }),
        );
    }

    /// `neutral_fallbacks` counts items whose calibration fell back to the
    /// neutral probability; the response itself cannot tell them apart.
    fn report_calibration(&self, request_id: Uuid, predictions: &[PredictionResult], neutral_fallbacks: usize) {
        if predictions.is_empty() {
            return;
        }

        let calibrated: Vec<f64> = predictions.iter().map(|p| p.calibrated_probability).collect();
        self.monitor.record(&calibrated);

        let stats = get_calibration_stats(&calibrated);
        self.emit(
            EventType::Calibration,
            request_id,
            json!({
                "method": self.engine.config().method.name(),
                "stats": stats,
                "neutral_fallbacks": neutral_fallbacks,
            }),
        );
    }
}
