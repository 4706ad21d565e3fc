//! Lead record store - the external data source for raw records
//!
//! The CRM owns the `leads` table; this module only reads from it.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

/// A raw lead record keyed by its identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub lead_id: String,
    pub fields: Map<String, Value>,
}

impl LeadRecord {
    pub fn new(lead_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            lead_id: lead_id.into(),
            fields,
        }
    }

    /// Build from a JSON object; non-objects yield an empty record
    pub fn from_value(lead_id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(lead_id, fields)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lead store query failed: {0}")]
    Query(String),

    #[error("lead fixture unreadable: {0}")]
    Fixture(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

/// Source of raw lead records
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Fetch every record matching `lead_ids` in one round trip.
    /// Identifiers without a record are simply absent from the map.
    async fn fetch_many(&self, lead_ids: &[String]) -> Result<HashMap<String, LeadRecord>, StoreError>;
}

// ============================================================================
// POSTGRES
// ============================================================================

/// Reads `leads(id, data JSONB)` from the CRM database
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the connection pool
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn fetch_many(&self, lead_ids: &[String]) -> Result<HashMap<String, LeadRecord>, StoreError> {
        let rows: Vec<(String, Value)> = sqlx::query_as(
            r#"
            SELECT id::text AS id, data
            FROM leads
            WHERE id::text = ANY($1)
            "#,
        )
        .bind(lead_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, data)| (id.clone(), LeadRecord::from_value(id, data)))
            .collect())
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Fixed set of records, for fixtures and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeadStore {
    records: HashMap<String, LeadRecord>,
}

impl InMemoryLeadStore {
    pub fn new(records: impl IntoIterator<Item = LeadRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.lead_id.clone(), r)).collect(),
        }
    }

    /// Load a JSON object of `{ "<lead_id>": { ...fields } }`
    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Fixture(format!("{}: {}", path.display(), e)))?;
        let parsed: Map<String, Value> = serde_json::from_str(&content)
            .map_err(|e| StoreError::Fixture(format!("{}: {}", path.display(), e)))?;

        Ok(Self::new(
            parsed
                .into_iter()
                .map(|(id, data)| LeadRecord::from_value(id, data)),
        ))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn fetch_many(&self, lead_ids: &[String]) -> Result<HashMap<String, LeadRecord>, StoreError> {
        Ok(lead_ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }
}
