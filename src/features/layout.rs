//! Feature Layout - Named derivations from a raw lead record
//!
//! **This table controls how every known feature name is computed.**
//!
//! The model's own `feature_names` decide which entries are used and in
//! which order. Names missing from the table fall back to a direct field
//! lookup on the record.

use thiserror::Error;

use super::guard::{FeatureGuard, RawFeature};
use crate::store::LeadRecord;

// ============================================================================
// DERIVATIONS
// ============================================================================

/// How a single feature is derived from a record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Derivation {
    /// Direct field lookup
    Field(&'static str),
    /// `x²`
    Squared(&'static str),
    /// `ln(1 + x)`, defined for `x > -1`
    Log1p(&'static str),
    /// `x / reference`, clamped to `[0, 1]`
    Percentile { field: &'static str, reference: f64 },
    /// Small fixed categorical encoding; unknown labels encode as `0.0`
    Categorical {
        field: &'static str,
        codes: &'static [(&'static str, f64)],
    },
    /// Product of two numeric fields
    Interaction(&'static str, &'static str),
}

const LEAD_SOURCE_CODES: &[(&str, f64)] = &[
    ("referral", 3.0),
    ("campus_event", 2.0),
    ("organic", 2.0),
    ("paid_search", 1.0),
    ("social", 1.0),
];

const PROGRAM_LEVEL_CODES: &[(&str, f64)] = &[
    ("certificate", 1.0),
    ("undergraduate", 2.0),
    ("graduate", 3.0),
    ("doctoral", 4.0),
];

const RESIDENCY_CODES: &[(&str, f64)] = &[
    ("in_state", 1.0),
    ("out_of_state", 2.0),
    ("international", 3.0),
];

/// Known feature names and their derivations
pub const FEATURE_TABLE: &[(&str, Derivation)] = &[
    // === Direct lookups ===
    ("gpa", Derivation::Field("gpa")),
    ("test_score", Derivation::Field("test_score")),
    ("engagement_score", Derivation::Field("engagement_score")),
    ("email_opens", Derivation::Field("email_opens")),
    ("website_visits", Derivation::Field("website_visits")),
    ("campus_visits", Derivation::Field("campus_visits")),
    ("days_since_inquiry", Derivation::Field("days_since_inquiry")),
    ("application_completeness", Derivation::Field("application_completeness")),
    ("financial_aid_requested", Derivation::Field("financial_aid_requested")),

    // === Transforms ===
    ("gpa_squared", Derivation::Squared("gpa")),
    ("engagement_score_squared", Derivation::Squared("engagement_score")),
    ("log_website_visits", Derivation::Log1p("website_visits")),
    ("log_email_opens", Derivation::Log1p("email_opens")),
    ("log_days_since_inquiry", Derivation::Log1p("days_since_inquiry")),

    // === Percentile normalisations ===
    ("gpa_percentile", Derivation::Percentile { field: "gpa", reference: 4.0 }),
    ("test_score_percentile", Derivation::Percentile { field: "test_score", reference: 1600.0 }),
    ("engagement_percentile", Derivation::Percentile { field: "engagement_score", reference: 100.0 }),

    // === Categorical encodings ===
    ("lead_source_encoded", Derivation::Categorical { field: "lead_source", codes: LEAD_SOURCE_CODES }),
    ("program_level_encoded", Derivation::Categorical { field: "program_level", codes: PROGRAM_LEVEL_CODES }),
    ("residency_encoded", Derivation::Categorical { field: "residency", codes: RESIDENCY_CODES }),

    // === Interactions ===
    ("gpa_x_engagement", Derivation::Interaction("gpa", "engagement_score")),
    ("test_score_x_gpa", Derivation::Interaction("test_score", "gpa")),
    ("visits_x_opens", Derivation::Interaction("website_visits", "email_opens")),
    ("campus_visits_x_completeness", Derivation::Interaction("campus_visits", "application_completeness")),
];

/// Look up the derivation for a feature name
pub fn derivation_for(name: &str) -> Option<Derivation> {
    FEATURE_TABLE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, d)| *d)
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum DerivationError {
    #[error("field `{0}` is not numeric")]
    NotNumeric(String),

    #[error("log1p undefined for {value} in field `{field}`")]
    OutOfDomain { field: String, value: f64 },
}

// ============================================================================
// ENGINEERING
// ============================================================================

/// Numeric view of a record field. Missing fields are `None`.
fn numeric_field(record: &LeadRecord, field: &str) -> Result<Option<f64>, DerivationError> {
    match RawFeature::from(record.field(field)) {
        RawFeature::Null => Ok(None),
        RawFeature::Number(x) => Ok(Some(x)),
        RawFeature::Bool(b) => Ok(Some(if b { 1.0 } else { 0.0 })),
        RawFeature::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| DerivationError::NotNumeric(field.to_string()))
        }
        RawFeature::Other(_) => Err(DerivationError::NotNumeric(field.to_string())),
    }
}

fn numeric_or_null(value: Option<f64>) -> RawFeature {
    value.map(RawFeature::Number).unwrap_or(RawFeature::Null)
}

/// Derive one raw feature value from a record.
pub fn derive(
    guard: &FeatureGuard,
    record: &LeadRecord,
    name: &str,
    derivation: Derivation,
) -> Result<RawFeature, DerivationError> {
    let value = match derivation {
        Derivation::Field(field) => RawFeature::from(record.field(field)),
        Derivation::Squared(field) => numeric_or_null(numeric_field(record, field)?.map(|x| x * x)),
        Derivation::Log1p(field) => match numeric_field(record, field)? {
            Some(x) if x <= -1.0 => {
                return Err(DerivationError::OutOfDomain {
                    field: field.to_string(),
                    value: x,
                })
            }
            other => numeric_or_null(other.map(f64::ln_1p)),
        },
        Derivation::Percentile { field, reference } => numeric_or_null(
            numeric_field(record, field)?.map(|x| (x / reference).clamp(0.0, 1.0)),
        ),
        Derivation::Categorical { field, codes } => {
            let label = guard.safe_categorical_value(&RawFeature::from(record.field(field)), name);
            if label == guard.config().default_categorical {
                RawFeature::Null
            } else {
                let lowered = label.to_ascii_lowercase();
                let code = codes
                    .iter()
                    .find(|(known, _)| *known == lowered)
                    .map(|(_, code)| *code)
                    .unwrap_or(0.0);
                RawFeature::Number(code)
            }
        }
        Derivation::Interaction(a, b) => {
            match (numeric_field(record, a)?, numeric_field(record, b)?) {
                (Some(x), Some(y)) => RawFeature::Number(x * y),
                _ => RawFeature::Null,
            }
        }
    };

    Ok(value)
}

/// Derive the raw values for `names`, in order.
///
/// Failures degrade to the numeric default and are logged, never propagated.
pub fn engineer_features(guard: &FeatureGuard, record: &LeadRecord, names: &[String]) -> Vec<RawFeature> {
    names
        .iter()
        .map(|name| {
            let derived = match derivation_for(name) {
                Some(derivation) => derive(guard, record, name, derivation),
                None => Ok(RawFeature::from(record.field(name))),
            };
            match derived {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        lead_id = %record.lead_id,
                        feature = %name,
                        error = %e,
                        "Feature derivation failed, using default"
                    );
                    RawFeature::Number(guard.default_numeric())
                }
            }
        })
        .collect()
}
