//! Features Module - Feature Safety Guard and feature engineering
//!
//! Turns a raw lead record into a fixed-order, numerically safe feature
//! vector plus a coverage signal.

pub mod guard;
pub mod layout;


pub use guard::{
    FeatureDiagnostics, FeatureGuard, FeatureVector, InfPolicy, NanPolicy, RawFeature, CLAMP_BOUND,
};
pub use layout::{derivation_for, engineer_features, Derivation, FEATURE_TABLE};

use crate::store::LeadRecord;

impl FeatureGuard {
    /// Engineer and sanitise the features named by the model for one record.
    pub fn build_feature_vector(&self, record: &LeadRecord, names: &[String]) -> FeatureVector {
        let raw = engineer_features(self, record, names);
        self.safe_feature_vector(&raw, names)
    }
}
