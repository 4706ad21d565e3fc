//! Model Module - predictor interface and preprocessing
//!
//! The trained model is opaque to the rest of the service: anything that
//! exposes label and probability prediction through [`Predictor`] can be
//! served.

pub mod predictor;
pub mod preprocess;

use thiserror::Error;

pub use predictor::{DecisionTree, LogisticRegression, Predictor, PredictorSpec, RandomForest, TreeNode};
pub use preprocess::{FeatureSelector, Scaler};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictError {
    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("non-finite value produced")]
    NonFinite,

    #[error("malformed tree at node {0}")]
    MalformedTree(usize),

    #[error("ensemble has no trees")]
    EmptyEnsemble,
}
