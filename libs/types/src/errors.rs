//! Error taxonomy for the marketplace analytics core
//!
//! Comprehensive error taxonomy using thiserror. Store unavailability is a
//! degradation signal, not a fatal error: the dataset cache converts it to
//! a miss and keeps serving from its in-process mirror.

use thiserror::Error;

/// Parameter and configuration validation errors.
///
/// Always rejected before any computation or I/O.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid dataset name `{name}`: {reason}")]
    DatasetName { name: String, reason: String },

    #[error("similarity threshold {0} out of range (expected 0.0..=1.0)")]
    ThresholdOutOfRange(f64),

    #[error("max anchors {0} out of range (expected 1..=100)")]
    MaxAnchorsOutOfRange(usize),

    #[error("invalid feature configuration: {reason}")]
    FeatureConfig { reason: String },
}

/// The cache store could not be reached or timed out.
///
/// Never propagated as fatal: every consumer degrades to a miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cache store unavailable: {reason}")]
pub struct StoreUnavailable {
    pub reason: String,
}

impl StoreUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Dataset cache errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("refresh already in progress for dataset `{dataset}`")]
    RefreshInProgress { dataset: String },

    #[error("refresh failed for dataset `{dataset}`: {message}")]
    RefreshFailed { dataset: String, message: String },

    #[error("corrupted cache entry `{key}`: {reason}")]
    Deserialization { key: String, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Valuation errors.
///
/// Within a batch these are captured per item; they never abort the batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValuationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("feature extraction failed: {0}")]
    Extraction(String),
}
