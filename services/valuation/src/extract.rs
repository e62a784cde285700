//! Pluggable extraction and fallback seams
//!
//! Which features describe a record, and what a record is worth when no
//! comparables exist, are game-specific concerns. Both live behind traits;
//! the caller picks the implementation per dataset kind.

use thiserror::Error;

use types::feature::{FeatureConfig, FeatureVector};
use types::record::Record;

/// A record could not be turned into a feature vector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("feature extraction failed: {0}")]
pub struct ExtractionError(pub String);

impl ExtractionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Derives a feature vector from one record.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, record: &Record) -> Result<FeatureVector, ExtractionError>;
}

/// Rule-based price estimator used when no good comparables exist.
///
/// Infallible: the fallback path never errors.
pub trait BaselineEstimator: Send + Sync {
    fn estimate(&self, features: &FeatureVector) -> f64;
}

/// Extractor that reads configured features directly from record fields.
///
/// Suits datasets whose listings already carry numeric attributes under
/// the configured feature names. Missing or non-numeric fields are simply
/// absent from the vector; an entirely feature-less record is an error.
pub struct FieldFeatureExtractor {
    config: FeatureConfig,
}

impl FieldFeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }
}

impl FeatureExtractor for FieldFeatureExtractor {
    fn extract(&self, record: &Record) -> Result<FeatureVector, ExtractionError> {
        let mut features = FeatureVector::new();
        for spec in self.config.iter() {
            if let Some(value) = record.numeric(&spec.name) {
                features.insert(spec.name.clone(), value);
            }
        }
        if features.is_empty() {
            return Err(ExtractionError::new(
                "record carries none of the configured features",
            ));
        }
        Ok(features)
    }
}
