//! Anchor selection
//!
//! Pure ranking over an already-extracted candidate pool: score each
//! candidate against the target, drop those below the threshold, order by
//! descending similarity with primary-key tie-breaks for determinism, and
//! truncate to the requested count.

use types::errors::ValidationError;
use types::feature::{FeatureConfig, FeatureVector};
use types::valuation::Anchor;

use crate::similarity::overall_similarity;

/// Valid range for `max_anchors`.
pub const MAX_ANCHORS_RANGE: std::ops::RangeInclusive<usize> = 1..=100;

/// A scored candidate before thresholding.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record_key: String,
    pub features: FeatureVector,
    pub price: f64,
}

/// Reject out-of-range parameters before any computation.
pub fn validate_params(threshold: f64, max_anchors: usize) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&threshold) || threshold.is_nan() {
        return Err(ValidationError::ThresholdOutOfRange(threshold));
    }
    if !MAX_ANCHORS_RANGE.contains(&max_anchors) {
        return Err(ValidationError::MaxAnchorsOutOfRange(max_anchors));
    }
    Ok(())
}

/// Rank candidates against the target and keep the best.
pub fn rank_anchors(
    config: &FeatureConfig,
    target: &FeatureVector,
    candidates: Vec<Candidate>,
    threshold: f64,
    max_anchors: usize,
) -> Vec<Anchor> {
    let mut anchors: Vec<Anchor> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let similarity = overall_similarity(config, target, &candidate.features);
            (similarity >= threshold).then(|| Anchor {
                record_key: candidate.record_key,
                similarity,
                price: candidate.price,
                features: candidate.features,
            })
        })
        .collect();

    anchors.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record_key.cmp(&b.record_key))
    });
    anchors.truncate(max_anchors);
    anchors
}
