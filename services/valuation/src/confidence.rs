//! Price statistics and confidence scoring
//!
//! Confidence combines how many anchors informed the estimate, how similar
//! they were to the target, and how tightly their prices cluster. The
//! price coefficient of variation drives a stability bonus: tight clusters
//! earn up to 0.4, scattered ones earn nothing.

use types::valuation::PriceRangeStats;

/// Anchor count at which the count term saturates.
const COUNT_SATURATION: f64 = 20.0;

/// Weight of the average-similarity term.
const SIMILARITY_WEIGHT: f64 = 0.3;

/// Maximum stability bonus for perfectly clustered prices.
const STABILITY_BONUS_MAX: f64 = 0.4;

/// Coefficient-of-variation ceiling above which no bonus is granted.
const STABILITY_CV_CEILING: f64 = 0.5;

/// Confidence assigned to fallback estimates with zero anchors.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Distribution statistics over a non-empty price list.
pub fn price_stats(prices: &[f64]) -> Option<PriceRangeStats> {
    if prices.is_empty() {
        return None;
    }

    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    let variance = sorted.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();
    let coefficient_of_variation = if mean.abs() > f64::EPSILON {
        std_dev / mean.abs()
    } else {
        0.0
    };

    Some(PriceRangeStats {
        min: sorted[0],
        max: sorted[n - 1],
        mean,
        median,
        std_dev,
        coefficient_of_variation,
    })
}

/// Confidence for an anchor-backed estimate.
///
/// clamp01( min(count / 20, 1) + avg_similarity × 0.3 + stability ) where
/// stability scales linearly from 0.4 at cv = 0 down to 0 at cv ≥ 0.5.
pub fn confidence(anchor_count: usize, avg_similarity: f64, coefficient_of_variation: f64) -> f64 {
    let count_term = (anchor_count as f64 / COUNT_SATURATION).min(1.0);
    let similarity_term = avg_similarity * SIMILARITY_WEIGHT;
    let stability_term = if coefficient_of_variation < STABILITY_CV_CEILING {
        STABILITY_BONUS_MAX * (1.0 - coefficient_of_variation / STABILITY_CV_CEILING)
    } else {
        0.0
    };
    (count_term + similarity_term + stability_term).clamp(0.0, 1.0)
}
