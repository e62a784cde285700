//! Price estimation strategies
//!
//! Competitive and premium prices come from the 25th/75th percentile of
//! anchor prices with a discount/markup. Fair value is a cumulative-weight
//! walk: anchors sorted by price ascending, similarity weight accumulated,
//! first price to reach half the total weight wins. The walk is kept
//! exactly as observed in production: it is not an interpolated weighted
//! median and it is sensitive to sort order on ties.

use types::valuation::{Anchor, PricingStrategy};

/// Discount applied to the 25th percentile for competitive pricing.
const COMPETITIVE_DISCOUNT: f64 = 0.95;

/// Markup applied to the 75th percentile for premium pricing.
const PREMIUM_MARKUP: f64 = 1.05;

/// Percentile with linear interpolation between closest ranks.
///
/// `prices` must be sorted ascending and non-empty.
pub fn percentile(prices: &[f64], pct: f64) -> f64 {
    debug_assert!(!prices.is_empty());
    if prices.len() == 1 {
        return prices[0];
    }
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (prices.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        prices[lower]
    } else {
        let fraction = rank - lower as f64;
        prices[lower] + (prices[upper] - prices[lower]) * fraction
    }
}

/// The cumulative-weight walk over anchor prices.
///
/// Anchors are walked in ascending price order (ties broken by record key
/// for determinism); the first price at which the accumulated similarity
/// weight reaches at least half the total is returned.
pub fn weighted_walk_price(anchors: &[Anchor]) -> f64 {
    debug_assert!(!anchors.is_empty());

    let mut ordered: Vec<&Anchor> = anchors.iter().collect();
    ordered.sort_by(|a, b| {
        a.price
            .partial_cmp(&b.price)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record_key.cmp(&b.record_key))
    });

    let total_weight: f64 = ordered.iter().map(|a| a.similarity).sum();
    if total_weight <= 0.0 {
        // All-zero weights cannot steer the walk; fall back to the midpoint
        // of the ordered prices.
        return ordered[ordered.len() / 2].price;
    }

    let half = total_weight / 2.0;
    let mut cumulative = 0.0;
    for anchor in &ordered {
        cumulative += anchor.similarity;
        if cumulative >= half {
            return anchor.price;
        }
    }
    // Unreachable with positive total weight; keep the last price as a
    // deterministic answer.
    ordered[ordered.len() - 1].price
}

/// Estimate a price from a non-empty anchor set under the given strategy.
pub fn estimate_from_anchors(strategy: PricingStrategy, anchors: &[Anchor]) -> f64 {
    let mut prices: Vec<f64> = anchors.iter().map(|a| a.price).collect();
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    match strategy {
        PricingStrategy::Competitive => percentile(&prices, 25.0) * COMPETITIVE_DISCOUNT,
        PricingStrategy::Premium => percentile(&prices, 75.0) * PREMIUM_MARKUP,
        PricingStrategy::FairValue => weighted_walk_price(anchors),
    }
}
