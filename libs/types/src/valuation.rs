//! Pricing strategies, anchors, and valuation outputs
//!
//! An `Anchor` is a comparable record judged similar enough to a valuation
//! target to inform its price. A `Valuation` is the full estimation output,
//! including the anchors used and a confidence score. Both are ephemeral.

use serde::{Deserialize, Serialize};

use crate::feature::FeatureVector;

/// Price estimation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingStrategy {
    /// Price to sell quickly: 25th percentile of anchor prices, discounted.
    Competitive,
    /// Similarity-weighted walk over anchor prices.
    FairValue,
    /// Price for patient sellers: 75th percentile of anchor prices, marked up.
    Premium,
}

impl PricingStrategy {
    /// Multiplier applied to the baseline estimate when no anchors exist.
    pub fn fallback_multiplier(&self) -> f64 {
        match self {
            PricingStrategy::Competitive => 0.9,
            PricingStrategy::FairValue => 1.0,
            PricingStrategy::Premium => 1.2,
        }
    }

    /// Strategy name as a string label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            PricingStrategy::Competitive => "competitive",
            PricingStrategy::FairValue => "fair_value",
            PricingStrategy::Premium => "premium",
        }
    }
}

/// A comparable record selected for a valuation target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Primary key of the comparable record.
    pub record_key: String,
    /// Overall similarity to the target, in [0, 1].
    pub similarity: f64,
    /// The comparable's listed price.
    pub price: f64,
    /// The comparable's feature vector, for caller-side inspection.
    pub features: FeatureVector,
}

/// Distribution statistics over the anchor prices behind a valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRangeStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    /// std_dev / mean; drives the confidence stability bonus.
    pub coefficient_of_variation: f64,
}

/// Full output of a price estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    /// The estimated price.
    pub estimated_price: f64,
    /// Strategy that produced the estimate.
    pub strategy: PricingStrategy,
    /// Confidence in the estimate, in [0, 1].
    pub confidence: f64,
    /// Price distribution over the anchors; `None` when no anchors were used.
    pub stats: Option<PriceRangeStats>,
    /// The anchors the estimate was derived from, best first.
    pub anchors: Vec<Anchor>,
    /// True when the rule-based fallback produced the estimate.
    pub fallback_used: bool,
}
