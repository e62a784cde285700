//! Market Valuation Service
//!
//! Similarity-based price estimation over a cached record collection:
//! - Per-feature tolerance scoring with a hard cutoff at twice tolerance
//! - Anchor search: threshold filter, deterministic ranking, capped count
//! - Competitive / fair-value / premium strategies over anchor prices
//! - Confidence blending anchor count, similarity, and price stability
//! - Rule-based baseline fallback when no comparable records exist
//!
//! # Pipeline
//!
//! ```text
//!   DatasetCache ──query──► candidate pool (price > 0)
//!        │                       │ extract features
//!        │                  ┌────▼─────┐
//!        │                  │  anchors  │ similarity ≥ threshold
//!        │                  └────┬─────┘
//!        │                       │ strategy + stats
//!        │                  ┌────▼─────┐
//!        └─ cold/empty ────►│ baseline │──► Valuation
//!                           └──────────┘
//! ```

pub mod anchors;
pub mod confidence;
pub mod extract;
pub mod similarity;
pub mod strategy;
pub mod valuator;

pub use anchors::{rank_anchors, validate_params, Candidate, MAX_ANCHORS_RANGE};
pub use confidence::{confidence, price_stats, FALLBACK_CONFIDENCE};
pub use extract::{BaselineEstimator, ExtractionError, FeatureExtractor, FieldFeatureExtractor};
pub use similarity::{feature_similarity, overall_similarity, PARTIAL_CREDIT};
pub use strategy::{estimate_from_anchors, percentile, weighted_walk_price};
pub use valuator::{MarketAnchorValuator, ValuationRequest, ValuatorConfig};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
