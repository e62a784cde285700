//! Market-anchor valuator
//!
//! Pulls a pre-filtered candidate pool from the dataset cache, ranks it by
//! feature similarity, and turns the surviving anchors into a price
//! estimate with a confidence score. With no usable anchors the rule-based
//! baseline takes over, so valuation always produces an answer.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dataset_cache::DatasetCache;
use types::errors::{ValidationError, ValuationError};
use types::feature::{FeatureConfig, FeatureVector};
use types::record::Record;
use types::valuation::{PricingStrategy, Valuation};

use crate::anchors::{rank_anchors, validate_params, Candidate};
use crate::confidence::{confidence, price_stats, FALLBACK_CONFIDENCE};
use crate::extract::{BaselineEstimator, FeatureExtractor};
use crate::strategy::estimate_from_anchors;

/// Tuning knobs for one valuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuatorConfig {
    /// Record field holding the listed price; candidates must carry a
    /// positive value here.
    pub price_field: String,
    /// Threshold used by [`MarketAnchorValuator::valuate_record`].
    pub default_threshold: f64,
    /// Anchor cap used by [`MarketAnchorValuator::valuate_record`].
    pub default_max_anchors: usize,
    /// Concurrent extractions during batch valuation.
    pub batch_parallelism: usize,
}

impl Default for ValuatorConfig {
    fn default() -> Self {
        Self {
            price_field: "price".to_string(),
            default_threshold: 0.6,
            default_max_anchors: 20,
            batch_parallelism: 4,
        }
    }
}

/// One item of a batch valuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationRequest {
    pub record: Record,
    pub strategy: PricingStrategy,
}

/// Valuation engine over one dataset cache.
pub struct MarketAnchorValuator {
    cache: Arc<DatasetCache>,
    extractor: Arc<dyn FeatureExtractor>,
    baseline: Arc<dyn BaselineEstimator>,
    features: FeatureConfig,
    config: ValuatorConfig,
}

impl MarketAnchorValuator {
    /// Build a valuator; the configured defaults are validated up front.
    pub fn new(
        cache: Arc<DatasetCache>,
        extractor: Arc<dyn FeatureExtractor>,
        baseline: Arc<dyn BaselineEstimator>,
        features: FeatureConfig,
        config: ValuatorConfig,
    ) -> Result<Self, ValidationError> {
        validate_params(config.default_threshold, config.default_max_anchors)?;
        if config.batch_parallelism == 0 {
            return Err(ValidationError::FeatureConfig {
                reason: "batch_parallelism must be at least 1".to_string(),
            });
        }
        Ok(Self {
            cache,
            extractor,
            baseline,
            features,
            config,
        })
    }

    /// Find comparable records for a target, best first.
    ///
    /// Ordered by descending similarity with primary-key tie-breaks.
    /// Parameters are validated before any computation.
    pub async fn find_anchors(
        &self,
        target: &FeatureVector,
        threshold: f64,
        max_anchors: usize,
    ) -> Result<Vec<types::valuation::Anchor>, ValuationError> {
        validate_params(threshold, max_anchors).map_err(ValuationError::from)?;

        let price_field = self.config.price_field.as_str();
        let pool = self
            .cache
            .query(
                |r| r.numeric(price_field).is_some_and(|p| p > 0.0),
                None,
                None,
            )
            .await;

        if pool.cold {
            debug!(
                dataset = %self.cache.name(),
                "candidate pool cold; valuation will rely on the baseline"
            );
        }

        let mut extraction_failures = 0usize;
        let mut candidates = Vec::with_capacity(pool.records.len());
        for record in &pool.records {
            let Some(record_key) = record.key(self.cache.primary_key()) else {
                continue;
            };
            let Some(price) = record.numeric(&self.config.price_field) else {
                continue;
            };
            match self.extractor.extract(record) {
                Ok(features) => candidates.push(Candidate {
                    record_key,
                    features,
                    price,
                }),
                Err(err) => {
                    extraction_failures += 1;
                    debug!(
                        dataset = %self.cache.name(),
                        record_key,
                        error = %err,
                        "candidate skipped: extraction failed"
                    );
                }
            }
        }
        if extraction_failures > 0 {
            warn!(
                dataset = %self.cache.name(),
                extraction_failures,
                "candidates skipped during anchor search"
            );
        }

        let anchors = rank_anchors(&self.features, target, candidates, threshold, max_anchors);
        debug!(
            dataset = %self.cache.name(),
            anchors = anchors.len(),
            threshold,
            "anchor search finished"
        );
        Ok(anchors)
    }

    /// Estimate a price for a target feature vector.
    ///
    /// Never fails past parameter validation: zero anchors delegate to the
    /// baseline estimator with a strategy-dependent multiplier.
    pub async fn calculate_value(
        &self,
        target: &FeatureVector,
        strategy: PricingStrategy,
        threshold: f64,
        max_anchors: usize,
    ) -> Result<Valuation, ValuationError> {
        let anchors = self.find_anchors(target, threshold, max_anchors).await?;

        if anchors.is_empty() {
            let baseline = self.baseline.estimate(target);
            let estimated_price = baseline * strategy.fallback_multiplier();
            info!(
                dataset = %self.cache.name(),
                strategy = strategy.label(),
                estimated_price,
                "no anchors; baseline fallback used"
            );
            return Ok(Valuation {
                estimated_price,
                strategy,
                confidence: FALLBACK_CONFIDENCE,
                stats: None,
                anchors: Vec::new(),
                fallback_used: true,
            });
        }

        let estimated_price = estimate_from_anchors(strategy, &anchors);
        let prices: Vec<f64> = anchors.iter().map(|a| a.price).collect();
        let stats = price_stats(&prices);
        let avg_similarity =
            anchors.iter().map(|a| a.similarity).sum::<f64>() / anchors.len() as f64;
        let cv = stats
            .as_ref()
            .map(|s| s.coefficient_of_variation)
            .unwrap_or(0.0);

        Ok(Valuation {
            estimated_price,
            strategy,
            confidence: confidence(anchors.len(), avg_similarity, cv),
            stats,
            anchors,
            fallback_used: false,
        })
    }

    /// Extract a record's features and estimate its value with the
    /// configured defaults.
    pub async fn valuate_record(
        &self,
        record: &Record,
        strategy: PricingStrategy,
    ) -> Result<Valuation, ValuationError> {
        let target = self
            .extractor
            .extract(record)
            .map_err(|e| ValuationError::Extraction(e.to_string()))?;
        self.calculate_value(
            &target,
            strategy,
            self.config.default_threshold,
            self.config.default_max_anchors,
        )
        .await
    }

    /// Valuate a batch, preserving input order.
    ///
    /// Parameters are validated once before any computation. A per-item
    /// extraction or valuation failure becomes that item's error and never
    /// aborts the batch. Items run on a small bounded worker pool.
    pub async fn batch_valuate(
        &self,
        requests: Vec<ValuationRequest>,
        threshold: f64,
        max_anchors: usize,
    ) -> Result<Vec<Result<Valuation, ValuationError>>, ValuationError> {
        validate_params(threshold, max_anchors).map_err(ValuationError::from)?;

        let results: Vec<Result<Valuation, ValuationError>> = stream::iter(requests)
            .map(|request| async move {
                let target = self
                    .extractor
                    .extract(&request.record)
                    .map_err(|e| ValuationError::Extraction(e.to_string()))?;
                self.calculate_value(&target, request.strategy, threshold, max_anchors)
                    .await
            })
            .buffered(self.config.batch_parallelism)
            .collect()
            .await;

        debug!(
            dataset = %self.cache.name(),
            items = results.len(),
            failures = results.iter().filter(|r| r.is_err()).count(),
            "batch valuation finished"
        );
        Ok(results)
    }
}
