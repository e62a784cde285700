//! Feature-vector similarity scoring
//!
//! Per-feature scoring with relative tolerance and a hard cutoff at twice
//! the tolerance, combined into a weighted average over the features
//! present in at least one of the two vectors. Weights self-normalize, so
//! only relative magnitudes matter.
//!
//! A value of exactly zero counts as absent: scraped listings encode
//! "no such attribute" as 0 as often as they omit the field.

use types::feature::{FeatureConfig, FeatureSpec, FeatureVector};

/// Credit granted when a non-critical feature is present on one side only.
pub const PARTIAL_CREDIT: f64 = 0.3;

/// Guard against division by values arbitrarily close to zero.
const EPSILON: f64 = 1e-9;

fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

/// Score one feature. `None` when the feature is absent on both sides and
/// therefore contributes nothing to the weighted average.
pub fn feature_similarity(
    spec: &FeatureSpec,
    target: Option<f64>,
    candidate: Option<f64>,
) -> Option<f64> {
    match (present(target), present(candidate)) {
        (None, None) => None,
        (Some(_), None) | (None, Some(_)) => {
            if spec.critical {
                Some(0.0)
            } else {
                Some(PARTIAL_CREDIT)
            }
        }
        (Some(t), Some(c)) => {
            let rel_diff = (t - c).abs() / t.abs().max(EPSILON);
            Some(if rel_diff <= spec.tolerance {
                1.0
            } else if rel_diff < 2.0 * spec.tolerance {
                // Linear decay from 1 at tolerance to 0 at twice tolerance
                1.0 - (rel_diff - spec.tolerance) / spec.tolerance
            } else {
                0.0
            })
        }
    }
}

/// Weighted-average similarity over all configured features present in
/// either vector. Pairs sharing no configured feature score 0.
pub fn overall_similarity(
    config: &FeatureConfig,
    target: &FeatureVector,
    candidate: &FeatureVector,
) -> f64 {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for spec in config.iter() {
        let t = target.get(&spec.name).copied();
        let c = candidate.get(&spec.name).copied();
        if let Some(score) = feature_similarity(spec, t, c) {
            weighted_sum += score * spec.weight;
            total_weight += spec.weight;
        }
    }

    if total_weight <= 0.0 {
        return 0.0;
    }
    (weighted_sum / total_weight).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use types::feature::FeatureSpec;

    fn vector(pairs: &[(&str, f64)]) -> FeatureVector {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn level_config(tolerance: f64) -> FeatureConfig {
        FeatureConfig::new(vec![FeatureSpec::new("level", tolerance, 1.0)]).unwrap()
    }

    #[test]
    fn test_within_tolerance_is_perfect() {
        let spec = FeatureSpec::new("level", 0.1, 1.0);
        assert_eq!(feature_similarity(&spec, Some(11.0), Some(10.0)), Some(1.0));
        assert_eq!(feature_similarity(&spec, Some(11.0), Some(12.0)), Some(1.0));
        assert_eq!(feature_similarity(&spec, Some(10.0), Some(10.0)), Some(1.0));
    }

    #[test]
    fn test_linear_decay_band() {
        let spec = FeatureSpec::new("x", 0.1, 1.0);
        // rel_diff = 0.15 → halfway between tolerance and cutoff
        let score = feature_similarity(&spec, Some(100.0), Some(85.0)).unwrap();
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_hard_cutoff_at_twice_tolerance() {
        let spec = FeatureSpec::new("x", 0.1, 1.0);
        assert_eq!(feature_similarity(&spec, Some(100.0), Some(80.0)), Some(0.0));
        assert_eq!(feature_similarity(&spec, Some(100.0), Some(10.0)), Some(0.0));
    }

    #[test]
    fn test_absence_handling() {
        let critical = FeatureSpec::critical("x", 0.1, 1.0);
        let lenient = FeatureSpec::new("x", 0.1, 1.0);

        assert_eq!(feature_similarity(&critical, Some(5.0), None), Some(0.0));
        assert_eq!(
            feature_similarity(&lenient, Some(5.0), None),
            Some(PARTIAL_CREDIT)
        );
        // Zero counts as absent
        assert_eq!(
            feature_similarity(&lenient, Some(5.0), Some(0.0)),
            Some(PARTIAL_CREDIT)
        );
        assert_eq!(feature_similarity(&lenient, None, None), None);
        assert_eq!(feature_similarity(&lenient, Some(0.0), Some(0.0)), None);
    }

    #[test]
    fn test_identity_similarity() {
        let config = FeatureConfig::new(vec![
            FeatureSpec::new("level", 0.1, 1.0),
            FeatureSpec::critical("rarity", 0.05, 2.0),
            FeatureSpec::new("power", 0.2, 0.5),
        ])
        .unwrap();
        let x = vector(&[("level", 10.0), ("rarity", 3.0), ("power", 250.0)]);
        assert_eq!(overall_similarity(&config, &x, &x), 1.0);
    }

    #[test]
    fn test_weights_self_normalize() {
        // Same ratios, different absolute weights → same score
        let a = FeatureConfig::new(vec![
            FeatureSpec::new("level", 0.1, 1.0),
            FeatureSpec::new("power", 0.1, 3.0),
        ])
        .unwrap();
        let b = FeatureConfig::new(vec![
            FeatureSpec::new("level", 0.1, 10.0),
            FeatureSpec::new("power", 0.1, 30.0),
        ])
        .unwrap();

        let target = vector(&[("level", 10.0), ("power", 100.0)]);
        let candidate = vector(&[("level", 10.0), ("power", 150.0)]);

        let sa = overall_similarity(&a, &target, &candidate);
        let sb = overall_similarity(&b, &target, &candidate);
        assert!((sa - sb).abs() < 1e-12);
    }

    #[test]
    fn test_no_shared_features_scores_zero() {
        let config = level_config(0.1);
        let target = vector(&[]);
        let candidate = vector(&[]);
        assert_eq!(overall_similarity(&config, &target, &candidate), 0.0);
    }

    #[test]
    fn test_spec_scenario_two_listings() {
        // Target level 11 vs candidates at 10 and 12, tolerance 0.1:
        // both rel_diffs ≈ 0.09 → similarity 1.0 for both
        let config = level_config(0.1);
        let target = vector(&[("level", 11.0)]);
        assert_eq!(
            overall_similarity(&config, &target, &vector(&[("level", 10.0)])),
            1.0
        );
        assert_eq!(
            overall_similarity(&config, &target, &vector(&[("level", 12.0)])),
            1.0
        );
    }

    proptest! {
        /// Raising a tolerance never decreases similarity for a fixed pair.
        #[test]
        fn prop_monotonic_in_tolerance(
            t in 0.1f64..1000.0,
            c in 0.1f64..1000.0,
            tol_low in 0.01f64..1.0,
            tol_bump in 0.0f64..1.0,
        ) {
            let tol_high = tol_low + tol_bump;
            let low = feature_similarity(&FeatureSpec::new("x", tol_low, 1.0), Some(t), Some(c)).unwrap();
            let high = feature_similarity(&FeatureSpec::new("x", tol_high, 1.0), Some(t), Some(c)).unwrap();
            prop_assert!(high >= low - 1e-12);
        }

        /// Scores stay inside [0, 1] for arbitrary inputs.
        #[test]
        fn prop_similarity_bounded(
            t in prop::option::of(-1e6f64..1e6),
            c in prop::option::of(-1e6f64..1e6),
            tol in 0.001f64..10.0,
            critical in any::<bool>(),
        ) {
            let spec = if critical {
                FeatureSpec::critical("x", tol, 1.0)
            } else {
                FeatureSpec::new("x", tol, 1.0)
            };
            if let Some(score) = feature_similarity(&spec, t, c) {
                prop_assert!((0.0..=1.0).contains(&score));
            }
        }
    }
}
